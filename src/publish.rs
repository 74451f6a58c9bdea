use tracing::{debug, info};

use crate::config::RepoRef;
use crate::error::Result;
use crate::provider::{Platform, TreeEntry};

/// A single file to add on top of an existing commit.
pub struct FileCommit<'a> {
    pub branch: &'a str,
    pub parent_sha: &'a str,
    pub path: &'a str,
    pub content: &'a str,
    pub message: &'a str,
}

/// Commit `file` onto its branch and move the branch to the new commit.
/// Returns the commit sha.
///
/// Goes through the git data API so any existing file at `path` is overwritten
/// and the commit lands in one ref update.
pub async fn commit_file(
    platform: &dyn Platform,
    repo: &RepoRef,
    file: &FileCommit<'_>,
) -> Result<String> {
    let blob = platform.create_blob(repo, file.content.as_bytes()).await?;
    let base_tree = platform.get_commit_tree(repo, file.parent_sha).await?;
    let tree = platform
        .create_tree(repo, &base_tree, &[TreeEntry::file(file.path, &blob)])
        .await?;
    debug!(repo = %repo, %blob, %tree, path = file.path, "tree prepared");

    let commit = platform
        .create_commit(repo, file.message, &tree, file.parent_sha)
        .await?;
    platform.update_ref(repo, file.branch, &commit).await?;
    info!(repo = %repo, branch = file.branch, %commit, path = file.path, "file committed");

    Ok(commit)
}
