use tracing::{debug, info, warn};

use crate::config::RepoRef;
use crate::error::Result;
use crate::provider::Platform;

/// Branch carrying the generated workflow. The workflow deletes it when done.
pub const MIGRATION_BRANCH: &str = "migrate-secrets";

/// Point `name` at the current head of the default branch, replacing whatever a
/// previous run left behind. Returns the head sha.
///
/// Deleting the stale branch is best effort; creating the new one is not.
pub async fn ensure_branch(platform: &dyn Platform, repo: &RepoRef, name: &str) -> Result<String> {
    let repository = platform.get_repository(repo).await?;
    let head = platform
        .get_branch_sha(repo, &repository.default_branch)
        .await?;
    debug!(repo = %repo, default_branch = %repository.default_branch, %head, "resolved head");

    match platform.delete_ref(repo, name).await {
        Ok(()) => debug!(repo = %repo, branch = name, "deleted branch left by a previous run"),
        Err(error) if error.is_not_found() => {
            debug!(repo = %repo, branch = name, "no previous branch to delete")
        }
        Err(error) => warn!(repo = %repo, branch = name, %error, "could not delete previous branch"),
    }

    platform.create_ref(repo, name, &head).await?;
    info!(repo = %repo, branch = name, %head, "migration branch created");

    Ok(head)
}

/// Delete `name` if a previous run left it behind. Never fails: a branch that
/// cannot be looked up or deleted is only logged.
pub async fn remove_branch(platform: &dyn Platform, repo: &RepoRef, name: &str) {
    match platform.get_branch_sha(repo, name).await {
        Ok(_) => {}
        Err(error) if error.is_not_found() => return,
        Err(error) => {
            warn!(repo = %repo, branch = name, %error, "could not look up leftover branch");
            return;
        }
    }

    match platform.delete_ref(repo, name).await {
        Ok(()) => info!(repo = %repo, branch = name, "deleted branch left by a previous run"),
        Err(error) if error.is_not_found() => debug!(repo = %repo, branch = name, "branch already gone"),
        Err(error) => warn!(repo = %repo, branch = name, %error, "could not delete leftover branch"),
    }
}
