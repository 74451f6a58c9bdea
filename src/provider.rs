use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RepoRef;
use crate::error::Result;
use crate::rate_limit::RateLimit;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Repository {
    pub default_branch: String,
    pub html_url: String,
    /// What the authenticated account may do on this repository.
    pub permissions: Option<RepoPermissions>,
    /// Scopes granted to a classic token, from the `X-OAuth-Scopes` header.
    /// `None` when the platform sent no scope header (fine-grained tokens).
    pub oauth_scopes: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RepoPermissions {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub pull: bool,
}

/// Key the platform uses to open secret values stored on a repository.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RepoPublicKey {
    pub key_id: String,
    /// Base64 encoded.
    pub key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EncryptedSecret {
    /// Base64 encoded sealed box.
    pub encrypted_value: String,
    pub key_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: String,
}

impl TreeEntry {
    pub fn file(path: &str, blob_sha: &str) -> Self {
        TreeEntry {
            path: path.to_string(),
            mode: "100644".to_string(),
            kind: "blob".to_string(),
            sha: blob_sha.to_string(),
        }
    }
}

/// One Actions run, as listed for a branch.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub head_sha: String,
    pub html_url: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Repository, ref, secret, environment and git-data operations against one
/// account credential. Every failure carries the operation and repository it
/// belongs to.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn get_repository(&self, repo: &RepoRef) -> Result<Repository>;

    async fn get_branch_sha(&self, repo: &RepoRef, branch: &str) -> Result<String>;

    async fn create_ref(&self, repo: &RepoRef, branch: &str, sha: &str) -> Result<()>;

    async fn delete_ref(&self, repo: &RepoRef, branch: &str) -> Result<()>;

    async fn update_ref(&self, repo: &RepoRef, branch: &str, sha: &str) -> Result<()>;

    async fn get_public_key(&self, repo: &RepoRef) -> Result<RepoPublicKey>;

    async fn create_or_update_secret(
        &self,
        repo: &RepoRef,
        name: &str,
        secret: &EncryptedSecret,
    ) -> Result<()>;

    async fn list_secrets(&self, repo: &RepoRef) -> Result<Vec<String>>;

    async fn delete_secret(&self, repo: &RepoRef, name: &str) -> Result<()>;

    async fn list_environments(&self, repo: &RepoRef) -> Result<Vec<String>>;

    async fn create_environment(&self, repo: &RepoRef, name: &str) -> Result<()>;

    async fn list_environment_secrets(&self, repo: &RepoRef, environment: &str)
        -> Result<Vec<String>>;

    async fn create_blob(&self, repo: &RepoRef, content: &[u8]) -> Result<String>;

    /// Tree sha of a commit.
    async fn get_commit_tree(&self, repo: &RepoRef, commit_sha: &str) -> Result<String>;

    async fn create_tree(&self, repo: &RepoRef, base_tree: &str, entries: &[TreeEntry])
        -> Result<String>;

    async fn create_commit(
        &self,
        repo: &RepoRef,
        message: &str,
        tree_sha: &str,
        parent_sha: &str,
    ) -> Result<String>;

    /// Most recent runs triggered on `branch`, newest first.
    async fn list_workflow_runs(&self, repo: &RepoRef, branch: &str) -> Result<Vec<WorkflowRun>>;

    /// Window reported by the last response, if the platform reports one.
    fn rate_limit(&self) -> Option<RateLimit> {
        None
    }
}
