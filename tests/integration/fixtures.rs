use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypto_box::{aead::OsRng, SecretKey};
use std::time::Duration;

use secrets_migrator::{Credential, MigrationConfig, RepoRef, RunLookup};
use serde_json::{json, Value};

pub const HEAD_SHA: &str = "aa218f56b14c9653891f9e74264a383fa43fefbd";
pub const BLOB_SHA: &str = "3a0f86fb8db8eea7ccbb9a95f325ddbedfb25e15";
pub const BASE_TREE_SHA: &str = "691272480426f78a0138979dd3ce63b77f706feb";
pub const TREE_SHA: &str = "cd8274d15fa3ae2ab983129fb037999f264ba9a7";
pub const COMMIT_SHA: &str = "7638417db6d59f3c431d3e1f261cc637155684cd";
pub const KEY_ID: &str = "568250167242549743";

pub fn source() -> RepoRef {
    RepoRef::new("old-org", "billing")
}

pub fn target() -> RepoRef {
    RepoRef::new("new-org", "billing")
}

pub fn config() -> MigrationConfig {
    let mut config = MigrationConfig::new(
        source(),
        target(),
        Credential::new("ghp_source_token"),
        Credential::new("ghp_target_token"),
    );
    config.run_lookup = RunLookup {
        attempts: 1,
        first_delay: Duration::ZERO,
        delay: Duration::ZERO,
    };
    config
}

/// A repository key pair, with the public half base64 encoded as the API returns it.
pub fn repository_key() -> (SecretKey, String) {
    let secret_key = SecretKey::generate(&mut OsRng);
    let public = STANDARD.encode(secret_key.public_key().as_bytes());
    (secret_key, public)
}

pub fn repository_json(repo: &RepoRef) -> Value {
    json!({
        "id": 1296269,
        "name": repo.name,
        "full_name": format!("{}/{}", repo.org, repo.name),
        "private": true,
        "html_url": format!("https://github.com/{}/{}", repo.org, repo.name),
        "default_branch": "main",
        "permissions": { "admin": true, "push": true, "pull": true }
    })
}

pub fn ref_json(branch: &str, sha: &str) -> Value {
    json!({
        "ref": format!("refs/heads/{branch}"),
        "object": { "type": "commit", "sha": sha }
    })
}

pub fn secrets_page_json(names: &[&str], total: usize) -> Value {
    let secrets: Vec<Value> = names
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "created_at": "2024-01-10T14:59:22Z",
                "updated_at": "2024-01-11T11:48:11Z"
            })
        })
        .collect();

    json!({ "total_count": total, "secrets": secrets })
}

pub fn environments_page_json(names: &[&str]) -> Value {
    let environments: Vec<Value> = names
        .iter()
        .enumerate()
        .map(|(id, name)| json!({ "id": id + 1, "name": name }))
        .collect();

    json!({ "total_count": names.len(), "environments": environments })
}

pub fn workflow_runs_json(repo: &RepoRef, runs: &[(u64, &str)]) -> Value {
    let workflow_runs: Vec<Value> = runs
        .iter()
        .map(|(id, head_sha)| {
            json!({
                "id": id,
                "name": "migrate-secrets",
                "head_branch": "migrate-secrets",
                "head_sha": head_sha,
                "event": "push",
                "status": "queued",
                "html_url": format!("https://github.com/{}/{}/actions/runs/{id}", repo.org, repo.name)
            })
        })
        .collect();

    json!({ "total_count": runs.len(), "workflow_runs": workflow_runs })
}

pub fn error_json(message: &str) -> Value {
    json!({
        "message": message,
        "documentation_url": "https://docs.github.com/rest"
    })
}
