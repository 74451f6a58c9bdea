//! Checks that a credential can do what its side of the migration needs before
//! anything is written, so a run never stops half way for lack of a scope.

use tracing::{debug, info};

use crate::config::RepoRef;
use crate::error::{MigrationError, OperationContext, Result};
use crate::provider::{Platform, RepoPermissions, Repository};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Holds the secrets; receives the temporary credentials, branch and workflow file.
    Source,
    /// Receives secrets and environments.
    Target,
}

impl Role {
    /// Classic token scopes required for this role.
    pub fn required_scopes(self) -> &'static [&'static str] {
        match self {
            Role::Source => &["repo", "workflow"],
            Role::Target => &["repo"],
        }
    }

    fn missing_permission(self, permissions: &RepoPermissions) -> Option<&'static str> {
        match self {
            Role::Source if !permissions.admin => Some("admin"),
            Role::Source if !permissions.push => Some("push"),
            Role::Target if !permissions.admin => Some("admin"),
            _ => None,
        }
    }
}

/// Validate `role` against `repo`. Returns the repository on success so callers
/// don't fetch it twice.
pub async fn validate_credential(
    platform: &dyn Platform,
    repo: &RepoRef,
    role: Role,
) -> Result<Repository> {
    let context = OperationContext::new("validate-credential", repo);
    let repository = platform.get_repository(repo).await?;

    match &repository.oauth_scopes {
        Some(granted) => {
            debug!(?role, repo = %repo, scopes = ?granted, "checking token scopes");
            if let Some(missing) = role
                .required_scopes()
                .iter()
                .copied()
                .find(|required| !granted.iter().any(|scope| scope == required))
            {
                return Err(MigrationError::permission(
                    context,
                    format!("token is missing the `{missing}` scope"),
                ));
            }
        }
        None => {
            debug!(?role, repo = %repo, "no scope header, checking repository permissions");
            let permissions = repository.permissions.clone().unwrap_or_default();
            if let Some(missing) = role.missing_permission(&permissions) {
                return Err(MigrationError::permission(
                    context,
                    format!("token is missing `{missing}` permission on the repository"),
                ));
            }
        }
    }

    info!(?role, repo = %repo, "credential validated");
    Ok(repository)
}
