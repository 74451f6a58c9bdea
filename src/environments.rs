use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::config::RepoRef;
use crate::error::Result;
use crate::names::{EnvironmentName, SecretName};
use crate::provider::Platform;

/// Environments of `repo`, in platform order.
///
/// Never fails: environments are an enhancement to the migration, not a
/// precondition, so any error is logged and yields an empty list.
pub async fn list_environments(platform: &dyn Platform, repo: &RepoRef) -> Vec<EnvironmentName> {
    match platform.list_environments(repo).await {
        Ok(names) => names
            .iter()
            .filter_map(|name| {
                let parsed = EnvironmentName::parse(name);
                if parsed.is_none() {
                    warn!(environment = %name, "skipping environment with an unusable name");
                }
                parsed
            })
            .collect(),
        Err(error) => {
            warn!(repo = %repo, %error, "could not list environments, continuing without them");
            Vec::new()
        }
    }
}

/// Secret names stored in one environment. Empty on any failure.
pub async fn list_environment_secrets(
    platform: &dyn Platform,
    repo: &RepoRef,
    environment: &EnvironmentName,
) -> Vec<String> {
    match platform
        .list_environment_secrets(repo, environment.as_str())
        .await
    {
        Ok(names) => names,
        Err(error) => {
            warn!(repo = %repo, %environment, %error, "could not list environment secrets");
            Vec::new()
        }
    }
}

/// Create `name` on `repo`. An environment that already exists counts as created.
pub async fn create_environment(
    platform: &dyn Platform,
    repo: &RepoRef,
    name: &EnvironmentName,
) -> Result<()> {
    match platform.create_environment(repo, name.as_str()).await {
        Ok(()) => {
            debug!(repo = %repo, environment = %name, "environment created");
            Ok(())
        }
        Err(error) if error.is_conflict() => {
            debug!(repo = %repo, environment = %name, "environment already exists");
            Ok(())
        }
        Err(error) => Err(error),
    }
}

/// Re-create every environment in `environments` on `target`, in order.
pub async fn replicate(
    target: &dyn Platform,
    target_repo: &RepoRef,
    environments: &[EnvironmentName],
) -> Result<()> {
    for environment in environments {
        create_environment(target, target_repo, environment).await?;
    }
    if !environments.is_empty() {
        info!(count = environments.len(), repo = %target_repo, "environments replicated");
    }
    Ok(())
}

/// Keep the migratable secrets of each environment, dropping environments left
/// with none.
pub fn migratable_environment_secrets(
    discovered: IndexMap<EnvironmentName, Vec<String>>,
    keep: impl Fn(&str) -> bool,
) -> IndexMap<EnvironmentName, Vec<SecretName>> {
    discovered
        .into_iter()
        .filter_map(|(environment, names)| {
            let secrets: Vec<SecretName> = names
                .iter()
                .filter(|name| keep(name))
                .filter_map(|name| SecretName::parse(name))
                .collect();
            if secrets.is_empty() {
                None
            } else {
                Some((environment, secrets))
            }
        })
        .collect()
}
