//! Drives one migration from credential checks to the published workflow.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use indexmap::IndexMap;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::branch::{self, MIGRATION_BRANCH};
use crate::config::MigrationConfig;
use crate::environments;
use crate::error::{MigrationError, OperationContext, Result};
use crate::names::{self, EnvironmentName, SecretName, SOURCE_CREDENTIAL, TARGET_CREDENTIAL};
use crate::provider::{EncryptedSecret, Platform, Repository};
use crate::publish::{self, FileCommit};
use crate::rate_limit;
use crate::sealed_box;
use crate::scopes::{self, Role};
use crate::workflow::{self, MigrationPlan, WORKFLOW_PATH};

const COMMIT_MESSAGE: &str = "Add secrets migration workflow";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationState {
    Idle,
    ValidatingCredentials,
    Discovering,
    Preparing,
    Publishing,
    Completed,
    Failed,
}

impl MigrationState {
    fn as_str(self) -> &'static str {
        match self {
            MigrationState::Idle => "idle",
            MigrationState::ValidatingCredentials => "validating-credentials",
            MigrationState::Discovering => "discovering",
            MigrationState::Preparing => "preparing",
            MigrationState::Publishing => "publishing",
            MigrationState::Completed => "completed",
            MigrationState::Failed => "failed",
        }
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// No migratable secret was found; nothing was written.
    NothingToMigrate,
    /// The workflow is on the migration branch and the remote run has been triggered.
    Published {
        dashboard_url: String,
        /// The triggered run itself, when it showed up in time.
        run_url: Option<String>,
        commit_sha: String,
        plan: MigrationPlan,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationReport {
    pub outcome: Outcome,
    /// Every state entered, in order, ending with `Completed`.
    pub states: Vec<MigrationState>,
}

/// A failed run: the state it was in and why it stopped. Nothing is rolled back.
#[derive(Debug, Error)]
#[error("migration failed while {stage}: {error}")]
pub struct MigrationFailure {
    pub stage: MigrationState,
    #[source]
    pub error: MigrationError,
}

impl MigrationFailure {
    /// Whether the temporary credentials may still be stored on the source.
    /// Running the migration again reclaims them.
    pub fn may_leave_credentials(&self) -> bool {
        matches!(
            self.stage,
            MigrationState::Preparing | MigrationState::Publishing
        )
    }
}

struct Discovery {
    secrets: Vec<SecretName>,
    environments: Vec<EnvironmentName>,
    environment_secrets: IndexMap<EnvironmentName, Vec<SecretName>>,
    leftovers: Vec<String>,
}

impl Discovery {
    fn is_empty(&self) -> bool {
        self.secrets.is_empty() && self.environment_secrets.is_empty()
    }
}

pub struct Migrator<'c, P: Platform> {
    config: &'c MigrationConfig,
    source: P,
    target: P,
    state: MigrationState,
    visited: Vec<MigrationState>,
}

impl<'c, P: Platform> Migrator<'c, P> {
    /// `source` must be authenticated with the source credential and `target`
    /// with the target credential.
    pub fn new(config: &'c MigrationConfig, source: P, target: P) -> Self {
        Migrator {
            config,
            source,
            target,
            state: MigrationState::Idle,
            visited: vec![MigrationState::Idle],
        }
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    pub fn source(&self) -> &P {
        &self.source
    }

    pub fn target(&self) -> &P {
        &self.target
    }

    pub async fn run(
        &mut self,
        cancel: &CancellationToken,
    ) -> std::result::Result<MigrationReport, MigrationFailure> {
        self.state = MigrationState::Idle;
        self.visited = vec![MigrationState::Idle];

        self.transition(MigrationState::ValidatingCredentials);
        let repository = cancellable(cancel, self.stage_context(), self.validate())
            .await
            .map_err(|error| self.fail(error))?;
        self.check_rate_limits("validated");

        self.transition(MigrationState::Discovering);
        let discovery = cancellable(cancel, self.stage_context(), self.discover())
            .await
            .map_err(|error| self.fail(error))?;
        self.check_rate_limits("discovered");
        if discovery.is_empty() {
            info!(repo = %self.config.source, "no secrets to migrate");
            cancellable(cancel, self.stage_context(), self.reclaim(&discovery.leftovers))
                .await
                .map_err(|error| self.fail(error))?;
            self.transition(MigrationState::Completed);
            return Ok(self.report(Outcome::NothingToMigrate));
        }
        let plan = MigrationPlan {
            target: self.config.target.clone(),
            branch: MIGRATION_BRANCH.to_string(),
            secrets: discovery.secrets,
            environments: discovery.environments,
            environment_secrets: discovery.environment_secrets,
        };

        self.transition(MigrationState::Preparing);
        let head = cancellable(cancel, self.stage_context(), self.prepare(&plan))
            .await
            .map_err(|error| self.fail(error))?;
        self.check_rate_limits("prepared");

        self.transition(MigrationState::Publishing);
        let commit_sha = cancellable(cancel, self.stage_context(), self.publish(&plan, &head))
            .await
            .map_err(|error| self.fail(error))?;
        let dashboard_url = dashboard_url(&repository);
        info!(
            commit = %commit_sha,
            secrets = plan.secret_count(),
            %dashboard_url,
            "migration workflow published"
        );
        // The workflow is already pushed, so cancelling here only gives up the lookup.
        let run_url = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            found = self.find_run(&commit_sha) => found,
        };
        match &run_url {
            Some(url) => info!(run = %url, "migration run started"),
            None => debug!("migration run not found, falling back to the actions page"),
        }

        self.transition(MigrationState::Completed);
        Ok(self.report(Outcome::Published {
            dashboard_url,
            run_url,
            commit_sha,
            plan,
        }))
    }

    /// Source first, then target. Returns the source repository.
    async fn validate(&self) -> Result<Repository> {
        let repository =
            scopes::validate_credential(&self.source, &self.config.source, Role::Source).await?;
        scopes::validate_credential(&self.target, &self.config.target, Role::Target).await?;
        Ok(repository)
    }

    async fn discover(&self) -> Result<Discovery> {
        let listed = self.source.list_secrets(&self.config.source).await?;
        let leftovers: Vec<String> = listed
            .iter()
            .filter(|name| names::TEMPORARY_CREDENTIALS.contains(&name.as_str()))
            .cloned()
            .collect();
        for leftover in &leftovers {
            warn!(secret = %leftover, repo = %self.config.source, "temporary credential left by a previous run");
        }

        let secrets: Vec<SecretName> = listed
            .iter()
            .filter(|name| self.is_migratable(name))
            .filter_map(|name| {
                let parsed = SecretName::parse(name);
                if parsed.is_none() {
                    warn!(secret = %name, "skipping secret with an unusable name");
                }
                parsed
            })
            .collect();

        let (environments, environment_secrets) = if self.config.skip_environments {
            debug!("environments skipped");
            (Vec::new(), IndexMap::new())
        } else {
            let found = environments::list_environments(&self.source, &self.config.source).await;
            let mut discovered = IndexMap::new();
            for environment in &found {
                let secrets = environments::list_environment_secrets(
                    &self.source,
                    &self.config.source,
                    environment,
                )
                .await;
                discovered.insert(environment.clone(), secrets);
            }
            let environment_secrets =
                environments::migratable_environment_secrets(discovered, |name| {
                    self.is_migratable(name)
                });
            (found, environment_secrets)
        };

        info!(
            secrets = secrets.len(),
            environments = environments.len(),
            environment_secrets = environment_secrets.values().map(Vec::len).sum::<usize>(),
            "discovery finished"
        );
        Ok(Discovery {
            secrets,
            environments,
            environment_secrets,
            leftovers,
        })
    }

    fn is_migratable(&self, name: &str) -> bool {
        if names::is_reserved(name) {
            return false;
        }
        if self.config.is_excluded(name) {
            debug!(secret = %name, "excluded by pattern");
            return false;
        }
        true
    }

    /// Delete credentials and the branch a previous run left on the source.
    /// Nothing else will.
    async fn reclaim(&self, leftovers: &[String]) -> Result<()> {
        branch::remove_branch(&self.source, &self.config.source, MIGRATION_BRANCH).await;
        for name in leftovers {
            match self.source.delete_secret(&self.config.source, name).await {
                Ok(()) => info!(secret = %name, repo = %self.config.source, "deleted leftover credential"),
                Err(error) if error.is_not_found() => {
                    debug!(secret = %name, "leftover credential already gone")
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    /// Replicate environments, store both temporary credentials and ensure the
    /// branch. Returns the branch head.
    async fn prepare(&self, plan: &MigrationPlan) -> Result<String> {
        environments::replicate(&self.target, &self.config.target, &plan.environments).await?;

        let key = self.source.get_public_key(&self.config.source).await?;
        let credentials = [
            (TARGET_CREDENTIAL, &self.config.target_credential),
            (SOURCE_CREDENTIAL, &self.config.source_credential),
        ];
        for (name, credential) in credentials {
            let secret = EncryptedSecret {
                encrypted_value: sealed_box::seal_base64(&key.key, credential.expose().as_bytes())?,
                key_id: key.key_id.clone(),
            };
            self.source
                .create_or_update_secret(&self.config.source, name, &secret)
                .await?;
            info!(secret = name, repo = %self.config.source, "temporary credential stored");
        }

        branch::ensure_branch(&self.source, &self.config.source, MIGRATION_BRANCH).await
    }

    async fn publish(&self, plan: &MigrationPlan, head: &str) -> Result<String> {
        self.wait_for_rate_limit().await;
        let definition = workflow::render(plan);
        publish::commit_file(
            &self.source,
            &self.config.source,
            &FileCommit {
                branch: MIGRATION_BRANCH,
                parent_sha: head,
                path: WORKFLOW_PATH,
                content: &definition,
                message: COMMIT_MESSAGE,
            },
        )
        .await
    }

    fn rate_limits(&self) -> [(&'static str, Option<rate_limit::RateLimit>); 2] {
        [
            ("source", self.source.rate_limit()),
            ("target", self.target.rate_limit()),
        ]
    }

    fn check_rate_limits(&self, checkpoint: &str) {
        rate_limit::check(checkpoint, &self.rate_limits(), rate_limit::unix_now());
    }

    /// Hold the commit back while either client is close to exhausting its
    /// window, so the push that starts the run does not fail halfway.
    async fn wait_for_rate_limit(&self) {
        let Some(pause) = rate_limit::pause_before_writes(&self.rate_limits(), rate_limit::unix_now())
        else {
            return;
        };
        warn!(?pause, "rate limit critically low, waiting for the window to reset");
        tokio::time::sleep(pause).await;
        info!("rate limit window reset, resuming");
    }

    /// Look up the run the push started. Any failure only means no link.
    async fn find_run(&self, commit_sha: &str) -> Option<String> {
        let lookup = self.config.run_lookup;
        for attempt in 1..=lookup.attempts {
            let delay = if attempt == 1 {
                lookup.first_delay
            } else {
                lookup.delay
            };
            tokio::time::sleep(delay).await;

            match self
                .source
                .list_workflow_runs(&self.config.source, MIGRATION_BRANCH)
                .await
            {
                Ok(runs) => {
                    if let Some(run) = runs.into_iter().find(|run| run.head_sha == commit_sha) {
                        debug!(run = run.id, attempt, "found migration run");
                        return Some(run.html_url);
                    }
                    debug!(attempt, attempts = lookup.attempts, "migration run not listed yet");
                }
                Err(error) => debug!(attempt, %error, "could not list workflow runs"),
            }
        }
        None
    }

    fn transition(&mut self, next: MigrationState) {
        debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
        self.visited.push(next);
    }

    fn fail(&mut self, error: MigrationError) -> MigrationFailure {
        let stage = self.state;
        match error.context() {
            Some(context) => warn!(
                %stage,
                operation = context.operation,
                repo = %context.repo,
                %error,
                "migration failed"
            ),
            None => warn!(%stage, %error, "migration failed"),
        }
        self.transition(MigrationState::Failed);

        let failure = MigrationFailure { stage, error };
        if failure.may_leave_credentials() {
            warn!(
                credentials = ?names::TEMPORARY_CREDENTIALS,
                repo = %self.config.source,
                "temporary credentials may remain on the source repository, running the migration again removes them"
            );
        }
        failure
    }

    fn stage_context(&self) -> OperationContext {
        OperationContext::new(self.state.as_str(), &self.config.source)
    }

    fn report(&self, outcome: Outcome) -> MigrationReport {
        MigrationReport {
            outcome,
            states: self.visited.clone(),
        }
    }
}

/// Await `work` unless `cancel` fires first, in which case `work` is dropped
/// mid-flight.
async fn cancellable<T>(
    cancel: &CancellationToken,
    context: OperationContext,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MigrationError::Cancelled { context }),
        result = work => result,
    }
}

/// Cancel `cancel` once `timeout` has elapsed, unless it is cancelled first.
pub fn cancel_after(cancel: &CancellationToken, timeout: Duration) -> JoinHandle<()> {
    let deadline = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = deadline.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                warn!(?timeout, "deadline reached, cancelling");
                deadline.cancel();
            }
        }
    })
}

/// Actions page of `repository` filtered to runs of the migration branch.
pub fn dashboard_url(repository: &Repository) -> String {
    format!(
        "{}/actions?query=branch%3A{}",
        repository.html_url.trim_end_matches('/'),
        MIGRATION_BRANCH
    )
}
