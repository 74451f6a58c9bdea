//! Renders the Actions workflow that performs the migration inside the source
//! repository.
//!
//! The workflow runs on push to the migration branch and has up to three kinds of
//! jobs:
//!
//! * `migrate-secrets`: creates the environments on the target, then forwards each
//!   repository secret with `gh secret set`, which seals the value with the target
//!   repository's public key before upload. A secret that fails is recorded and the
//!   rest are still attempted; the last step fails the job if any was recorded,
//! * `migrate-environment-N`: one per source environment holding secrets, running
//!   inside that environment so its secrets are visible,
//! * `cleanup`: always runs, deletes both temporary credentials and the branch, and
//!   fails the run when a credential could not be deleted.
//!
//! Names never get interpolated into scripts; they reach the shell through step
//! `env` entries.

use indexmap::IndexMap;
use serde::Serialize;

use crate::config::RepoRef;
use crate::names::{EnvironmentName, SecretName, SOURCE_CREDENTIAL, TARGET_CREDENTIAL};

pub const WORKFLOW_PATH: &str = ".github/workflows/migrate-secrets.yml";

const MIGRATE_JOB: &str = "migrate-secrets";
const CLEANUP_JOB: &str = "cleanup";
const RUNNER: &str = "ubuntu-latest";

/// Everything the workflow depends on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationPlan {
    pub target: RepoRef,
    pub branch: String,
    pub secrets: Vec<SecretName>,
    pub environments: Vec<EnvironmentName>,
    pub environment_secrets: IndexMap<EnvironmentName, Vec<SecretName>>,
}

impl MigrationPlan {
    /// Number of secrets the workflow will forward.
    pub fn secret_count(&self) -> usize {
        self.secrets.len() + self.environment_secrets.values().map(Vec::len).sum::<usize>()
    }
}

#[derive(Debug, Serialize)]
pub struct Workflow {
    name: String,
    on: Trigger,
    permissions: IndexMap<String, String>,
    jobs: IndexMap<String, Job>,
}

#[derive(Debug, Serialize)]
struct Trigger {
    push: PushTrigger,
}

#[derive(Debug, Serialize)]
struct PushTrigger {
    branches: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Job {
    #[serde(rename = "runs-on")]
    runs_on: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    needs: Vec<String>,
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    env: IndexMap<String, String>,
    steps: Vec<Step>,
}

#[derive(Debug, Serialize)]
struct Step {
    name: String,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    env: IndexMap<String, String>,
    shell: String,
    run: String,
}

impl Workflow {
    pub fn from_plan(plan: &MigrationPlan) -> Workflow {
        let mut jobs = IndexMap::new();

        let mut steps: Vec<Step> = plan.environments.iter().map(create_environment_step).collect();
        steps.extend(plan.secrets.iter().map(forward_repository_secret_step));
        if !plan.secrets.is_empty() {
            steps.push(report_failures_step());
        }
        if !steps.is_empty() {
            jobs.insert(MIGRATE_JOB.to_string(), Job::on_target(plan, steps));
        }

        for (index, (environment, secrets)) in plan.environment_secrets.iter().enumerate() {
            let mut steps: Vec<Step> = secrets.iter().map(forward_environment_secret_step).collect();
            steps.push(report_failures_step());
            let mut job = Job::on_target(plan, steps);
            if jobs.contains_key(MIGRATE_JOB) {
                job.needs.push(MIGRATE_JOB.to_string());
            }
            job.environment = Some(environment.to_string());
            job.env
                .insert("ENVIRONMENT_NAME".to_string(), environment.to_string());
            jobs.insert(format!("migrate-environment-{}", index + 1), job);
        }

        let needs = jobs.keys().cloned().collect();
        jobs.insert(CLEANUP_JOB.to_string(), cleanup_job(&plan.branch, needs));

        Workflow {
            name: "migrate-secrets".to_string(),
            on: Trigger {
                push: PushTrigger {
                    branches: vec![plan.branch.clone()],
                },
            },
            permissions: IndexMap::from([("contents".to_string(), "read".to_string())]),
            jobs,
        }
    }

    pub fn to_yaml(&self) -> String {
        let body = serde_yaml::to_string(self).expect("workflow model is always serializable");
        format!(
            "# Generated by secrets-migrator. The cleanup job deletes this branch when the run ends.\n{body}"
        )
    }
}

/// Render the workflow text for `plan`. Same plan, same text.
pub fn render(plan: &MigrationPlan) -> String {
    Workflow::from_plan(plan).to_yaml()
}

impl Job {
    fn on_target(plan: &MigrationPlan, steps: Vec<Step>) -> Job {
        Job {
            runs_on: RUNNER.to_string(),
            needs: Vec::new(),
            condition: None,
            environment: None,
            env: IndexMap::from([
                ("TARGET_ORG".to_string(), plan.target.org.clone()),
                ("TARGET_REPO".to_string(), plan.target.name.clone()),
                ("GH_TOKEN".to_string(), secret_expression(TARGET_CREDENTIAL)),
            ]),
            steps,
        }
    }
}

fn secret_expression(name: &str) -> String {
    format!("${{{{ secrets.{name} }}}}")
}

fn step(name: String, env: IndexMap<String, String>, run: &str) -> Step {
    Step {
        name,
        env,
        shell: "bash".to_string(),
        run: run.to_string(),
    }
}

const CREATE_ENVIRONMENT: &str = r#"if gh api --method PUT "repos/$TARGET_ORG/$TARGET_REPO/environments/$ENVIRONMENT_PATH" --silent 2> create-environment.err; then
  echo "Created environment '$ENVIRONMENT_NAME'"
elif grep -q "HTTP 409" create-environment.err; then
  echo "Environment '$ENVIRONMENT_NAME' already exists"
else
  cat create-environment.err >&2
  exit 1
fi
"#;

fn create_environment_step(environment: &EnvironmentName) -> Step {
    step(
        format!("Create environment {environment}"),
        IndexMap::from([
            ("ENVIRONMENT_NAME".to_string(), environment.to_string()),
            ("ENVIRONMENT_PATH".to_string(), environment.path_segment()),
        ]),
        CREATE_ENVIRONMENT,
    )
}

const FAILED_SECRETS: &str = "$RUNNER_TEMP/failed-secrets";

fn forward_step(secret: &SecretName, set_command: &str) -> Step {
    let run = format!(
        r#"if printf '%s' "$SECRET_VALUE" | {set_command}; then
  echo "Forwarded $SECRET_NAME"
else
  echo "::error::Could not forward $SECRET_NAME"
  echo "$SECRET_NAME" >> "{FAILED_SECRETS}"
fi
"#
    );
    step(
        format!("Forward {secret}"),
        IndexMap::from([
            ("SECRET_NAME".to_string(), secret.to_string()),
            ("SECRET_VALUE".to_string(), secret_expression(secret.as_str())),
        ]),
        &run,
    )
}

fn forward_repository_secret_step(secret: &SecretName) -> Step {
    forward_step(
        secret,
        r#"gh secret set "$SECRET_NAME" --repo "$TARGET_ORG/$TARGET_REPO""#,
    )
}

fn forward_environment_secret_step(secret: &SecretName) -> Step {
    forward_step(
        secret,
        r#"gh secret set "$SECRET_NAME" --env "$ENVIRONMENT_NAME" --repo "$TARGET_ORG/$TARGET_REPO""#,
    )
}

fn report_failures_step() -> Step {
    let run = format!(
        r#"if [ -s "{FAILED_SECRETS}" ]; then
  echo "::error::Secrets not migrated: $(paste -sd, "{FAILED_SECRETS}")"
  exit 1
fi
echo "Every secret was forwarded"
"#
    );
    step("Report forwarding failures".to_string(), IndexMap::new(), &run)
}

fn cleanup_job(branch: &str, needs: Vec<String>) -> Job {
    let run = format!(
        r#"cleanup_failed=0
for credential in {TARGET_CREDENTIAL} {SOURCE_CREDENTIAL}; do
  if gh secret delete "$credential" --repo "$GITHUB_REPOSITORY"; then
    echo "Deleted $credential"
  else
    echo "::error::Could not delete $credential from $GITHUB_REPOSITORY, delete it manually"
    cleanup_failed=1
  fi
done
if ! gh api --method DELETE "repos/$GITHUB_REPOSITORY/git/refs/heads/$MIGRATION_BRANCH" --silent; then
  echo "::warning::Could not delete branch $MIGRATION_BRANCH"
fi
exit "$cleanup_failed"
"#
    );

    Job {
        runs_on: RUNNER.to_string(),
        needs,
        condition: Some("always()".to_string()),
        environment: None,
        env: IndexMap::new(),
        steps: vec![step(
            "Remove temporary credentials and migration branch".to_string(),
            IndexMap::from([
                ("GH_TOKEN".to_string(), secret_expression(SOURCE_CREDENTIAL)),
                ("MIGRATION_BRANCH".to_string(), branch.to_string()),
            ]),
            &run,
        )],
    }
}
