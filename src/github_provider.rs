use std::sync::Mutex;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use octocrab::Octocrab;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{Credential, RepoRef};
use crate::error::{MigrationError, OperationContext, Result};
use crate::provider::{
    EncryptedSecret, Platform, RepoPermissions, RepoPublicKey, Repository, TreeEntry,
    WorkflowRun,
};
use crate::rate_limit::RateLimit;

const PER_PAGE: usize = 100;
const RUNS_PER_PAGE: usize = 20;

/// [`Platform`] backed by the GitHub REST API.
pub struct GithubProvider {
    octocrab: Octocrab,
    rate_limit: Mutex<Option<RateLimit>>,
}

impl GithubProvider {
    pub fn configure_provider(
        credential: &Credential,
        base_url: Option<&str>,
    ) -> std::result::Result<Self, octocrab::Error> {
        let mut builder = Octocrab::builder().personal_token(credential.expose().to_string());
        if let Some(url) = base_url {
            builder = builder.base_uri(url)?;
        }

        Ok(GithubProvider {
            octocrab: builder.build()?,
            rate_limit: Mutex::new(None),
        })
    }

    async fn send<B>(
        &self,
        verb: Verb,
        route: &str,
        body: Option<&B>,
        context: &OperationContext,
    ) -> Result<ApiResponse>
    where
        B: Serialize + ?Sized + Sync,
    {
        let response = match verb {
            Verb::Get => self.octocrab._get(route).await,
            Verb::Post => self.octocrab._post(route, body).await,
            Verb::Put => self.octocrab._put(route, body).await,
            Verb::Patch => self.octocrab._patch(route, body).await,
            Verb::Delete => self.octocrab._delete(route, body).await,
        }
        .map_err(|e| MigrationError::network(context.clone(), e.to_string()))?;

        let status = response.status().as_u16();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let oauth_scopes = header("x-oauth-scopes").as_deref().map(parse_scopes);
        let rate_limit = parse_rate_limit(
            header("x-ratelimit-limit").as_deref(),
            header("x-ratelimit-remaining").as_deref(),
            header("x-ratelimit-reset").as_deref(),
        );
        if let Some(rate_limit) = rate_limit {
            self.record_rate_limit(rate_limit);
        }
        let body = self
            .octocrab
            .body_to_string(response)
            .await
            .map_err(|e| MigrationError::network(context.clone(), e.to_string()))?;

        debug!(
            operation = context.operation,
            repo = %context.repo,
            status,
            "platform call"
        );

        Ok(ApiResponse {
            status,
            oauth_scopes,
            body,
        })
    }

    fn record_rate_limit(&self, rate_limit: RateLimit) {
        match self.rate_limit.lock() {
            Ok(mut slot) => *slot = Some(rate_limit),
            Err(_) => warn!("rate limit bookkeeping is unavailable"),
        }
    }

    async fn call<B>(
        &self,
        verb: Verb,
        route: &str,
        body: Option<&B>,
        context: &OperationContext,
    ) -> Result<ApiResponse>
    where
        B: Serialize + ?Sized + Sync,
    {
        let response = self.send(verb, route, body, context).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(response.into_error(context.clone()))
        }
    }

    async fn get(&self, route: &str, context: &OperationContext) -> Result<ApiResponse> {
        self.call::<()>(Verb::Get, route, None, context).await
    }

    async fn list_names<P: NamePage>(
        &self,
        route: &str,
        context: &OperationContext,
    ) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut page = 1;
        loop {
            let paged_route = format!(
                "{route}?per_page={per_page}&page={page}",
                route = route,
                per_page = PER_PAGE,
                page = page
            );
            let (total, items) = self
                .get(&paged_route, context)
                .await?
                .json::<P>(context)?
                .into_parts();

            let fetched = items.len();
            names.extend(items);
            if fetched < PER_PAGE || names.len() as u64 >= total {
                return Ok(names);
            }
            page += 1;
        }
    }
}

#[async_trait]
impl Platform for GithubProvider {
    async fn get_repository(&self, repo: &RepoRef) -> Result<Repository> {
        let context = OperationContext::new("get-repository", repo);
        let response = self.get(&repo_route(repo, ""), &context).await?;

        let payload: RepositoryPayload = response.json(&context)?;
        Ok(Repository {
            default_branch: payload.default_branch,
            html_url: payload.html_url,
            permissions: payload.permissions,
            oauth_scopes: response.oauth_scopes,
        })
    }

    async fn get_branch_sha(&self, repo: &RepoRef, branch: &str) -> Result<String> {
        let context =
            OperationContext::new("get-branch-ref", repo).with_resource(format!("heads/{branch}"));
        let route = repo_route(repo, &format!("/git/ref/heads/{branch}", branch = branch));

        let payload: RefPayload = self.get(&route, &context).await?.json(&context)?;
        Ok(payload.object.sha)
    }

    async fn create_ref(&self, repo: &RepoRef, branch: &str, sha: &str) -> Result<()> {
        let full_ref = format!("refs/heads/{branch}", branch = branch);
        let context = OperationContext::new("create-ref", repo).with_resource(full_ref.clone());
        let body = json!({ "ref": full_ref, "sha": sha });

        self.call(Verb::Post, &repo_route(repo, "/git/refs"), Some(&body), &context)
            .await
            .map(drop)
    }

    async fn delete_ref(&self, repo: &RepoRef, branch: &str) -> Result<()> {
        let context =
            OperationContext::new("delete-ref", repo).with_resource(format!("heads/{branch}"));
        let route = repo_route(repo, &format!("/git/refs/heads/{branch}", branch = branch));

        let response = self.send::<()>(Verb::Delete, &route, None, &context).await?;
        // A missing ref comes back as 422 "Reference does not exist".
        if response.status == 422 && response.body.contains("Reference does not exist") {
            return Err(MigrationError::NotFound { context });
        }
        if response.is_success() {
            Ok(())
        } else {
            Err(response.into_error(context))
        }
    }

    async fn update_ref(&self, repo: &RepoRef, branch: &str, sha: &str) -> Result<()> {
        let context =
            OperationContext::new("update-ref", repo).with_resource(format!("heads/{branch}"));
        let route = repo_route(repo, &format!("/git/refs/heads/{branch}", branch = branch));
        let body = json!({ "sha": sha, "force": false });

        self.call(Verb::Patch, &route, Some(&body), &context)
            .await
            .map(drop)
    }

    async fn get_public_key(&self, repo: &RepoRef) -> Result<RepoPublicKey> {
        let context = OperationContext::new("get-repo-public-key", repo);
        let route = repo_route(repo, "/actions/secrets/public-key");

        self.get(&route, &context).await?.json(&context)
    }

    async fn create_or_update_secret(
        &self,
        repo: &RepoRef,
        name: &str,
        secret: &EncryptedSecret,
    ) -> Result<()> {
        let context = OperationContext::new("create-or-update-secret", repo).with_resource(name);
        let route = repo_route(
            repo,
            &format!("/actions/secrets/{name}", name = urlencoding::encode(name)),
        );

        self.call(Verb::Put, &route, Some(secret), &context)
            .await
            .map(drop)
    }

    async fn list_secrets(&self, repo: &RepoRef) -> Result<Vec<String>> {
        let context = OperationContext::new("list-secrets", repo);

        self.list_names::<SecretPage>(&repo_route(repo, "/actions/secrets"), &context)
            .await
    }

    async fn delete_secret(&self, repo: &RepoRef, name: &str) -> Result<()> {
        let context = OperationContext::new("delete-secret", repo).with_resource(name);
        let route = repo_route(
            repo,
            &format!("/actions/secrets/{name}", name = urlencoding::encode(name)),
        );

        self.call::<()>(Verb::Delete, &route, None, &context)
            .await
            .map(drop)
    }

    async fn list_environments(&self, repo: &RepoRef) -> Result<Vec<String>> {
        let context = OperationContext::new("list-environments", repo);

        self.list_names::<EnvironmentPage>(&repo_route(repo, "/environments"), &context)
            .await
    }

    async fn create_environment(&self, repo: &RepoRef, name: &str) -> Result<()> {
        let context = OperationContext::new("create-environment", repo).with_resource(name);
        let route = repo_route(
            repo,
            &format!("/environments/{name}", name = urlencoding::encode(name)),
        );

        self.call::<()>(Verb::Put, &route, None, &context)
            .await
            .map(drop)
    }

    async fn list_environment_secrets(
        &self,
        repo: &RepoRef,
        environment: &str,
    ) -> Result<Vec<String>> {
        let context =
            OperationContext::new("list-environment-secrets", repo).with_resource(environment);
        let route = repo_route(
            repo,
            &format!(
                "/environments/{environment}/secrets",
                environment = urlencoding::encode(environment)
            ),
        );

        self.list_names::<SecretPage>(&route, &context).await
    }

    async fn create_blob(&self, repo: &RepoRef, content: &[u8]) -> Result<String> {
        let context = OperationContext::new("create-blob", repo);
        let body = json!({ "content": STANDARD.encode(content), "encoding": "base64" });

        let payload: ShaPayload = self
            .call(Verb::Post, &repo_route(repo, "/git/blobs"), Some(&body), &context)
            .await?
            .json(&context)?;
        Ok(payload.sha)
    }

    async fn get_commit_tree(&self, repo: &RepoRef, commit_sha: &str) -> Result<String> {
        let context = OperationContext::new("get-commit", repo).with_resource(commit_sha);
        let route = repo_route(repo, &format!("/git/commits/{sha}", sha = commit_sha));

        let payload: CommitPayload = self.get(&route, &context).await?.json(&context)?;
        Ok(payload.tree.sha)
    }

    async fn create_tree(
        &self,
        repo: &RepoRef,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> Result<String> {
        let context = OperationContext::new("create-tree", repo);
        let body = json!({ "base_tree": base_tree, "tree": entries });

        let payload: ShaPayload = self
            .call(Verb::Post, &repo_route(repo, "/git/trees"), Some(&body), &context)
            .await?
            .json(&context)?;
        Ok(payload.sha)
    }

    async fn create_commit(
        &self,
        repo: &RepoRef,
        message: &str,
        tree_sha: &str,
        parent_sha: &str,
    ) -> Result<String> {
        let context = OperationContext::new("create-commit", repo);
        let body = json!({ "message": message, "tree": tree_sha, "parents": [parent_sha] });

        let payload: ShaPayload = self
            .call(Verb::Post, &repo_route(repo, "/git/commits"), Some(&body), &context)
            .await?
            .json(&context)?;
        Ok(payload.sha)
    }

    async fn list_workflow_runs(&self, repo: &RepoRef, branch: &str) -> Result<Vec<WorkflowRun>> {
        let context = OperationContext::new("list-workflow-runs", repo).with_resource(branch);
        let route = repo_route(
            repo,
            &format!(
                "/actions/runs?branch={branch}&event=push&per_page={per_page}",
                branch = urlencoding::encode(branch),
                per_page = RUNS_PER_PAGE
            ),
        );

        let payload: WorkflowRunPage = self.get(&route, &context).await?.json(&context)?;
        Ok(payload.workflow_runs)
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit.lock().ok().and_then(|slot| *slot)
    }
}

#[derive(Clone, Copy, Debug)]
enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

struct ApiResponse {
    status: u16,
    oauth_scopes: Option<Vec<String>>,
    body: String,
}

impl ApiResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn json<T: DeserializeOwned>(&self, context: &OperationContext) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            MigrationError::network(context.clone(), format!("unexpected response body: {e}"))
        })
    }

    fn into_error(self, context: OperationContext) -> MigrationError {
        let message = serde_json::from_str::<ErrorPayload>(&self.body)
            .map(|payload| payload.message)
            .unwrap_or(self.body);
        MigrationError::from_status(context, self.status, message)
    }
}

fn repo_route(repo: &RepoRef, suffix: &str) -> String {
    format!(
        "/repos/{owner}/{repo}{suffix}",
        owner = repo.org,
        repo = repo.name,
        suffix = suffix
    )
}

fn parse_scopes(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(str::trim)
        .filter(|scope| !scope.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_rate_limit(
    limit: Option<&str>,
    remaining: Option<&str>,
    reset: Option<&str>,
) -> Option<RateLimit> {
    Some(RateLimit {
        limit: limit?.trim().parse().ok()?,
        remaining: remaining?.trim().parse().ok()?,
        reset: reset?.trim().parse().ok()?,
    })
}

trait NamePage: DeserializeOwned {
    fn into_parts(self) -> (u64, Vec<String>);
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
struct SecretPage {
    total_count: u64,
    #[serde(default)]
    secrets: Vec<Named>,
}

impl NamePage for SecretPage {
    fn into_parts(self) -> (u64, Vec<String>) {
        (
            self.total_count,
            self.secrets.into_iter().map(|s| s.name).collect(),
        )
    }
}

#[derive(Deserialize)]
struct EnvironmentPage {
    total_count: u64,
    #[serde(default)]
    environments: Vec<Named>,
}

impl NamePage for EnvironmentPage {
    fn into_parts(self) -> (u64, Vec<String>) {
        (
            self.total_count,
            self.environments.into_iter().map(|e| e.name).collect(),
        )
    }
}

#[derive(Deserialize)]
struct RepositoryPayload {
    default_branch: String,
    html_url: String,
    permissions: Option<RepoPermissions>,
}

#[derive(Deserialize)]
struct RefPayload {
    object: ShaPayload,
}

#[derive(Deserialize)]
struct ShaPayload {
    sha: String,
}

#[derive(Deserialize)]
struct CommitPayload {
    tree: ShaPayload,
}

#[derive(Deserialize)]
struct WorkflowRunPage {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    message: String,
}
