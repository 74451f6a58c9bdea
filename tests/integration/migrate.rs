use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypto_box::SecretKey;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use secrets_migrator::github_provider::GithubProvider;
use secrets_migrator::migrator::cancel_after;
use secrets_migrator::names::{SOURCE_CREDENTIAL, TARGET_CREDENTIAL};
use secrets_migrator::workflow::WORKFLOW_PATH;
use secrets_migrator::{MigrationConfig, MigrationError, MigrationState, Migrator, Outcome};

use crate::fixtures::{self, BASE_TREE_SHA, COMMIT_SHA, HEAD_SHA, KEY_ID};
use crate::mocks::github::*;

const BRANCH: &str = "migrate-secrets";

fn migrator<'c>(config: &'c MigrationConfig, server: &MockServer) -> Migrator<'c, GithubProvider> {
    let uri = server.uri();
    let source =
        GithubProvider::configure_provider(&config.source_credential, Some(uri.as_str())).unwrap();
    let target =
        GithubProvider::configure_provider(&config.target_credential, Some(uri.as_str())).unwrap();
    Migrator::new(config, source, target)
}

/// Everything a run that reaches `Completed` through publishing touches.
/// Returns the private half of the source repository key.
async fn mount_happy_path(server: &MockServer, secrets: &[&str]) -> SecretKey {
    let source = fixtures::source();
    let target = fixtures::target();
    let (secret_key, public_key) = fixtures::repository_key();

    get_repository_mock(&source, Some("repo, workflow"))
        .mount(server)
        .await;
    get_repository_mock(&target, Some("repo")).mount(server).await;
    list_secrets_mock(&source, secrets).mount(server).await;
    public_key_mock(&source, KEY_ID, &public_key)
        .expect(1)
        .mount(server)
        .await;
    put_secret_mock(&source, TARGET_CREDENTIAL)
        .expect(1)
        .mount(server)
        .await;
    put_secret_mock(&source, SOURCE_CREDENTIAL)
        .expect(1)
        .mount(server)
        .await;
    get_branch_mock(&source, "main", HEAD_SHA).mount(server).await;
    delete_ref_mock(&source, BRANCH, 422).mount(server).await;
    create_ref_mock(&source, BRANCH, HEAD_SHA)
        .expect(1)
        .mount(server)
        .await;
    for mock in git_data_mocks(&source, HEAD_SHA) {
        mock.mount(server).await;
    }
    update_ref_mock(&source, BRANCH, COMMIT_SHA)
        .expect(1)
        .mount(server)
        .await;

    secret_key
}

fn find<'r>(requests: &'r [Request], verb: &str, suffix: &str) -> (usize, &'r Request) {
    requests
        .iter()
        .enumerate()
        .find(|(_, request)| request.method.as_str() == verb && request.url.path().ends_with(suffix))
        .unwrap_or_else(|| panic!("no {verb} request to *{suffix}"))
}

fn json_body(request: &Request) -> Value {
    serde_json::from_slice(&request.body).unwrap()
}

fn open_secret(secret_key: &SecretKey, request: &Request) -> Vec<u8> {
    let body = json_body(request);
    assert_eq!(body["key_id"], KEY_ID);
    let sealed = STANDARD
        .decode(body["encrypted_value"].as_str().unwrap())
        .unwrap();
    secret_key.unseal(&sealed).unwrap()
}

mod migrate {

    use super::*;

    #[tokio::test]
    async fn publishes_workflow_for_repository_secrets() {
        let mock_server = MockServer::start().await;
        let secret_key = mount_happy_path(&mock_server, &["API_KEY", "DB_URL"]).await;
        list_environments_mock(&fixtures::source(), &[])
            .mount(&mock_server)
            .await;
        let config = fixtures::config();

        let report = migrator(&config, &mock_server)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.states.last(), Some(&MigrationState::Completed));
        match &report.outcome {
            Outcome::Published {
                dashboard_url,
                commit_sha,
                ..
            } => {
                assert_eq!(commit_sha, COMMIT_SHA);
                assert_eq!(
                    dashboard_url,
                    "https://github.com/old-org/billing/actions?query=branch%3Amigrate-secrets"
                );
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let requests = mock_server.received_requests().await.unwrap();

        let (target_credential_at, target_credential) = find(
            &requests,
            "PUT",
            "/actions/secrets/SECRETS_MIGRATOR_TARGET_PAT",
        );
        let (_, source_credential) = find(
            &requests,
            "PUT",
            "/actions/secrets/SECRETS_MIGRATOR_SOURCE_PAT",
        );
        assert_eq!(open_secret(&secret_key, target_credential), b"ghp_target_token");
        assert_eq!(open_secret(&secret_key, source_credential), b"ghp_source_token");

        let (branch_at, create_ref) = find(&requests, "POST", "/git/refs");
        assert!(target_credential_at < branch_at);
        let create_ref = json_body(create_ref);
        assert_eq!(create_ref["ref"], "refs/heads/migrate-secrets");
        assert_eq!(create_ref["sha"], HEAD_SHA);

        let (blob_at, blob) = find(&requests, "POST", "/git/blobs");
        assert!(branch_at < blob_at);
        let blob = json_body(blob);
        assert_eq!(blob["encoding"], "base64");
        let definition = String::from_utf8(
            STANDARD
                .decode(blob["content"].as_str().unwrap())
                .unwrap(),
        )
        .unwrap();
        assert!(definition.contains("${{ secrets.API_KEY }}"));
        assert!(definition.contains("${{ secrets.DB_URL }}"));
        assert!(!definition.contains("ghp_"));

        let tree = json_body(find(&requests, "POST", "/git/trees").1);
        assert_eq!(tree["base_tree"], BASE_TREE_SHA);
        assert_eq!(tree["tree"][0]["path"], WORKFLOW_PATH);

        let commit = json_body(find(&requests, "POST", "/git/commits").1);
        assert_eq!(commit["parents"][0], HEAD_SHA);

        let update = json_body(find(&requests, "PATCH", "/git/refs/heads/migrate-secrets").1);
        assert_eq!(update["sha"], COMMIT_SHA);
    }

    #[tokio::test]
    async fn only_reserved_secrets_writes_nothing() {
        let mock_server = MockServer::start().await;
        let source = fixtures::source();
        get_repository_mock(&source, Some("repo, workflow"))
            .mount(&mock_server)
            .await;
        get_repository_mock(&fixtures::target(), Some("repo"))
            .mount(&mock_server)
            .await;
        list_secrets_mock(&source, &["SECRETS_MIGRATOR_NOTE", "GITHUB_TOKEN"])
            .mount(&mock_server)
            .await;
        list_environments_mock(&source, &[])
            .mount(&mock_server)
            .await;
        for mock in no_writes_mocks() {
            mock.mount(&mock_server).await;
        }
        let config = fixtures::config();

        let report = migrator(&config, &mock_server)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::NothingToMigrate);
        assert_eq!(report.states.last(), Some(&MigrationState::Completed));
    }

    #[tokio::test]
    async fn leftover_credential_is_deleted_when_nothing_to_migrate() {
        let mock_server = MockServer::start().await;
        let source = fixtures::source();
        get_repository_mock(&source, Some("repo, workflow"))
            .mount(&mock_server)
            .await;
        get_repository_mock(&fixtures::target(), Some("repo"))
            .mount(&mock_server)
            .await;
        list_secrets_mock(&source, &[TARGET_CREDENTIAL])
            .mount(&mock_server)
            .await;
        list_environments_mock(&source, &[])
            .mount(&mock_server)
            .await;
        delete_secret_mock(&source, TARGET_CREDENTIAL)
            .expect(1)
            .mount(&mock_server)
            .await;
        let config = fixtures::config();

        let report = migrator(&config, &mock_server)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::NothingToMigrate);
    }

    #[tokio::test]
    async fn existing_target_environment_still_completes() {
        let mock_server = MockServer::start().await;
        let source = fixtures::source();
        mount_happy_path(&mock_server, &["API_KEY"]).await;
        list_environments_mock(&source, &["prod"])
            .mount(&mock_server)
            .await;
        list_environment_secrets_mock(&source, "prod", &["DB_PASS"])
            .mount(&mock_server)
            .await;
        create_environment_mock(&fixtures::target(), "prod", 409)
            .expect(1)
            .mount(&mock_server)
            .await;
        let config = fixtures::config();

        let report = migrator(&config, &mock_server)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.states.last(), Some(&MigrationState::Completed));
        match report.outcome {
            Outcome::Published { plan, .. } => {
                assert_eq!(plan.environments.len(), 1);
                assert_eq!(plan.secret_count(), 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_workflow_scope_fails_before_any_write() {
        let mock_server = MockServer::start().await;
        get_repository_mock(&fixtures::source(), Some("repo"))
            .expect(1)
            .mount(&mock_server)
            .await;
        get_repository_mock(&fixtures::target(), Some("repo"))
            .expect(0)
            .mount(&mock_server)
            .await;
        for mock in no_writes_mocks() {
            mock.mount(&mock_server).await;
        }
        let config = fixtures::config();
        let mut migrator = migrator(&config, &mock_server);

        let failure = migrator.run(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(failure.stage, MigrationState::ValidatingCredentials);
        assert_eq!(migrator.state(), MigrationState::Failed);
        assert!(matches!(failure.error, MigrationError::Permission { .. }));
        assert!(failure.error.to_string().contains("`workflow`"));
    }

    #[tokio::test]
    async fn revoked_target_token_is_an_auth_failure() {
        let mock_server = MockServer::start().await;
        get_repository_mock(&fixtures::source(), Some("repo, workflow"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/new-org/billing"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(fixtures::error_json("Bad credentials")),
            )
            .mount(&mock_server)
            .await;
        for mock in no_writes_mocks() {
            mock.mount(&mock_server).await;
        }
        let config = fixtures::config();

        let failure = migrator(&config, &mock_server)
            .run(&CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.stage, MigrationState::ValidatingCredentials);
        match failure.error {
            MigrationError::Auth { context, message } => {
                assert_eq!(context.repo, fixtures::target());
                assert_eq!(message, "Bad credentials");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn triggered_run_is_linked() {
        let mock_server = MockServer::start().await;
        let source = fixtures::source();
        mount_happy_path(&mock_server, &["API_KEY"]).await;
        list_environments_mock(&source, &[])
            .mount(&mock_server)
            .await;
        workflow_runs_mock(&source, BRANCH, &[(30433642, COMMIT_SHA), (30433001, HEAD_SHA)])
            .expect(1)
            .mount(&mock_server)
            .await;
        let config = fixtures::config();

        let report = migrator(&config, &mock_server)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        match report.outcome {
            Outcome::Published { run_url, .. } => assert_eq!(
                run_url.as_deref(),
                Some("https://github.com/old-org/billing/actions/runs/30433642")
            ),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn leftover_branch_is_deleted_when_nothing_to_migrate() {
        let mock_server = MockServer::start().await;
        let source = fixtures::source();
        get_repository_mock(&source, Some("repo, workflow"))
            .mount(&mock_server)
            .await;
        get_repository_mock(&fixtures::target(), Some("repo"))
            .mount(&mock_server)
            .await;
        list_secrets_mock(&source, &[]).mount(&mock_server).await;
        list_environments_mock(&source, &[])
            .mount(&mock_server)
            .await;
        get_branch_mock(&source, BRANCH, HEAD_SHA)
            .mount(&mock_server)
            .await;
        delete_ref_mock(&source, BRANCH, 204)
            .expect(1)
            .mount(&mock_server)
            .await;
        let config = fixtures::config();

        let report = migrator(&config, &mock_server)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::NothingToMigrate);
    }

    #[tokio::test]
    async fn deadline_cancels_request_in_flight() {
        let mock_server = MockServer::start().await;
        let source = fixtures::source();
        Mock::given(method("GET"))
            .and(path("/repos/old-org/billing"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(fixtures::repository_json(&source))
                    .insert_header("x-oauth-scopes", "repo, workflow")
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&mock_server)
            .await;
        for mock in no_writes_mocks() {
            mock.mount(&mock_server).await;
        }
        let config = fixtures::config();
        let cancel = CancellationToken::new();
        cancel_after(&cancel, Duration::from_millis(300));
        let started = Instant::now();

        let failure = migrator(&config, &mock_server)
            .run(&cancel)
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(failure.stage, MigrationState::ValidatingCredentials);
        assert!(matches!(failure.error, MigrationError::Cancelled { .. }));
        assert!(!failure.may_leave_credentials());
    }

    #[tokio::test]
    async fn malformed_repository_key_fails_before_secret_writes() {
        let mock_server = MockServer::start().await;
        let source = fixtures::source();
        get_repository_mock(&source, Some("repo, workflow"))
            .mount(&mock_server)
            .await;
        get_repository_mock(&fixtures::target(), Some("repo"))
            .mount(&mock_server)
            .await;
        list_secrets_mock(&source, &["API_KEY"])
            .mount(&mock_server)
            .await;
        list_environments_mock(&source, &[])
            .mount(&mock_server)
            .await;
        public_key_mock(&source, KEY_ID, "AAAA")
            .expect(1)
            .mount(&mock_server)
            .await;
        for mock in no_writes_mocks() {
            mock.mount(&mock_server).await;
        }
        let config = fixtures::config();

        let failure = migrator(&config, &mock_server)
            .run(&CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.stage, MigrationState::Preparing);
        assert!(matches!(failure.error, MigrationError::Encryption(_)));
        assert!(failure.error.to_string().contains("32 bytes, got 3"));
    }
}
