use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use secrets_migrator::github_provider::GithubProvider;
use secrets_migrator::migrator::cancel_after;
use secrets_migrator::names::TEMPORARY_CREDENTIALS;
use secrets_migrator::{cli, logging, Migrator, Outcome};

#[tokio::main]
async fn main() -> Result<()> {
    let config = cli::run()?;
    logging::init(config.verbose);

    let api_url = config.api_url.as_deref();
    let source = GithubProvider::configure_provider(&config.source_credential, api_url)
        .context("could not configure the source client")?;
    let target = GithubProvider::configure_provider(&config.target_credential, api_url)
        .context("could not configure the target client")?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            interrupt.cancel();
        }
    });
    if let Some(timeout) = config.timeout {
        cancel_after(&cancel, timeout);
    }

    info!(source = %config.source, target = %config.target, "starting migration");
    let mut migrator = Migrator::new(&config, source, target);
    let report = migrator.run(&cancel).await.map_err(|failure| {
        if failure.may_leave_credentials() {
            eprintln!(
                "{} may still be stored on {}; run the migration again to remove them.",
                TEMPORARY_CREDENTIALS.join(" and "),
                config.source
            );
        }
        failure
    })?;

    match report.outcome {
        Outcome::NothingToMigrate => {
            println!("No secrets to migrate from {}.", config.source);
        }
        Outcome::Published {
            dashboard_url,
            run_url,
            plan,
            ..
        } => {
            println!(
                "Migration of {} secret(s) from {} to {} started.",
                plan.secret_count(),
                config.source,
                config.target
            );
            println!("Follow the run at {}", run_url.unwrap_or(dashboard_url));
        }
    }

    Ok(())
}
