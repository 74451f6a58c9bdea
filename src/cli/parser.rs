use std::time::Duration;

use anyhow::{bail, Context, Result};

use super::{reader::Config, Args};
use crate::config::{Credential, MigrationConfig, RepoRef};

/// Merge command-line arguments over the config file. `github_token` is the
/// value of `GITHUB_TOKEN`, consulted only with `--load`.
pub fn parse_config(
    args: &Args,
    file: Config,
    github_token: Option<String>,
) -> Result<MigrationConfig> {
    let source = RepoRef::new(
        required("source-org", &args.source_org, &file.source.org)?,
        required("source-repo", &args.source_repo, &file.source.repo)?,
    );
    let target = RepoRef::new(
        required("target-org", &args.target_org, &file.target.org)?,
        required("target-repo", &args.target_repo, &file.target.repo)?,
    );
    if source == target {
        bail!("source and target are the same repository `{source}`");
    }

    let (source_pat, target_pat) = if args.load {
        let token = github_token
            .filter(|token| !token.trim().is_empty())
            .context("--load requires the GITHUB_TOKEN environment variable to be set")?;
        (token.clone(), token)
    } else {
        (
            required("source-pat", &args.source_pat, &file.source.pat)?,
            required("target-pat", &args.target_pat, &file.target.pat)?,
        )
    };

    let patterns = if args.exclude.is_empty() {
        &file.exclude
    } else {
        &args.exclude
    };
    let exclude = patterns
        .iter()
        .map(|pattern| {
            glob::Pattern::new(pattern)
                .with_context(|| format!("invalid exclude pattern `{pattern}`"))
        })
        .collect::<Result<Vec<_>>>()?;

    let timeout = match args.timeout.or(file.timeout) {
        Some(0) => bail!("--timeout must be at least one second"),
        Some(seconds) => Some(Duration::from_secs(seconds)),
        None => None,
    };

    let mut config = MigrationConfig::new(
        source,
        target,
        Credential::new(source_pat),
        Credential::new(target_pat),
    );
    config.skip_environments = args.skip_envs || file.skip_envs;
    config.verbose = args.verbose || file.verbose;
    config.exclude = exclude;
    config.api_url = args.api_url.clone().or(file.api_url);
    config.timeout = timeout;

    Ok(config)
}

fn required(flag: &str, cli: &Option<String>, file: &Option<String>) -> Result<String> {
    cli.as_ref()
        .or(file.as_ref())
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .with_context(|| format!("missing required `--{flag}`"))
}
