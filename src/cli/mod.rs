pub mod common;
pub mod parser;
pub mod reader;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use parser::parse_config;
use reader::{read_config_file, Config};

use crate::config::MigrationConfig;

#[derive(Parser)]
#[command(
    name = "secrets-migrator",
    version,
    about = "Migrate GitHub Actions secrets from one repository to another",
    long_about = "Migrate GitHub Actions secrets from one repository to another.\n\nSecret values are never read through the API: a workflow pushed to the source repository forwards them, sealed with the target repository's public key, and removes its temporary credentials when it ends."
)]
pub struct Args {
    /// Source organization or user
    #[arg(long)]
    pub source_org: Option<String>,

    /// Source repository name
    #[arg(long)]
    pub source_repo: Option<String>,

    /// Target organization or user
    #[arg(long)]
    pub target_org: Option<String>,

    /// Target repository name
    #[arg(long)]
    pub target_repo: Option<String>,

    /// Personal access token for the source repository (scopes: repo, workflow)
    #[arg(long, env = "SOURCE_PAT", hide_env_values = true)]
    pub source_pat: Option<String>,

    /// Personal access token for the target repository (scope: repo)
    #[arg(long, env = "TARGET_PAT", hide_env_values = true)]
    pub target_pat: Option<String>,

    /// Use GITHUB_TOKEN for both source and target
    #[arg(long)]
    pub load: bool,

    /// Do not replicate environments or their secrets
    #[arg(long)]
    pub skip_envs: bool,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,

    /// Leave secrets matching this glob behind (repeatable)
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// REST API base URL, for GitHub Enterprise Server
    #[arg(long, value_name = "URL")]
    pub api_url: Option<String>,

    /// Abort the run after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// YAML file with the same settings
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

pub fn run() -> Result<MigrationConfig> {
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };

    parse_config(&args, file, std::env::var("GITHUB_TOKEN").ok())
}
