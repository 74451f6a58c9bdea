use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::common::RepositorySection;

/// Contents of a `--config` file. Every key is optional; command-line values
/// take precedence.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: RepositorySection,
    pub target: RepositorySection,
    pub skip_envs: bool,
    pub verbose: bool,
    pub exclude: Vec<String>,
    pub api_url: Option<String>,
    /// Seconds.
    pub timeout: Option<u64>,
}

pub fn read_config(config: &str) -> Result<Config, serde_yaml::Error> {
    serde_yaml::from_str(config)
}

pub fn read_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("could not read file `{}`", path.display()))?;

    read_config(&content).with_context(|| format!("could not parse `{}`", path.display()))
}
