//! Moves GitHub Actions secrets between repositories without reading them.
//!
//! The values never leave GitHub: the [`migrator::Migrator`] stores short-lived
//! credentials on the source repository and pushes a workflow there which
//! forwards every secret to the target and then removes the credentials.

pub mod branch;
pub mod cli;
pub mod config;
pub mod environments;
pub mod error;
pub mod github_provider;
pub mod logging;
pub mod migrator;
pub mod names;
pub mod provider;
pub mod publish;
pub mod rate_limit;
pub mod scopes;
pub mod sealed_box;
pub mod workflow;


pub use config::{Credential, MigrationConfig, RepoRef, RunLookup};
pub use error::{MigrationError, Result};
pub use migrator::{MigrationFailure, MigrationReport, MigrationState, Migrator, Outcome};
