use std::fmt;
use std::time::Duration;

use zeroize::Zeroize;

/// Coordinates of one repository on the hosting platform.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub org: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(org: impl Into<String>, name: impl Into<String>) -> Self {
        RepoRef {
            org: org.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.name)
    }
}

/// A platform access token.
///
/// The value only leaves this wrapper through [`Credential::expose`]; `Debug` and
/// `Display` are redacted and the buffer is zeroed on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Credential(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// How long to look for the Actions run the pushed workflow triggers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunLookup {
    pub attempts: u32,
    /// Pause before the first lookup.
    pub first_delay: Duration,
    /// Pause between later lookups.
    pub delay: Duration,
}

impl Default for RunLookup {
    fn default() -> Self {
        RunLookup {
            attempts: 6,
            first_delay: Duration::from_secs(2),
            delay: Duration::from_secs(3),
        }
    }
}

/// One migration request. Built once by the caller and borrowed for the whole run.
#[derive(Clone, Debug)]
pub struct MigrationConfig {
    pub source: RepoRef,
    pub target: RepoRef,
    pub source_credential: Credential,
    pub target_credential: Credential,
    pub skip_environments: bool,
    pub verbose: bool,
    /// Secret names matching any of these are left behind.
    pub exclude: Vec<glob::Pattern>,
    /// Base URL of the REST API, `None` for api.github.com.
    pub api_url: Option<String>,
    /// Deadline for the whole run.
    pub timeout: Option<Duration>,
    pub run_lookup: RunLookup,
}

impl MigrationConfig {
    pub fn new(
        source: RepoRef,
        target: RepoRef,
        source_credential: Credential,
        target_credential: Credential,
    ) -> Self {
        MigrationConfig {
            source,
            target,
            source_credential,
            target_credential,
            skip_environments: false,
            verbose: false,
            exclude: Vec::new(),
            api_url: None,
            timeout: None,
            run_lookup: RunLookup::default(),
        }
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|pattern| pattern.matches(name))
    }
}
