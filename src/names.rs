use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// Prefix of every secret this tool creates for itself.
pub const RESERVED_PREFIX: &str = "SECRETS_MIGRATOR_";

/// Holds the target credential; read by the forwarding jobs.
pub const TARGET_CREDENTIAL: &str = "SECRETS_MIGRATOR_TARGET_PAT";

/// Holds the source credential; read by the cleanup job only.
pub const SOURCE_CREDENTIAL: &str = "SECRETS_MIGRATOR_SOURCE_PAT";

pub const TEMPORARY_CREDENTIALS: [&str; 2] = [TARGET_CREDENTIAL, SOURCE_CREDENTIAL];

const BUILTIN_TOKEN: &str = "GITHUB_TOKEN";

fn secret_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("secret name pattern"))
}

/// `true` for names the tool owns or the platform injects; these are never migrated.
pub fn is_reserved(name: &str) -> bool {
    name.eq_ignore_ascii_case(BUILTIN_TOKEN)
        || name.to_ascii_uppercase().starts_with(RESERVED_PREFIX)
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretName(String);

impl SecretName {
    /// Accepts names usable both as `secrets.NAME` expressions and as shell words.
    pub fn parse(name: &str) -> Option<SecretName> {
        if secret_name_pattern().is_match(name) {
            Some(SecretName(name.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvironmentName(String);

impl EnvironmentName {
    /// Rejects names that would break out of a workflow expression or a YAML scalar.
    pub fn parse(name: &str) -> Option<EnvironmentName> {
        let invalid = name.trim().is_empty()
            || name.chars().any(char::is_control)
            || name.contains("${{");
        if invalid {
            None
        } else {
            Some(EnvironmentName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Percent-encoded form for REST paths.
    pub fn path_segment(&self) -> String {
        urlencoding::encode(&self.0).into_owned()
    }
}

impl fmt::Display for EnvironmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
