use serde::Deserialize;

/// One side of the migration as written in the config file.
#[derive(Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RepositorySection {
    pub org: Option<String>,
    pub repo: Option<String>,
    pub pat: Option<String>,
}

impl std::fmt::Debug for RepositorySection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositorySection")
            .field("org", &self.org)
            .field("repo", &self.repo)
            .field("pat", &self.pat.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
