use std::fmt;

use thiserror::Error;

use crate::config::RepoRef;

pub type Result<T> = std::result::Result<T, MigrationError>;

/// Which platform call failed, and against what.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationContext {
    pub operation: &'static str,
    pub repo: RepoRef,
    pub resource: Option<String>,
}

impl OperationContext {
    pub fn new(operation: &'static str, repo: &RepoRef) -> Self {
        OperationContext {
            operation,
            repo: repo.clone(),
            resource: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

impl fmt::Display for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{} `{}` on {}", self.operation, resource, self.repo),
            None => write!(f, "{} on {}", self.operation, self.repo),
        }
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    /// Missing, invalid or revoked credential.
    #[error("authentication failed for {context}: {message}")]
    Auth {
        context: OperationContext,
        message: String,
    },

    /// Insufficient scope, or a rejected request outside the tolerated cases.
    #[error("permission denied for {context}: {message}")]
    Permission {
        context: OperationContext,
        /// HTTP status, when the denial came from the platform.
        status: Option<u16>,
        message: String,
    },

    #[error("{context}: not found")]
    NotFound { context: OperationContext },

    /// Malformed key material, detected before any request is sent.
    #[error("encryption failed: {0}")]
    Encryption(#[from] EncryptionError),

    /// Transport failures, timeouts and server-side errors.
    #[error("network failure for {context}: {message}")]
    Network {
        context: OperationContext,
        message: String,
    },

    #[error("{context}: cancelled")]
    Cancelled { context: OperationContext },
}

impl MigrationError {
    pub fn auth(context: OperationContext, message: impl Into<String>) -> Self {
        MigrationError::Auth {
            context,
            message: message.into(),
        }
    }

    pub fn permission(context: OperationContext, message: impl Into<String>) -> Self {
        MigrationError::Permission {
            context,
            status: None,
            message: message.into(),
        }
    }

    pub fn network(context: OperationContext, message: impl Into<String>) -> Self {
        MigrationError::Network {
            context,
            message: message.into(),
        }
    }

    /// Map an unsuccessful HTTP status to the error taxonomy.
    pub fn from_status(context: OperationContext, status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => MigrationError::auth(context, message),
            404 => MigrationError::NotFound { context },
            400..=499 => MigrationError::Permission {
                context,
                status: Some(status),
                message: format!("HTTP {status}: {message}"),
            },
            _ => MigrationError::network(context, format!("HTTP {status}: {message}")),
        }
    }

    /// The platform's duplicate-resource answer.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            MigrationError::Permission {
                status: Some(409),
                ..
            }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MigrationError::NotFound { .. })
    }

    pub fn context(&self) -> Option<&OperationContext> {
        match self {
            MigrationError::Auth { context, .. }
            | MigrationError::Permission { context, .. }
            | MigrationError::NotFound { context }
            | MigrationError::Network { context, .. }
            | MigrationError::Cancelled { context } => Some(context),
            MigrationError::Encryption(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncryptionError {
    #[error("public key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("public key is not valid base64: {0}")]
    InvalidKeyEncoding(String),

    #[error("sealing failed")]
    Seal,
}
