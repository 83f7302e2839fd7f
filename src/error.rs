//! Error taxonomy shared by every pass.
//!
//! Only [`MigrateError::Transient`] is ever retried (see [`crate::backoff`]).
//! [`MigrateError::Consistency`] means the mirror or the code is wrong and the
//! run must stop; nothing in the crate downgrades it to a warning.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    /// Rate limits, 5xx responses and network failures.
    #[error("transient remote error: {0}")]
    Transient(String),

    /// 403 from a remote platform.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Logic or data-integrity violation. Always fatal.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// Operator-supplied user data is missing; `instructions` is a template
    /// the operator can fill in before re-running.
    #[error("missing user information for {count} user(s)\n{instructions}")]
    MissingUsers { count: usize, instructions: String },

    /// A previous pass has not produced what this pass needs.
    #[error("{0}")]
    Precondition(String),

    #[error("remote error ({status}): {body}")]
    Remote { status: u16, body: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(String),
}

pub type Result<T, E = MigrateError> = std::result::Result<T, E>;

impl MigrateError {
    pub fn consistency(message: impl Into<String>) -> Self {
        MigrateError::Consistency(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MigrateError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, MigrateError::Transient(_))
    }

    /// Maps an HTTP status and body to the taxonomy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            403 => MigrateError::Permission(body),
            429 | 500..=599 => MigrateError::Transient(format!("HTTP {}: {}", status, body)),
            _ => MigrateError::Remote { status, body },
        }
    }
}

/// Passes 2xx responses through and classifies everything else.
pub fn ensure_success(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(MigrateError::from_status(status.as_u16(), body))
}

impl From<reqwest::Error> for MigrateError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => MigrateError::from_status(status.as_u16(), e.to_string()),
            None if e.is_decode() => MigrateError::Remote {
                status: 0,
                body: e.to_string(),
            },
            None => MigrateError::Transient(e.to_string()),
        }
    }
}
