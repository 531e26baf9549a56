//! Error types for the reconcile passes
//!
//! Transient conditions never show up here. They are turned into a
//! requeue verdict or a default fact by the caller. What remains are
//! failures of the remote channel and output we refuse to guess at.

use thiserror::Error;

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

/// Errors returned by the Kubernetes facing collaborator
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("conflict updating {0}")]
    Conflict(String),

    #[error("api request failed: {0}")]
    Api(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, PlatformError::Conflict(_))
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("command in pod {pod} failed: {message}")]
    Exec { pod: String, message: String },

    #[error("failed to parse {what}: {message}")]
    Parse { what: &'static str, message: String },

    #[error("expected {expected} columns from {query} query but got {got}")]
    UnexpectedColumns {
        query: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid number for {what}: '{value}'")]
    InvalidNumber {
        what: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("admintools {command} failed: {message}")]
    AdminCommand { command: &'static str, message: String },

    #[error("revive planner: {0}")]
    Planner(String),

    #[error("failed to parse yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReconcileError {
    pub fn exec(pod: impl std::fmt::Display, message: impl Into<String>) -> Self {
        ReconcileError::Exec {
            pod: pod.to_string(),
            message: message.into(),
        }
    }
}
