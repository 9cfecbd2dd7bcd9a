//! Error types for vpsman.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use vpsman_protocol::ErrorKind;

/// Result type alias using vpsman's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lifecycle operations.
#[derive(Error, Debug)]
pub enum Error {
    // Lookup errors
    /// Instance not found in the registry.
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// OS identifier not in the catalog.
    #[error("unknown os type: {0}")]
    UnknownOs(String),

    // Request errors
    /// The request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Instance is in an invalid state for the requested operation.
    #[error("invalid instance state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state.
        expected: String,
        /// Actual state.
        actual: String,
    },

    /// Ownership or capacity check failed.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A limit was reached.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    // External tool errors
    /// External command failed.
    #[error("command failed: {command} (exit status {status}): {stderr}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// Exit status, `-1` when killed by a signal or never spawned.
        status: i32,
        /// Captured diagnostic output.
        stderr: String,
    },

    /// An instance artifact is absent.
    #[error("missing artifact: {artifact} at {}", path.display())]
    ArtifactMissing {
        /// Which artifact (disk, seed, pidfile, log).
        artifact: &'static str,
        /// Where it was expected.
        path: PathBuf,
    },

    /// A bounded wait was exceeded.
    #[error("timed out after {}: {operation}", humantime::format_duration(*after))]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// How long we waited.
        after: Duration,
    },

    // Transfer errors
    /// Image download failed.
    #[error("download failed: {0}")]
    Download(String),

    // Storage errors
    /// Registry database error.
    #[error("database error: {0}")]
    Database(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    // IO errors
    /// IO error wrapper.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid request error with a message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a command failed error.
    pub fn command_failed(command: impl Into<String>, status: i32, stderr: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            status,
            stderr: stderr.into(),
        }
    }

    /// Create a missing artifact error.
    pub fn artifact_missing(artifact: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::ArtifactMissing {
            artifact,
            path: path.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Wrap a registry database error.
    pub fn database(err: impl Into<redb::Error>) -> Self {
        Self::Database(err.into().to_string())
    }

    /// Kind of this error, for front ends.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InstanceNotFound(_) | Error::UnknownOs(_) => ErrorKind::NotFound,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::InvalidState { .. } => ErrorKind::Conflict,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::CommandFailed { .. } => ErrorKind::ExternalToolFailure,
            Error::ArtifactMissing { .. } => ErrorKind::ArtifactMissing,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Download(_) | Error::Io(_) => ErrorKind::TransientIo,
            Error::Database(_) | Error::Config(_) => ErrorKind::Internal,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Download(err.to_string())
    }
}
