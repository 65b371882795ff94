//! Error types for the probe harness.

use std::time::Duration;
use thiserror::Error;

/// Failure to complete an HTTP exchange at the transport level.
///
/// A reply with a non-2xx status is not a transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("failed to read response body from {url}: {message}")]
    Body { url: String, message: String },
}

/// Errors surfaced to the HTTP layer or the binaries.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    #[error("no targets configured")]
    NoTargets,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
