//! Error types for the API binding layer
//!
//! Workflow steps and the `simple_*` operations never return these; they log,
//! count and hand back an absent result. `ApiError` is reserved for lookups
//! whose callers cannot continue without the data, and `StartupFailure` for
//! the one-shot preflight.

use thiserror::Error;

/// Errors raised by transports and by lookups that require a successful reply
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{method} {path} failed with status {status}: {message}")]
    Status {
        method: String,
        path: String,
        status: u16,
        message: String,
    },

    #[error("Failed to decode response from {path}: {message}")]
    Decode { path: String, message: String },

    #[error("Response from {path} is missing field '{field}'")]
    MissingField { path: String, field: String },

    #[error("Pagination of {path} failed: {message}")]
    Pagination { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ApiError {
    /// HTTP status attached to the error, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Fatal preflight conditions. The host decides whether to exit.
#[derive(Error, Debug)]
pub enum StartupFailure {
    #[error("Failed to connect to backend at {url}, is it running? Error was: {reason}")]
    Unreachable { url: String, reason: String },

    #[error(
        "Missing CT packages: {}. Please run the clinical standards import before this tool.",
        .missing.join(",")
    )]
    MissingMandatoryPackages { missing: Vec<String> },
}

pub type Result<T> = std::result::Result<T, ApiError>;
