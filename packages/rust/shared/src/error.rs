//! Error types for Quarry.
//!
//! Library crates use [`QuarryError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Quarry operations.
#[derive(Debug, thiserror::Error)]
pub enum QuarryError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP transport error.
    #[error("network error: {0}")]
    Network(String),

    /// Response or payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A single research provider failed.
    #[error("provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    /// A single research provider exceeded its time budget.
    #[error("provider {provider} timed out after {secs}s")]
    ProviderTimeout { provider: String, secs: u64 },

    /// Every configured provider failed for a job.
    #[error("all {attempted} providers failed")]
    AllProvidersFailed { attempted: usize },

    /// The synthesis delegate failed (API, timeout, or unusable output).
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, QuarryError>;

impl QuarryError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a provider error attributed to `provider`.
    pub fn provider(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// A message safe to show to remote observers.
    ///
    /// Never includes provider response bodies, SQL, paths, or key material.
    pub fn public_message(&self) -> String {
        match self {
            Self::Config { .. } => "Research pipeline is misconfigured".into(),
            Self::AllProvidersFailed { attempted } => {
                format!("All {attempted} research providers failed")
            }
            Self::Provider { provider, .. } => format!("Research provider {provider} failed"),
            Self::ProviderTimeout { provider, secs } => {
                format!("Research provider {provider} timed out after {secs}s")
            }
            Self::Synthesis(_) => "Synthesis failed".into(),
            Self::Storage(_) | Self::Io { .. } => "Failed to persist research report".into(),
            Self::Validation { message } => format!("Invalid request: {message}"),
            Self::NotFound(_) => "Requested record not found".into(),
            Self::Network(_) | Self::Parse { .. } => "Research pipeline failed".into(),
        }
    }
}
