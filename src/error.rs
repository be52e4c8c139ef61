//! Error types for data loading and reconciliation.
//!
//! All fallible operations in this crate return [`Result`] with [`DataError`].
//! The taxonomy separates hard rate-limit rejections (never retried
//! automatically, never swallowed), offline cache misses, transient transport
//! failures (retry is the orchestrator's decision) and structural problems
//! with a single slice of data.
//!
//! Errors affecting a single driver's data are expected to be handled at the
//! per-driver loop without aborting the rest of the session; a
//! [`DataError::RateLimitExceeded`] should propagate to the top since
//! continuing would only produce more of the same.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for data loading operations.
pub type Result<T, E = DataError> = std::result::Result<T, E>;

/// Main error type for data loading and reconciliation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DataError {
    /// The upstream service explicitly rejected a request due to rate
    /// limiting, or a hard local budget was exhausted.
    ///
    /// This is never retried automatically and must not be downgraded or
    /// swallowed by generic error handling.
    #[error("Rate limit exceeded: {info}")]
    RateLimitExceeded { info: String },

    /// Requested data is not in the cache while offline mode is active.
    #[error("Data for '{endpoint}' is not available offline")]
    UnavailableOffline { endpoint: String },

    /// A time slice contains fewer than two samples, so there is nothing to
    /// slice or interpolate meaningfully.
    #[error("Empty slice: fewer than two samples in [{start:?}, {end:?}]")]
    EmptySlice { start: Duration, end: Duration },

    /// Transport-level failure while talking to the upstream service.
    #[error("Transport error: {reason}")]
    Transport {
        reason: String,
        retryable: bool,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache store I/O failure.
    #[error("Cache store error at {path}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Payload or metadata could not be parsed.
    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    /// Invalid configuration value.
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl DataError {
    /// Returns whether this error is potentially recoverable through retry.
    ///
    /// Hard rate-limit rejections are deliberately not retryable here:
    /// backing off and retrying is a policy decision for the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            DataError::RateLimitExceeded { .. } => false,
            DataError::UnavailableOffline { .. } => false,
            DataError::EmptySlice { .. } => false,
            DataError::Transport { retryable, .. } => *retryable,
            DataError::Store { .. } => false,
            DataError::Parse { .. } => false,
            DataError::Config { .. } => false,
        }
    }

    /// Helper constructor for hard rate-limit rejections.
    pub fn rate_limit_exceeded(info: impl Into<String>) -> Self {
        DataError::RateLimitExceeded { info: info.into() }
    }

    /// Helper constructor for offline cache misses.
    pub fn unavailable_offline(endpoint: impl Into<String>) -> Self {
        DataError::UnavailableOffline { endpoint: endpoint.into() }
    }

    /// Helper constructor for transport failures.
    pub fn transport(reason: impl Into<String>, retryable: bool) -> Self {
        DataError::Transport { reason: reason.into(), retryable, source: None }
    }

    /// Helper constructor for transport failures with an underlying source.
    pub fn transport_with_source(
        reason: impl Into<String>,
        retryable: bool,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        DataError::Transport { reason: reason.into(), retryable, source: Some(source) }
    }

    /// Helper constructor for cache store I/O errors with path context.
    pub fn store_error(path: PathBuf, source: std::io::Error) -> Self {
        DataError::Store { path, source }
    }

    /// Helper constructor for parse errors.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        DataError::Parse { context: context.into(), details: details.into() }
    }
}

impl From<std::io::Error> for DataError {
    fn from(err: std::io::Error) -> Self {
        DataError::Store { path: PathBuf::from("<unknown>"), source: err }
    }
}
