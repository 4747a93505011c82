//! Error types for the conviction-scoring core

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the conviction-scoring core
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // Ingress / event validation errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Token is on the ignore list: {0}")]
    IgnoredToken(String),

    // Token Metadata Fetcher errors
    #[error("Transient fetch error for {token}: {reason}")]
    TransientFetchError { token: String, reason: String },

    #[error("Snapshot for {0} is stale")]
    StaleSnapshot(String),

    #[error("Fetch timed out after {0}ms")]
    FetchTimeout(u64),

    // Conviction Engine errors
    #[error("Scoring precondition not met: {0}")]
    ScoringPrecondition(String),

    // Active Token Tracker errors
    #[error("Token not tracked: {0}")]
    TokenNotTracked(String),

    #[error("Tracker is draining, new events are rejected")]
    TrackerDraining,

    // Publishing errors
    #[error("Publish failed for signal on {token}: {reason}")]
    PublishFailure { token: String, reason: String },

    // Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    // Cache invariant errors (should not occur by construction)
    #[error("Cache invariant violated: {0}")]
    Cache(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransientFetchError { .. }
                | Error::FetchTimeout(_)
                | Error::PublishFailure { .. }
        )
    }

    /// Check if this error should halt startup rather than be logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::MissingEnvVar(_))
    }

    /// Errors absorbed at the ingress boundary: the caller still gets a success response.
    pub fn is_absorbed_at_ingress(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::IgnoredToken(_))
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::FetchTimeout(0)
        } else {
            Error::TransientFetchError {
                token: String::new(),
                reason: e.to_string(),
            }
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_fetch_is_retryable() {
        let e = Error::TransientFetchError {
            token: "abc".into(),
            reason: "timeout".into(),
        };
        assert!(e.is_retryable());
    }

    #[test]
    fn config_error_is_fatal() {
        assert!(Error::Config("bad".into()).is_fatal());
        assert!(!Error::Cache("bad".into()).is_fatal());
    }

    #[test]
    fn ignored_token_is_absorbed() {
        assert!(Error::IgnoredToken("usdc".into()).is_absorbed_at_ingress());
        assert!(!Error::Internal("x".into()).is_absorbed_at_ingress());
    }
}
