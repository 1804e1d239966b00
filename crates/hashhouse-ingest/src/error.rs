//! Error types for the hashhouse ingestion pipeline.
//!
//! Errors are split by the layer that absorbs them:
//!
//! - [`FetchError`] is produced by a range client at the point of failure and
//!   carries a structured [`FetchErrorKind`]. The retry policy decides from the
//!   kind alone whether to retry and whether the connection is poisoned.
//! - [`RetryError`] is the terminal form of a fetch failure once the retry
//!   budget is spent (or the error was not retryable). It records how many
//!   attempts were made. The aggregator logs it and skips the unit.
//! - [`ParseError`] is line-local. The offending line is skipped.
//! - [`LoadError`] is a failed bulk-load transaction. The whole batch was
//!   rolled back.
//! - [`IngestError`] is the run-level error returned to the caller.

use std::fmt;

use thiserror::Error;

/// Result type alias for run-level operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Classification of a failed range fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// The peer reset, aborted, or closed the connection mid-exchange.
    ConnectionReset,
    /// The response stream ended before the message was complete.
    ProtocolTerminated,
    /// HTTP 429.
    RateLimited,
    /// HTTP 500, 502, 503 or 504.
    ServerUnavailable(u16),
    /// Any other non-success HTTP status.
    Status(u16),
    /// The request exceeded the client's total timeout.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// The HTTP client could not be constructed.
    Client,
    /// Any other request failure.
    Request,
}

impl FetchErrorKind {
    /// Map a non-success HTTP status code to its kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => FetchErrorKind::RateLimited,
            500 | 502 | 503 | 504 => FetchErrorKind::ServerUnavailable(status),
            other => FetchErrorKind::Status(other),
        }
    }

    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchErrorKind::ConnectionReset
                | FetchErrorKind::ProtocolTerminated
                | FetchErrorKind::RateLimited
                | FetchErrorKind::ServerUnavailable(_)
        )
    }

    /// Whether the client's pooled connections must be discarded before the
    /// next attempt.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            FetchErrorKind::ConnectionReset | FetchErrorKind::ProtocolTerminated
        )
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::ConnectionReset => write!(f, "connection reset"),
            FetchErrorKind::ProtocolTerminated => write!(f, "protocol terminated"),
            FetchErrorKind::RateLimited => write!(f, "rate limited"),
            FetchErrorKind::ServerUnavailable(code) => write!(f, "server unavailable ({})", code),
            FetchErrorKind::Status(code) => write!(f, "unexpected status ({})", code),
            FetchErrorKind::Timeout => write!(f, "timeout"),
            FetchErrorKind::Connect => write!(f, "connect failed"),
            FetchErrorKind::Client => write!(f, "client construction failed"),
            FetchErrorKind::Request => write!(f, "request failed"),
        }
    }
}

/// A single failed fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// The terminal outcome of a fetch that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("giving up after {attempts} attempt(s): {last}")]
pub struct RetryError {
    /// Total attempts made, including the first.
    pub attempts: u32,
    /// The error observed on the final attempt.
    #[source]
    pub last: FetchError,
}

/// A response or file line that could not be turned into a row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected 2 ':'-separated fields, found {0}")]
    FieldCount(usize),

    #[error("invalid count '{0}'")]
    InvalidCount(String),

    #[error("invalid hash '{0}': expected 40 hex characters (35 for a range suffix)")]
    InvalidHash(String),
}

/// A failed bulk-load transaction. Nothing from the batch was committed.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] sqlx::Error),

    #[error("bulk copy into '{table}' failed: {source}")]
    Copy {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to commit transaction: {0}")]
    Commit(#[source] sqlx::Error),

    /// The destination refused the batch before any data was written.
    #[error("batch rejected: {0}")]
    Rejected(String),
}

/// Run-level errors.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The run could not start: destination unreachable, truncate failed,
    /// or the source could not be opened.
    #[error("Setup error: {0}")]
    Setup(String),

    /// A batch failed to load and the run is configured to abort.
    #[error("Flush failed: {0}")]
    Flush(#[from] LoadError),

    /// Database error outside the bulk-load path (schema provisioning).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error while reading a source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pipeline task panicked or was cancelled.
    #[error("Task error: {0}")]
    Task(String),
}

impl From<toml::de::Error> for IngestError {
    fn from(e: toml::de::Error) -> Self {
        IngestError::Config(e.to_string())
    }
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(e: tokio::task::JoinError) -> Self {
        IngestError::Task(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(FetchErrorKind::from_status(429), FetchErrorKind::RateLimited);
        assert_eq!(
            FetchErrorKind::from_status(503),
            FetchErrorKind::ServerUnavailable(503)
        );
        assert_eq!(
            FetchErrorKind::from_status(500),
            FetchErrorKind::ServerUnavailable(500)
        );
        assert_eq!(FetchErrorKind::from_status(404), FetchErrorKind::Status(404));
        assert_eq!(FetchErrorKind::from_status(501), FetchErrorKind::Status(501));
    }

    #[test]
    fn test_transient_kinds() {
        let transient = [
            FetchErrorKind::ConnectionReset,
            FetchErrorKind::ProtocolTerminated,
            FetchErrorKind::RateLimited,
            FetchErrorKind::ServerUnavailable(502),
        ];
        for kind in transient {
            assert!(kind.is_transient(), "{:?} should be transient", kind);
        }

        let permanent = [
            FetchErrorKind::Status(400),
            FetchErrorKind::Status(404),
            FetchErrorKind::Timeout,
            FetchErrorKind::Connect,
            FetchErrorKind::Client,
            FetchErrorKind::Request,
        ];
        for kind in permanent {
            assert!(!kind.is_transient(), "{:?} should not be transient", kind);
        }
    }

    #[test]
    fn test_only_connection_level_kinds_poison() {
        assert!(FetchErrorKind::ConnectionReset.poisons_connection());
        assert!(FetchErrorKind::ProtocolTerminated.poisons_connection());
        assert!(!FetchErrorKind::RateLimited.poisons_connection());
        assert!(!FetchErrorKind::ServerUnavailable(503).poisons_connection());
        assert!(!FetchErrorKind::Timeout.poisons_connection());
    }

    #[test]
    fn test_retry_error_reports_attempts() {
        let err = RetryError {
            attempts: 4,
            last: FetchError::new(FetchErrorKind::RateLimited, "HTTP 429"),
        };
        let msg = err.to_string();
        assert!(msg.contains("4 attempt"));
        assert!(msg.contains("rate limited"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_flush_error_from_load_error() {
        let err: IngestError = LoadError::Rejected("table missing".to_string()).into();
        assert!(matches!(err, IngestError::Flush(_)));
        assert!(err.to_string().contains("table missing"));
    }

    #[test]
    fn test_config_error_from_toml() {
        let toml_err = toml::from_str::<toml::Value>("= nope").unwrap_err();
        let err: IngestError = toml_err.into();
        assert!(matches!(err, IngestError::Config(_)));
    }
}
