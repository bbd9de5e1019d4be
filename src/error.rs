//! Error types for shift-archiver
//!
//! Fetch and persist failures are absorbed by each stream's backoff policy and surface
//! to observers only as flags. The variants here are what the loop classifies and what
//! lifecycle calls return when a transition cannot be performed.

use thiserror::Error;

/// Result type alias for shift-archiver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for shift-archiver
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "page_size")
        key: Option<String>,
    },

    /// Network error while talking to the paginated endpoint
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status and an unreadable body
    #[error("endpoint returned HTTP {status}")]
    Http {
        /// HTTP status code returned by the endpoint
        status: u16,
    },

    /// Endpoint reported an application-level error or returned no `data` array
    #[error("API error: {0}")]
    Api(String),

    /// I/O error while writing to or reopening a sink
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (malformed page or unserializable record)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The sink was used before being opened or after being closed
    #[error("sink is not open")]
    SinkNotOpen,

    /// Cannot perform a lifecycle operation in the stream's current state
    #[error("cannot {operation} stream {stream} in state {current_state}")]
    InvalidState {
        /// Name of the stream the operation was attempted on
        stream: String,
        /// The operation that was attempted (e.g., "start", "resume")
        operation: String,
        /// The current phase that prevents the operation
        current_state: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error on a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_message_names_stream_and_operation() {
        let err = Error::InvalidState {
            stream: "posts".to_string(),
            operation: "resume".to_string(),
            current_state: "Cancelled".to_string(),
        };
        assert_eq!(err.to_string(), "cannot resume stream posts in state Cancelled");
    }

    #[test]
    fn config_helper_records_key() {
        match Error::config("page_size", "must be greater than zero") {
            Error::Config { message, key } => {
                assert_eq!(message, "must be greater than zero");
                assert_eq!(key.as_deref(), Some("page_size"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn io_errors_convert_with_question_mark() {
        fn fails() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(Error::Io(_))));
    }
}
