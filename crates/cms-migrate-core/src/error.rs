//! Error types for the migration pipeline.
//!
//! Transport-level failures (`Network`, `Timeout`, 5xx `HttpStatus`) are
//! retried inside the resilient client. Everything else surfaces to the
//! calling stage, where the orchestrator converts it into a report entry.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the migration library.
#[derive(Debug, Error)]
pub enum MigrateError {
    // Transport errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status} from {url}")]
    HttpStatus {
        status: u16,
        url: String,
        /// Response body, truncated for logging
        body: Option<String>,
    },

    // Record-level stage errors
    #[error("Media migration failed for {url}: {message}")]
    Media { url: String, message: String },

    #[error("Transform failed for record {record_id}: missing or invalid {field}")]
    Transform { record_id: u64, field: String },

    #[error("Record {record_id} exists in {present_in} but not in {missing_in}")]
    Existence {
        record_id: u64,
        present_in: String,
        missing_in: String,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Unexpected response shape from {url}: {message}")]
    Decode { url: String, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid URL {url}: {message}")]
    Url { url: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

impl From<std::io::Error> for MigrateError {
    fn from(err: std::io::Error) -> Self {
        MigrateError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for MigrateError {
    fn from(err: serde_json::Error) -> Self {
        MigrateError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

/// Timeouts are enforced by [`ResilientClient`](crate::network::ResilientClient),
/// which reports them as [`MigrateError::Timeout`] with the configured limit.
impl From<reqwest::Error> for MigrateError {
    fn from(err: reqwest::Error) -> Self {
        MigrateError::Network {
            message: err.to_string(),
            cause: std::error::Error::source(&err).map(|s| s.to_string()),
        }
    }
}

impl MigrateError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        MigrateError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        MigrateError::Config {
            message: message.into(),
        }
    }

    /// Check if this error should trigger a transport-level retry.
    ///
    /// Network failures, timeouts and 5xx responses are retryable; 4xx
    /// responses and decode errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrateError::Network { .. } | MigrateError::Timeout(_) => true,
            MigrateError::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            MigrateError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short category label used in report entries.
    pub fn kind(&self) -> &'static str {
        match self {
            MigrateError::Network { .. } | MigrateError::Timeout(_) => "transport",
            MigrateError::HttpStatus { .. } => "http_status",
            MigrateError::Media { .. } => "media",
            MigrateError::Transform { .. } => "transform",
            MigrateError::Existence { .. } => "existence",
            MigrateError::Io { .. } => "io",
            MigrateError::Json { .. } | MigrateError::Decode { .. } => "decode",
            MigrateError::Config { .. } | MigrateError::Url { .. } => "config",
            MigrateError::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrateError::Transform {
            record_id: 7,
            field: "title".into(),
        };
        assert_eq!(
            err.to_string(),
            "Transform failed for record 7: missing or invalid title"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(MigrateError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(MigrateError::Network {
            message: "connection reset".into(),
            cause: None
        }
        .is_retryable());
        assert!(MigrateError::HttpStatus {
            status: 503,
            url: "http://cms/api".into(),
            body: None
        }
        .is_retryable());
        assert!(!MigrateError::HttpStatus {
            status: 404,
            url: "http://cms/api".into(),
            body: None
        }
        .is_retryable());
        assert!(!MigrateError::Decode {
            url: "http://cms/api".into(),
            message: "expected array".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(
            MigrateError::Media {
                url: "u".into(),
                message: "m".into()
            }
            .kind(),
            "media"
        );
        assert_eq!(MigrateError::config("bad").kind(), "config");
    }
}
