//! Domain-level error types for localwave.
//!
//! All errors are typed with `thiserror` and carry enough context to be
//! logged or rendered as an HTTP response without leaking internals.

use thiserror::Error;

/// Application-level errors with HTTP status mapping.
#[derive(Error, Debug)]
pub enum AppError {
    /// Caller supplied a malformed payload or an incomplete record.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Referenced record does not exist.
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Failed to open or query the local message store.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON parse error: {message}")]
    JsonParse {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Configuration or environment error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO operation failed.
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Remote side cannot be reached right now.
    #[error("Unavailable: {message}")]
    Unavailable { message: String },

    /// Cloud sink rejected or failed a request.
    #[error("Cloud sink error: {message}")]
    CloudSink {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl AppError {
    /// Create a database error from rusqlite error.
    pub fn database(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse(err: serde_json::Error) -> Self {
        Self::JsonParse {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create an IO error with context.
    pub fn io(message: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(err),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a cloud sink error from a transport failure.
    pub fn cloud(err: reqwest::Error) -> Self {
        Self::CloudSink {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Unavailable { .. } => 503,
            _ => 500,
        }
    }
}

/// Result type alias using `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
