//! Error handling for the triage engine

/// Result type alias for the triage engine
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the triage engine
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Transport failures and non-success responses from the backend
    #[error("Remote error: {message}")]
    Remote { message: String },

    /// HTTP client errors (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed payloads
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Validation errors
    #[error("Validation failed: {field}")]
    Validation { field: String },

    /// Logical conflicts rejected before any network call
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a new remote error
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
        }
    }

    /// Create a new conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a retry may succeed without any change on the analyst's side
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Remote { .. } | Self::Http(_) | Self::Decode(_))
    }
}

/// Convenience macros for creating specific error types
#[macro_export]
macro_rules! remote_error {
    ($msg:expr) => {
        $crate::Error::remote($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::remote(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! triage_error {
    ($msg:expr) => {
        $crate::Error::internal($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::internal(format!($fmt, $($arg)*))
    };
}
