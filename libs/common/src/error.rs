//! Unified error type for the screener client.
//!
//! `Clone` because a single fetch outcome is fanned out to every caller
//! waiting on the same cache entry.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Transport failure; no response was received.
    #[error("Network error: {0}")]
    Network(String),

    /// 401: the bearer token is missing, expired or invalid.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Any other 4xx.
    #[error("Request rejected (status={status}): {message}")]
    Validation { status: u16, message: String },

    /// 5xx.
    #[error("Server error (status={status}): {message}")]
    Server { status: u16, message: String },

    #[error("Response decode error: {0}")]
    Decode(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Superseded by a newer session operation")]
    Superseded,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify a non-2xx HTTP status into the matching error kind.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Error::Unauthorized(message),
            400..=499 => Error::Validation { status, message },
            _ => Error::Server { status, message },
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized(_))
    }

    /// HTTP status carried by the error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Unauthorized(_) => Some(401),
            Error::Validation { status, .. } | Error::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}
