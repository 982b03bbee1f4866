//! Error taxonomy for the monitoring core
//!
//! None of these are fatal: the session loop turns every one of them into a
//! status publication and keeps ticking.

use thiserror::Error;

/// Failure to obtain a sample from a collector. Transient.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("collector unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read counters: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote agent returned HTTP {status}")]
    Http { status: u16 },

    #[error("remote agent timed out")]
    Timeout,

    #[error("remote agent transport error: {0}")]
    Transport(String),

    #[error("malformed remote body: {0}")]
    MalformedBody(String),
}

impl From<reqwest::Error> for CollectionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CollectionError::Timeout
        } else if err.is_decode() {
            CollectionError::MalformedBody(err.to_string())
        } else if let Some(status) = err.status() {
            CollectionError::Http {
                status: status.as_u16(),
            }
        } else {
            CollectionError::Transport(err.to_string())
        }
    }
}

/// Rejected control value. Previous state is left unchanged.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid monitor url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported url scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),

    #[error("monitor source requires a url")]
    MissingUrl,

    #[error("rate limit seconds must be a finite number, got {0}")]
    InvalidRateLimit(f64),
}

/// Malformed control message. The session continues.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty control message")]
    EmptyMessage,

    #[error("invalid control message: {0}")]
    InvalidJson(#[from] serde_json::Error),
}
