//! Error types for informant-rs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("feed error: {0}")]
    Feed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{phase} hook failed: {message}")]
    Hook { phase: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the feed loop should resubscribe instead of giving up.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Feed(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
