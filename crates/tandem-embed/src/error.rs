//! Error types for the embedded member.

use std::path::PathBuf;

use tandem_state::StateError;
use thiserror::Error;

/// Result type alias for embedded member operations.
pub type EmbedResult<T> = Result<T, EmbedError>;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config {}: {reason}", path.display())]
    ConfigFile { path: PathBuf, reason: String },

    #[error("state store: {0}")]
    State(#[from] StateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("member is already initialized")]
    AlreadyInitialized,

    #[error("member is not initialized, call init() first")]
    NotInitialized,

    #[error("member is already running")]
    AlreadyRunning,

    #[error("member is not ready to accept requests")]
    NotReady,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("auth: {0}")]
    Auth(String),
}
