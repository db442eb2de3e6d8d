//! Error types for credential loading and certificate generation.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for TLS operations.
pub type TlsResult<T> = Result<T, TlsError>;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("invalid certificate PEM: {0}")]
    InvalidCertificate(String),

    #[error("no certificate found in PEM input")]
    MissingCertificate,

    #[error("no private key found in PEM input")]
    MissingPrivateKey,

    #[error("unsupported private key: {0}")]
    InvalidPrivateKey(String),

    #[error("failed to append ca certs: no parsable certificate in CA pool")]
    NoTrustedRoots,

    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),
}
