//! tandem-tls: credential bundles for mutually authenticated gRPC.
//!
//! A [`CredentialBundle`] is one side's certificate chain, its private key
//! and the pool of issuers it trusts for the other side. Bundles are loaded
//! through a [`CredentialSource`] (files, environment, inline PEM) and are
//! validated up front, so a broken key or an empty CA pool surfaces as a
//! [`TlsError`] at load time rather than during the first handshake.
//!
//! The [`generate`] module mints a throwaway CA plus server and client
//! certificates for development and tests.

pub mod bundle;
pub mod error;
pub mod generate;
pub mod source;

pub use bundle::{CaPool, CredentialBundle};
pub use error::{TlsError, TlsResult};
pub use generate::{CertKeyPair, CertUsage, CertificateAuthority, DevCredentials};
pub use source::{CredentialSource, InlinePem, PemEnv, PemFiles};

use std::sync::Once;

static PROVIDER: Once = Once::new();

/// Install the ring crypto provider as the process-wide rustls default.
///
/// Safe to call any number of times; only the first call has an effect.
pub fn install_crypto_provider() {
    PROVIDER.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("rustls crypto provider already installed");
        }
    });
}
