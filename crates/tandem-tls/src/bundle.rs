//! Validated credential material and the tonic TLS configs built from it.

use std::fmt;

use rustls::pki_types::CertificateDer;
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};
use tracing::{debug, warn};

use crate::error::{TlsError, TlsResult};

fn parse_certs(pem: &str) -> TlsResult<Vec<CertificateDer<'static>>> {
    let mut reader = pem.as_bytes();
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::InvalidCertificate(e.to_string()))
}

/// Trusted issuer certificates used to verify the remote side.
#[derive(Clone)]
pub struct CaPool {
    pem: String,
    len: usize,
}

impl CaPool {
    /// Build a pool from one or more PEM certificates.
    ///
    /// Non-certificate PEM sections are skipped. The pool must end up with at
    /// least one usable trust anchor.
    pub fn from_pem(pem: impl Into<String>) -> TlsResult<Self> {
        let pem = pem.into();
        let certs = parse_certs(&pem)?;

        let mut roots = rustls::RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(certs);
        if ignored > 0 {
            warn!(ignored, "skipped unparsable CA certificates");
        }
        if added == 0 {
            return Err(TlsError::NoTrustedRoots);
        }

        debug!(roots = added, "CA pool built");
        Ok(Self { pem, len: added })
    }

    /// Number of trust anchors in the pool.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn certificate(&self) -> Certificate {
        Certificate::from_pem(&self.pem)
    }

    /// Client config that verifies the server against this pool and expects
    /// `server_name` on its certificate, without presenting a client
    /// identity.
    pub fn client_tls_config(&self, server_name: &str) -> ClientTlsConfig {
        ClientTlsConfig::new()
            .ca_certificate(self.certificate())
            .domain_name(server_name)
    }
}

impl fmt::Debug for CaPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaPool").field("roots", &self.len).finish()
    }
}

/// Certificate chain, private key and trusted CA pool for one endpoint.
///
/// Immutable once built; every constructor validates all three parts.
#[derive(Clone)]
pub struct CredentialBundle {
    cert_pem: String,
    key_pem: String,
    ca: CaPool,
}

impl CredentialBundle {
    pub fn from_pem(
        cert_pem: impl Into<String>,
        key_pem: impl Into<String>,
        ca_pem: impl Into<String>,
    ) -> TlsResult<Self> {
        let cert_pem = cert_pem.into();
        let key_pem = key_pem.into();

        let chain = parse_certs(&cert_pem)?;
        if chain.is_empty() {
            return Err(TlsError::MissingCertificate);
        }

        let mut reader = key_pem.as_bytes();
        let key = rustls_pemfile::private_key(&mut reader)
            .map_err(|e| TlsError::InvalidPrivateKey(e.to_string()))?
            .ok_or(TlsError::MissingPrivateKey)?;
        rustls::crypto::ring::sign::any_supported_type(&key)
            .map_err(|e| TlsError::InvalidPrivateKey(e.to_string()))?;

        let ca = CaPool::from_pem(ca_pem)?;

        debug!(chain = chain.len(), roots = ca.len(), "credential bundle loaded");
        Ok(Self {
            cert_pem,
            key_pem,
            ca,
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn ca(&self) -> &CaPool {
        &self.ca
    }

    pub fn identity(&self) -> Identity {
        Identity::from_pem(&self.cert_pem, &self.key_pem)
    }

    /// Server config that presents this identity and requires every client
    /// to present a certificate issued by the CA pool.
    pub fn server_tls_config(&self) -> ServerTlsConfig {
        ServerTlsConfig::new()
            .identity(self.identity())
            .client_ca_root(self.ca.certificate())
    }

    /// Client config that presents this identity, verifies the server
    /// against the CA pool and requires `server_name` on the server
    /// certificate.
    pub fn client_tls_config(&self, server_name: &str) -> ClientTlsConfig {
        self.ca
            .client_tls_config(server_name)
            .identity(self.identity())
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .field("ca", &self.ca)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::DevCredentials;

    fn dev() -> DevCredentials {
        DevCredentials::generate(&["localhost".to_string()]).unwrap()
    }

    #[test]
    fn bundle_from_generated_material() {
        let dev = dev();
        let bundle =
            CredentialBundle::from_pem(&dev.server.cert_pem, &dev.server.key_pem, &dev.ca_pem)
                .unwrap();
        assert_eq!(bundle.ca().len(), 1);
    }

    #[test]
    fn ca_pool_rejects_garbage() {
        let err = CaPool::from_pem("not a certificate").unwrap_err();
        assert!(matches!(err, TlsError::NoTrustedRoots));
    }

    #[test]
    fn ca_pool_accepts_multiple_roots() {
        let a = dev();
        let b = dev();
        let pool = CaPool::from_pem(format!("{}{}", a.ca_pem, b.ca_pem)).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn bundle_requires_certificate() {
        let dev = dev();
        let err = CredentialBundle::from_pem("", &dev.server.key_pem, &dev.ca_pem).unwrap_err();
        assert!(matches!(err, TlsError::MissingCertificate));
    }

    #[test]
    fn bundle_requires_private_key() {
        let dev = dev();
        // A certificate where the key should be.
        let err = CredentialBundle::from_pem(&dev.server.cert_pem, &dev.server.cert_pem, &dev.ca_pem)
            .unwrap_err();
        assert!(matches!(err, TlsError::MissingPrivateKey));
    }

    #[test]
    fn bundle_requires_ca_pool() {
        let dev = dev();
        let err = CredentialBundle::from_pem(&dev.server.cert_pem, &dev.server.key_pem, "")
            .unwrap_err();
        assert!(matches!(err, TlsError::NoTrustedRoots));
    }

    #[test]
    fn debug_output_redacts_key() {
        let dev = dev();
        let bundle = dev.client_bundle().unwrap();
        let rendered = format!("{bundle:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("PRIVATE KEY"));
    }
}
