//! Development certificate generation.
//!
//! Mints a self-signed CA and leaf certificates signed by it, so the mutual
//! TLS path can be exercised without any pre-provisioned material.

use std::path::Path;

use chrono::{Datelike, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, SanType,
};
use tracing::info;

use crate::bundle::CredentialBundle;
use crate::error::{TlsError, TlsResult};

const ORGANIZATION: &str = "Tandem";

/// A generated certificate and private key pair.
#[derive(Debug, Clone)]
pub struct CertKeyPair {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

/// Which side of a handshake a leaf certificate is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertUsage {
    Server,
    Client,
}

/// Valid from January 1st of last year until January 1st, `years` years
/// from now.
fn set_validity(params: &mut CertificateParams, years: i32) {
    let year = Utc::now().year();
    params.not_before = rcgen::date_time_ymd(year - 1, 1, 1);
    params.not_after = rcgen::date_time_ymd(year + years, 1, 1);
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, ORGANIZATION);
    dn.push(DnType::CommonName, common_name);
    dn
}

/// A self-signed certificate authority held in memory.
pub struct CertificateAuthority {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl CertificateAuthority {
    pub fn generate(common_name: &str) -> TlsResult<Self> {
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name = distinguished_name(common_name);

        set_validity(&mut params, 10);

        let key = KeyPair::generate()?;
        let cert = params.self_signed(&key)?;

        info!(%common_name, "generated CA certificate");
        Ok(Self { cert, key })
    }

    pub fn cert_pem(&self) -> String {
        self.cert.pem()
    }

    /// Issue a leaf certificate signed by this CA.
    ///
    /// Entries in `sans` that parse as IP addresses become IP SANs, the rest
    /// DNS SANs. Client certificates may have no SANs at all.
    pub fn issue(
        &self,
        common_name: &str,
        sans: &[String],
        usage: CertUsage,
    ) -> TlsResult<CertKeyPair> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(common_name);

        for san in sans {
            if let Ok(ip) = san.parse::<std::net::IpAddr>() {
                params.subject_alt_names.push(SanType::IpAddress(ip));
            } else {
                params
                    .subject_alt_names
                    .push(SanType::DnsName(san.clone().try_into()?));
            }
        }

        params.extended_key_usages = vec![match usage {
            CertUsage::Server => ExtendedKeyUsagePurpose::ServerAuth,
            CertUsage::Client => ExtendedKeyUsagePurpose::ClientAuth,
        }];

        set_validity(&mut params, 2);

        let key = KeyPair::generate()?;
        let cert = params.signed_by(&key, &self.cert, &self.key)?;

        info!(%common_name, sans = sans.len(), ?usage, "issued certificate");
        Ok(CertKeyPair {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }
}

/// A CA plus one server and one client certificate issued by it.
#[derive(Debug, Clone)]
pub struct DevCredentials {
    pub ca_pem: String,
    pub server: CertKeyPair,
    pub client: CertKeyPair,
}

impl DevCredentials {
    /// Generate a fresh set. `server_names` end up as SANs on the server
    /// certificate; a client must dial with one of them as its expected
    /// server name.
    pub fn generate(server_names: &[String]) -> TlsResult<Self> {
        let ca = CertificateAuthority::generate("Tandem Dev CA")?;
        let server = ca.issue("tandem-server", server_names, CertUsage::Server)?;
        let client = ca.issue("tandem-client", &[], CertUsage::Client)?;
        Ok(Self {
            ca_pem: ca.cert_pem(),
            server,
            client,
        })
    }

    pub fn server_bundle(&self) -> TlsResult<CredentialBundle> {
        CredentialBundle::from_pem(
            self.server.cert_pem.as_str(),
            self.server.key_pem.as_str(),
            self.ca_pem.as_str(),
        )
    }

    pub fn client_bundle(&self) -> TlsResult<CredentialBundle> {
        CredentialBundle::from_pem(
            self.client.cert_pem.as_str(),
            self.client.key_pem.as_str(),
            self.ca_pem.as_str(),
        )
    }

    /// Write `ca.pem`, `server.pem`, `server.key`, `client.pem` and
    /// `client.key` into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> TlsResult<()> {
        std::fs::create_dir_all(dir).map_err(|source| TlsError::Write {
            path: dir.to_path_buf(),
            source,
        })?;

        let files = [
            ("ca.pem", &self.ca_pem),
            ("server.pem", &self.server.cert_pem),
            ("server.key", &self.server.key_pem),
            ("client.pem", &self.client.cert_pem),
            ("client.key", &self.client.key_pem),
        ];
        for (name, contents) in files {
            let path = dir.join(name);
            std::fs::write(&path, contents).map_err(|source| TlsError::Write { path, source })?;
        }

        info!(dir = %dir.display(), "wrote development credentials");
        Ok(())
    }
}
