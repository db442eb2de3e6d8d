//! Where credential material comes from.
//!
//! The transport code only ever sees a [`CredentialBundle`]; the
//! [`CredentialSource`] implementations decide whether the PEM text is read
//! from files, environment variables or compiled-in constants.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::bundle::CredentialBundle;
use crate::error::{TlsError, TlsResult};

/// Loads a validated [`CredentialBundle`].
pub trait CredentialSource: Send + Sync {
    /// Short human-readable origin, used in logs.
    fn describe(&self) -> String;

    fn load(&self) -> TlsResult<CredentialBundle>;
}

// ── Files ─────────────────────────────────────────────────────────

/// PEM files on disk.
#[derive(Debug, Clone)]
pub struct PemFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
}

impl PemFiles {
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>, ca: impl Into<PathBuf>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
            ca: ca.into(),
        }
    }

    /// The file layout written by [`crate::DevCredentials::write_to`] for
    /// the given role (`server` or `client`).
    pub fn in_dir(dir: &Path, role: &str) -> Self {
        Self::new(
            dir.join(format!("{role}.pem")),
            dir.join(format!("{role}.key")),
            dir.join("ca.pem"),
        )
    }
}

fn read(path: &Path) -> TlsResult<String> {
    std::fs::read_to_string(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

impl CredentialSource for PemFiles {
    fn describe(&self) -> String {
        format!(
            "files(cert={}, key={}, ca={})",
            self.cert.display(),
            self.key.display(),
            self.ca.display()
        )
    }

    fn load(&self) -> TlsResult<CredentialBundle> {
        debug!(source = %self.describe(), "loading credentials");
        CredentialBundle::from_pem(read(&self.cert)?, read(&self.key)?, read(&self.ca)?)
    }
}

// ── Environment ───────────────────────────────────────────────────

/// PEM text held in `{prefix}_CERT`, `{prefix}_KEY` and `{prefix}_CA`.
#[derive(Debug, Clone)]
pub struct PemEnv {
    pub prefix: String,
}

impl PemEnv {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var(&self, suffix: &str) -> TlsResult<String> {
        let name = format!("{}_{suffix}", self.prefix);
        std::env::var(&name).map_err(|_| TlsError::MissingEnv(name))
    }
}

impl CredentialSource for PemEnv {
    fn describe(&self) -> String {
        format!("env({}_{{CERT,KEY,CA}})", self.prefix)
    }

    fn load(&self) -> TlsResult<CredentialBundle> {
        debug!(source = %self.describe(), "loading credentials");
        CredentialBundle::from_pem(self.var("CERT")?, self.var("KEY")?, self.var("CA")?)
    }
}

// ── Inline ────────────────────────────────────────────────────────

/// PEM text supplied directly, e.g. from `include_str!` or a secret store
/// client that already fetched it.
#[derive(Clone)]
pub struct InlinePem {
    pub cert: String,
    pub key: String,
    pub ca: String,
}

impl InlinePem {
    pub fn new(cert: impl Into<String>, key: impl Into<String>, ca: impl Into<String>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
            ca: ca.into(),
        }
    }
}

impl CredentialSource for InlinePem {
    fn describe(&self) -> String {
        "inline".to_string()
    }

    fn load(&self) -> TlsResult<CredentialBundle> {
        CredentialBundle::from_pem(self.cert.as_str(), self.key.as_str(), self.ca.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::DevCredentials;

    #[test]
    fn files_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let dev = DevCredentials::generate(&["localhost".to_string()]).unwrap();
        dev.write_to(dir.path()).unwrap();

        let bundle = PemFiles::in_dir(dir.path(), "client").load().unwrap();
        assert_eq!(bundle.cert_pem(), dev.client.cert_pem);
    }

    #[test]
    fn missing_file_reports_path() {
        let source = PemFiles::new("/nonexistent/c.pem", "/nonexistent/c.key", "/nonexistent/ca.pem");
        let err = source.load().unwrap_err();
        match err {
            TlsError::Read { path, .. } => assert_eq!(path, PathBuf::from("/nonexistent/c.pem")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn env_reports_missing_variable() {
        let source = PemEnv::new("TANDEM_TLS_TEST_SURELY_UNSET");
        let err = source.load().unwrap_err();
        assert!(
            matches!(err, TlsError::MissingEnv(ref name) if name == "TANDEM_TLS_TEST_SURELY_UNSET_CERT")
        );
    }

    #[test]
    fn inline_validates_material() {
        let dev = DevCredentials::generate(&["localhost".to_string()]).unwrap();
        let ok = InlinePem::new(&dev.server.cert_pem, &dev.server.key_pem, &dev.ca_pem);
        assert!(ok.load().is_ok());

        let broken = InlinePem::new(&dev.server.cert_pem, &dev.server.key_pem, "junk");
        assert!(matches!(broken.load(), Err(TlsError::NoTrustedRoots)));
    }

    #[test]
    fn sources_are_object_safe() {
        let sources: Vec<Box<dyn CredentialSource>> = vec![
            Box::new(PemFiles::new("a", "b", "c")),
            Box::new(PemEnv::new("X")),
        ];
        assert_eq!(sources.len(), 2);
        assert!(sources[1].describe().starts_with("env("));
    }
}
