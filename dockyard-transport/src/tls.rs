//! TLS support using Rustls.
//!
//! - [`TlsMaterial`] - PEM-encoded client certificate, key and CA
//! - [`TlsClientConfig`] - Client-side TLS configuration built from it
//!
//! ## Server Verification
//!
//! With a CA the server certificate is checked against that CA only. Without
//! one the server certificate is accepted as presented, matching how engine
//! clients treat TLS material that carries no CA.
//!
//! ```rust,ignore
//! use dockyard_transport::{TlsClientConfig, TlsMaterial};
//!
//! let material = TlsMaterial::from_dir("/home/me/.docker")?;
//! let config = TlsClientConfig::from_material(&material)?;
//! ```

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use dockyard_core::DockyardError;

/// PEM-encoded TLS material for a client.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    /// Client certificate chain.
    pub cert: Option<Vec<u8>>,
    /// Client private key.
    pub key: Option<Vec<u8>>,
    /// CA the server certificate must chain to.
    pub ca: Option<Vec<u8>>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("cert", &self.cert.is_some())
            .field("key", &self.key.is_some())
            .field("ca", &self.ca.is_some())
            .finish()
    }
}

impl TlsMaterial {
    /// Material from PEM blocks already in memory.
    #[must_use]
    pub fn from_pem(
        cert: impl Into<Vec<u8>>,
        key: impl Into<Vec<u8>>,
        ca: Option<Vec<u8>>,
    ) -> Self {
        Self {
            cert: Some(cert.into()),
            key: Some(key.into()),
            ca,
        }
    }

    /// Read material from PEM files. A `None` path leaves that part unset.
    pub fn from_files(
        cert: Option<&Path>,
        key: Option<&Path>,
        ca: Option<&Path>,
    ) -> Result<Self, DockyardError> {
        let read_cert = |path: &Path| {
            fs::read(path).map_err(|e| {
                DockyardError::InvalidCertificate(format!("{}: {e}", path.display()))
            })
        };

        Ok(Self {
            cert: cert.map(read_cert).transpose()?,
            key: key.map(read_cert).transpose()?,
            ca: ca
                .map(|path| {
                    fs::read(path)
                        .map_err(|e| DockyardError::InvalidCa(format!("{}: {e}", path.display())))
                })
                .transpose()?,
        })
    }

    /// Read `cert.pem`, `key.pem` and `ca.pem` from a directory.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, DockyardError> {
        let dir = dir.as_ref();
        Self::from_files(
            Some(&dir.join("cert.pem")),
            Some(&dir.join("key.pem")),
            Some(&dir.join("ca.pem")),
        )
    }
}

/// TLS configuration for clients.
#[derive(Clone)]
pub struct TlsClientConfig {
    config: Arc<ClientConfig>,
    verifies_server: bool,
}

impl std::fmt::Debug for TlsClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsClientConfig")
            .field("verifies_server", &self.verifies_server)
            .finish_non_exhaustive()
    }
}

impl TlsClientConfig {
    /// Verify servers against Mozilla's root certificates, no client auth.
    ///
    /// Used for `https://` endpoints given without TLS material.
    pub fn new() -> Result<Self, DockyardError> {
        let root_store = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| DockyardError::InvalidCertificate(e.to_string()))?
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
            verifies_server: true,
        })
    }

    /// Build a configuration from PEM material.
    ///
    /// Cert and key must both be present or both absent. Without a CA the
    /// server certificate is not verified.
    pub fn from_material(material: &TlsMaterial) -> Result<Self, DockyardError> {
        let provider = provider();
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| DockyardError::InvalidCertificate(e.to_string()))?;

        let verifies_server = material.ca.is_some();
        let builder = match &material.ca {
            Some(ca) => builder.with_root_certificates(load_root_certs(ca)?),
            None => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider))),
        };

        let config = match (&material.cert, &material.key) {
            (Some(cert), Some(key)) => {
                let chain = load_certs(cert)
                    .map_err(|e| DockyardError::InvalidCertificate(e.to_string()))?;
                if chain.is_empty() {
                    return Err(DockyardError::InvalidCertificate(
                        "no certificate found in PEM".into(),
                    ));
                }
                let key = load_private_key(key)
                    .map_err(|e| DockyardError::InvalidCertificate(e.to_string()))?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| DockyardError::InvalidCertificate(e.to_string()))?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(DockyardError::InvalidCertificate(
                    "certificate and key must be given together".into(),
                ));
            }
        };

        Ok(Self {
            config: Arc::new(config),
            verifies_server,
        })
    }

    /// Whether the server certificate is checked.
    #[must_use]
    pub fn verifies_server(&self) -> bool {
        self.verifies_server
    }

    /// Get the underlying Rustls client config.
    #[must_use]
    pub fn rustls_config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Load a certificate chain from PEM bytes.
fn load_certs(pem: &[u8]) -> io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut &pem[..]).collect()
}

/// Load a private key from PEM bytes.
fn load_private_key(pem: &[u8]) -> io::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])?
        .ok_or_else(|| io::Error::other("no private key found in PEM"))
}

/// Build a root store from CA PEM bytes.
fn load_root_certs(pem: &[u8]) -> Result<RootCertStore, DockyardError> {
    let certs = load_certs(pem).map_err(|e| DockyardError::InvalidCa(e.to_string()))?;
    if certs.is_empty() {
        return Err(DockyardError::InvalidCa("could not add root CA PEM".into()));
    }

    let mut store = RootCertStore::empty();
    for cert in certs {
        store
            .add(cert)
            .map_err(|e| DockyardError::InvalidCa(format!("invalid root certificate: {e}")))?;
    }
    Ok(store)
}

/// Create a `ServerName` from a string.
pub fn server_name(name: &str) -> io::Result<ServerName<'static>> {
    ServerName::try_from(name.to_string())
        .map_err(|e| io::Error::other(format!("invalid server name: {e}")))
}

/// Verifier used when no CA is configured.
///
/// Signatures are still checked so the handshake proves key possession.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use rcgen::{CertificateParams, DnType, KeyPair};

    use super::*;

    /// Self-signed certificate and key for `localhost`.
    fn self_signed() -> (Vec<u8>, Vec<u8>) {
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, "localhost");
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        (cert.pem().into_bytes(), key.serialize_pem().into_bytes())
    }

    #[test]
    fn test_material_without_ca_skips_verification() {
        let (cert, key) = self_signed();
        let config = TlsClientConfig::from_material(&TlsMaterial::from_pem(cert, key, None)).unwrap();
        assert!(!config.verifies_server());
    }

    #[test]
    fn test_material_with_ca() {
        let (cert, key) = self_signed();
        let material = TlsMaterial::from_pem(cert.clone(), key, Some(cert));
        let config = TlsClientConfig::from_material(&material).unwrap();
        assert!(config.verifies_server());
    }

    #[test]
    fn test_key_as_ca_is_invalid_ca() {
        let (cert, key) = self_signed();
        let material = TlsMaterial::from_pem(cert, key.clone(), Some(key));
        assert!(matches!(
            TlsClientConfig::from_material(&material),
            Err(DockyardError::InvalidCa(_))
        ));
    }

    #[test]
    fn test_garbage_key_is_invalid_certificate() {
        let (cert, _) = self_signed();
        let material = TlsMaterial::from_pem(cert, b"not a key".to_vec(), None);
        assert!(matches!(
            TlsClientConfig::from_material(&material),
            Err(DockyardError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn test_cert_without_key_is_rejected() {
        let (cert, _) = self_signed();
        let material = TlsMaterial {
            cert: Some(cert),
            ..Default::default()
        };
        assert!(matches!(
            TlsClientConfig::from_material(&material),
            Err(DockyardError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn test_ca_only_material() {
        let (cert, _) = self_signed();
        let material = TlsMaterial {
            ca: Some(cert),
            ..Default::default()
        };
        assert!(TlsClientConfig::from_material(&material).unwrap().verifies_server());
    }

    #[test]
    fn test_from_dir() {
        let (cert, key) = self_signed();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cert.pem"), &cert).unwrap();
        fs::write(dir.path().join("key.pem"), &key).unwrap();
        fs::write(dir.path().join("ca.pem"), &cert).unwrap();

        let material = TlsMaterial::from_dir(dir.path()).unwrap();
        assert_eq!(material, TlsMaterial::from_pem(cert.clone(), key, Some(cert)));
    }

    #[test]
    fn test_from_dir_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            TlsMaterial::from_dir(dir.path()),
            Err(DockyardError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn test_webpki_roots() {
        assert!(TlsClientConfig::new().unwrap().verifies_server());
    }

    #[test]
    fn test_server_name() {
        assert!(server_name("localhost").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("not a host").is_err());
    }
}
