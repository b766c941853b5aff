//! TLS options and connector construction.

use crate::error::ClientError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// TLS configuration for a connection.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Enable TLS for the connection.
    pub enabled: bool,
    /// PEM-encoded CA certificate(s) for broker verification.
    /// When absent, the webpki system roots are used.
    pub ca_cert_path: Option<PathBuf>,
    /// PEM-encoded client certificate (for mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// PEM-encoded client private key (for mTLS).
    pub client_key_path: Option<PathBuf>,
    /// Skip broker certificate verification. Development only.
    pub insecure: bool,
    /// Server name for SNI; defaults to the connection host.
    pub server_name: Option<String>,
}

impl TlsOptions {
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self.enabled = true;
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self.enabled = true;
        self
    }

    pub fn with_insecure(mut self) -> Self {
        self.insecure = true;
        self.enabled = true;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Builds a connector and SNI name from the options.
pub fn connector(
    options: &TlsOptions,
    host: &str,
) -> Result<(TlsConnector, ServerName<'static>), ClientError> {
    let config = if options.insecure {
        tracing::warn!("TLS certificate verification disabled");
        insecure_config()
    } else {
        verified_config(options)?
    };

    let name = options.server_name.as_deref().unwrap_or(host);
    let server_name = ServerName::try_from(name.to_string())
        .map_err(|_| ClientError::TlsConfig(format!("invalid server name: {name}")))?;

    Ok((TlsConnector::from(Arc::new(config)), server_name))
}

fn verified_config(options: &TlsOptions) -> Result<rustls::ClientConfig, ClientError> {
    let mut roots = RootCertStore::empty();
    match options.ca_cert_path {
        Some(ref ca_path) => {
            for cert in read_pem_certs(ca_path)? {
                roots
                    .add(cert)
                    .map_err(|e| ClientError::TlsConfig(format!("invalid CA cert: {e}")))?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);

    match (&options.client_cert_path, &options.client_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let certs = read_pem_certs(cert_path)?;
            let key = read_pem_key(key_path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ClientError::TlsConfig(format!("invalid client cert/key: {e}")))
        }
        _ => Ok(builder.with_no_client_auth()),
    }
}

/// Accepts whichever certificate the broker presents, while still checking
/// handshake signatures against it with the default crypto provider. Skips
/// chain and hostname validation only.
#[derive(Debug)]
struct AcceptAnyServerCert(rustls::crypto::WebPkiSupportedAlgorithms);

impl AcceptAnyServerCert {
    fn new() -> Self {
        let provider = rustls::crypto::aws_lc_rs::default_provider();
        Self(provider.signature_verification_algorithms)
    }
}

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.supported_schemes()
    }
}

fn insecure_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new()))
        .with_no_client_auth()
}

fn open_pem(path: &Path) -> Result<BufReader<File>, ClientError> {
    let file = File::open(path)
        .map_err(|e| ClientError::TlsConfig(format!("cannot open PEM file {path:?}: {e}")))?;
    Ok(BufReader::new(file))
}

fn read_pem_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ClientError> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut open_pem(path)?)
        .collect::<Result<_, _>>()
        .map_err(|e| ClientError::TlsConfig(format!("invalid cert file {path:?}: {e}")))?;
    if certs.is_empty() {
        return Err(ClientError::TlsConfig(format!(
            "no certificates found in {path:?}"
        )));
    }
    Ok(certs)
}

fn read_pem_key(path: &Path) -> Result<PrivateKeyDer<'static>, ClientError> {
    rustls_pemfile::private_key(&mut open_pem(path)?)
        .map_err(|e| ClientError::TlsConfig(format!("invalid key file {path:?}: {e}")))?
        .ok_or_else(|| ClientError::TlsConfig(format!("no private key found in {path:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cert_file_is_reported() {
        let result = read_pem_certs(Path::new("/nonexistent/cert.pem"));
        assert!(result.unwrap_err().to_string().contains("cannot open"));
    }

    #[test]
    fn missing_key_file_is_reported() {
        let result = read_pem_key(Path::new("/nonexistent/key.pem"));
        assert!(result.unwrap_err().to_string().contains("cannot open"));
    }

    #[test]
    fn empty_cert_file_is_reported() {
        let dir = std::env::temp_dir();
        let path = dir.join("rabbitstream-empty-cert.pem");
        std::fs::write(&path, b"").unwrap();
        let result = read_pem_certs(&path);
        std::fs::remove_file(&path).ok();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("no certificates found"));
    }

    #[test]
    fn insecure_verifier_advertises_provider_schemes() {
        use rustls::client::danger::ServerCertVerifier;
        let verifier = AcceptAnyServerCert::new();
        assert!(!verifier.supported_verify_schemes().is_empty());
    }

    #[test]
    fn options_builders_enable_tls() {
        assert!(!TlsOptions::default().enabled);
        assert!(TlsOptions::new().enabled);
        assert!(TlsOptions::default().with_insecure().enabled);
        assert!(TlsOptions::default().with_ca_cert("/ca.pem").enabled);
    }

    #[test]
    fn invalid_server_name_is_rejected() {
        let options = TlsOptions::new().with_server_name("not a hostname");
        assert!(matches!(
            connector(&options, "127.0.0.1"),
            Err(ClientError::TlsConfig(_))
        ));
    }
}
