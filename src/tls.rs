//! TLS identity loading.
//!
//! Reads a PEM certificate chain and private key once at startup and turns
//! them into a rustls server configuration. Client certificates are never
//! requested.

use crate::config::TlsPaths;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

/// Build a TLS acceptor from the certificate and key files.
pub fn load_acceptor(paths: &TlsPaths) -> Result<TlsAcceptor, TlsError> {
    let cert_pem =
        std::fs::read(&paths.cert).map_err(|e| TlsError::FileRead(paths.cert.clone(), e))?;
    let key_pem =
        std::fs::read(&paths.key).map_err(|e| TlsError::FileRead(paths.key.clone(), e))?;

    let config = server_config_from_pem(&cert_pem, &key_pem)?;
    debug!(
        cert = %paths.cert.display(),
        key = %paths.key.display(),
        "Loaded TLS identity"
    );
    Ok(TlsAcceptor::from(config))
}

/// Parse PEM material into a server configuration.
///
/// The first private key found in `key_pem` is used; every certificate in
/// `cert_pem` becomes part of the presented chain, leaf first.
pub fn server_config_from_pem(
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
        .collect::<Result<Vec<CertificateDer<'static>>, io::Error>>()
        .map_err(|e| TlsError::InvalidPem("certificate", e))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate);
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(key_pem))
        .map_err(|e| TlsError::InvalidPem("private key", e))?
        .ok_or(TlsError::NoPrivateKey)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(TlsError::Rejected)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(TlsError::Rejected)?;

    Ok(Arc::new(config))
}

/// TLS identity errors
#[derive(Debug)]
pub enum TlsError {
    FileRead(PathBuf, io::Error),
    InvalidPem(&'static str, io::Error),
    NoCertificate,
    NoPrivateKey,
    Rejected(rustls::Error),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::FileRead(path, e) => {
                write!(f, "Failed to read TLS file '{}': {}", path.display(), e)
            }
            TlsError::InvalidPem(what, e) => write!(f, "Malformed {what} PEM: {e}"),
            TlsError::NoCertificate => write!(f, "No certificate found in certificate file"),
            TlsError::NoPrivateKey => write!(f, "No private key found in key file"),
            TlsError::Rejected(e) => write!(f, "Certificate/key pair rejected: {e}"),
        }
    }
}

impl std::error::Error for TlsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TlsError::FileRead(_, e) | TlsError::InvalidPem(_, e) => Some(e),
            TlsError::Rejected(e) => Some(e),
            _ => None,
        }
    }
}
