//! rustls server configuration from PEM material

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tracing::debug;

use super::error::CertificateError;
use super::storage::CertificateMaterial;

/// Build a TLS server config advertising HTTP/2 and HTTP/1.1
pub fn server_config(material: &CertificateMaterial) -> Result<Arc<ServerConfig>, CertificateError> {
    let certs = rustls_pemfile::certs(&mut material.cert_pem.as_slice())
        .collect::<Result<Vec<CertificateDer<'static>>, _>>()
        .map_err(|e| CertificateError::Unusable(format!("certificate PEM: {}", e)))?;
    if certs.is_empty() {
        return Err(CertificateError::Unusable("no certificate in PEM".to_string()));
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut material.key_pem.as_slice())
        .map_err(|e| CertificateError::Unusable(format!("private key PEM: {}", e)))?
        .ok_or_else(|| CertificateError::Unusable("no private key in PEM".to_string()))?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| CertificateError::Unusable(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| CertificateError::Unusable(e.to_string()))?;

    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!("Built TLS server configuration");
    Ok(Arc::new(config))
}
