//! Error types for certificate lifecycle management

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors from the certificate directory
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Domain record could not be encoded or decoded
    #[error("domain record error: {0}")]
    Record(#[from] serde_json::Error),
}

/// Errors from a certificate generator backend
#[derive(Debug, Error)]
pub enum GenerateError {
    /// No usable tool binary on this system
    #[error("certificate tool not found (tried {tried})")]
    ToolNotFound { tried: String },

    /// The tool ran but exited unsuccessfully
    #[error("{step} failed with {status}: {stderr}")]
    ToolFailed {
        step: &'static str,
        status: String,
        stderr: String,
    },

    /// The tool did not finish in time and was killed
    #[error("{step} timed out after {}s", .timeout.as_secs())]
    Timeout {
        step: &'static str,
        timeout: Duration,
    },

    /// In-process key or certificate generation failed
    #[error("native generation failed: {0}")]
    Native(#[from] rcgen::Error),

    /// The tool wrote nothing usable
    #[error("generator produced empty {0}")]
    EmptyOutput(&'static str),

    /// Scratch file handling failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced by [`CertificateManager::ensure_certificate`](super::CertificateManager::ensure_certificate)
#[derive(Debug, Error)]
pub enum CertificateError {
    /// Both the extended and the minimal generation attempts failed
    #[error("certificate generation failed for '{domain}': {source}")]
    Generation {
        domain: String,
        #[source]
        source: GenerateError,
    },

    /// Material could not be written or read back
    #[error("certificate storage error: {0}")]
    Storage(#[from] StorageError),

    /// Material cannot be used by the TLS stack
    #[error("unusable certificate material: {0}")]
    Unusable(String),
}

/// Errors from reading a PEM certificate
#[derive(Debug, Error)]
pub enum InspectError {
    /// Not PEM at all
    #[error("invalid PEM: {0}")]
    Pem(#[from] pem::PemError),

    /// PEM block is not a certificate
    #[error("expected a CERTIFICATE block, found {0}")]
    WrongTag(String),

    /// DER payload did not parse as X.509
    #[error("invalid X.509 certificate: {0}")]
    X509(String),
}
