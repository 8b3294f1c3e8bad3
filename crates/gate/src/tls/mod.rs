//! Self-maintaining TLS material
//!
//! Keeps a self-signed certificate on disk that matches the configured
//! domain, regenerating it only when the domain changes or the stored copy is
//! unusable.
//!
//! # Components
//!
//! - [`CertificateManager`] - decides between reuse and regeneration
//! - [`CertificateStorage`] - the certificate directory (`server.crt`,
//!   `server.key`, `cert.info`)
//! - [`CertificateGenerator`] - `openssl` or in-process generation
//! - [`GatewayDiscovery`] - router address lookup for the CN and SANs
//! - [`server_config`] - rustls configuration for the listener
//!
//! # Example
//!
//! ```ignore
//! let storage = CertificateStorage::new(&config.cert_dir)?;
//! let manager = CertificateManager::new(
//!     storage,
//!     Arc::new(OpensslGenerator::new(Duration::from_secs(10))),
//!     Arc::new(CommandChainDiscovery::new(Duration::from_secs(3))),
//! );
//! let cert = manager.ensure_certificate(&config.domain_policy()).await?;
//! let tls = server_config(&cert.material)?;
//! ```

mod acceptor;
mod error;
mod gateway;
mod generator;
mod inspect;
mod lifecycle;
mod storage;

pub use acceptor::server_config;
pub use error::{CertificateError, GenerateError, InspectError, StorageError};
pub use gateway::{
    parse_inet_line, parse_plain_address, CommandChainDiscovery, GatewayDiscovery, Probe,
    StaticGateway, DEFAULT_GATEWAY,
};
pub use generator::{
    AltName, CertificateGenerator, NativeGenerator, OpensslGenerator, OPENSSL_CANDIDATES,
    VALIDITY_DAYS,
};
pub use inspect::{inspect, CertificateSummary};
pub use lifecycle::{
    alternate_names, canonical_domain, CertificateManager, ProvisionedCertificate,
    RENEW_BEFORE_DAYS,
};
pub use storage::{
    CertificateMaterial, CertificateStorage, DomainRecord, CERT_FILE, KEY_FILE, RECORD_FILE,
};
