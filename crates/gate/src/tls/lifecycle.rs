//! Certificate lifecycle
//!
//! Runs once before the TLS listener binds and guarantees that the certificate
//! directory holds material issued for the current canonical domain.
//!
//! # Flow
//!
//! 1. Work out the canonical domain (configured name or gateway address)
//! 2. Compare with the stored domain record
//! 3. Reuse stored material when the record matches and the certificate is
//!    present, parses, names the domain and is not about to expire
//! 4. Otherwise wipe the directory and generate with the full alternate-name
//!    list, falling back to a minimal certificate if that fails
//! 5. Persist material and a fresh domain record
//!
//! The gateway address is only discovered when the domain or the alternate
//! names need it, so reusing material for a configured domain runs no
//! external commands.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use warden_config::{CertBackend, Config, DomainPolicy};

use super::error::CertificateError;
use super::gateway::{CommandChainDiscovery, GatewayDiscovery};
use super::generator::{AltName, CertificateGenerator, NativeGenerator, OpensslGenerator};
use super::inspect::{inspect, CertificateSummary};
use super::storage::{CertificateMaterial, CertificateStorage, DomainRecord};

/// Stored certificates closer than this to expiry are regenerated
pub const RENEW_BEFORE_DAYS: i64 = 30;

/// Certificate ready for the TLS listener
#[derive(Debug, Clone)]
pub struct ProvisionedCertificate {
    pub material: CertificateMaterial,
    /// Common name the material was issued for
    pub domain: String,
    /// False when stored material was reused as is
    pub regenerated: bool,
}

/// Keeps the certificate directory in step with the domain policy
pub struct CertificateManager {
    storage: CertificateStorage,
    generator: Arc<dyn CertificateGenerator>,
    discovery: Arc<dyn GatewayDiscovery>,
    renew_before: chrono::Duration,
}

impl CertificateManager {
    pub fn new(
        storage: CertificateStorage,
        generator: Arc<dyn CertificateGenerator>,
        discovery: Arc<dyn GatewayDiscovery>,
    ) -> Self {
        Self {
            storage,
            generator,
            discovery,
            renew_before: chrono::Duration::days(RENEW_BEFORE_DAYS),
        }
    }

    /// Manager wired from configuration: directory, backend and tool timeout
    pub fn from_config(config: &Config) -> Result<Self, CertificateError> {
        let storage = CertificateStorage::new(&config.cert_dir)?;
        let timeout = Duration::from_secs(config.tool_timeout_secs);
        let generator: Arc<dyn CertificateGenerator> = match config.cert_backend {
            CertBackend::Openssl => Arc::new(OpensslGenerator::new(timeout)),
            CertBackend::Native => Arc::new(NativeGenerator::new()),
        };
        Ok(Self::new(
            storage,
            generator,
            Arc::new(CommandChainDiscovery::new(timeout)),
        ))
    }

    pub fn storage(&self) -> &CertificateStorage {
        &self.storage
    }

    /// Make sure usable material exists for the policy's canonical domain.
    ///
    /// On error the caller must not start a TLS listener.
    pub async fn ensure_certificate(
        &self,
        policy: &DomainPolicy,
    ) -> Result<ProvisionedCertificate, CertificateError> {
        let mut gateway = None;
        let domain = match configured_domain(policy) {
            Some(domain) => domain,
            None => {
                let address = self.discovery.discover().await;
                gateway = Some(address);
                address.to_string()
            }
        };
        debug!(domain = %domain, "Computed canonical domain");

        let record = match self.storage.load_record() {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Could not read domain record, regenerating certificate");
                None
            }
        };

        let changed = match &record {
            Some(record) if record.domain == domain => false,
            Some(record) => {
                info!(
                    previous = %record.domain,
                    domain = %domain,
                    "Certificate domain changed"
                );
                true
            }
            None => true,
        };

        if !changed {
            if let Some(material) = self.storage.load_material()? {
                match self.check_reusable(&material, &domain) {
                    Ok(summary) => {
                        info!(
                            domain = %domain,
                            expires = %summary.not_after,
                            "Reusing stored certificate"
                        );
                        return Ok(ProvisionedCertificate {
                            material,
                            domain,
                            regenerated: false,
                        });
                    }
                    Err(reason) => {
                        info!(domain = %domain, reason = %reason, "Stored certificate not reusable");
                    }
                }
            }
        }

        // Nothing stale may outlive a failed regeneration
        self.storage.remove_all()?;

        let gateway = match gateway {
            Some(address) => address,
            None => self.discovery.discover().await,
        };
        let alt_names = alternate_names(&domain, gateway, &policy.local_suffix);
        let material = self.generate(&domain, &alt_names).await?;

        self.storage.save_material(&material)?;

        let record = DomainRecord::new(domain.clone(), Utc::now());
        if let Err(e) = self.storage.save_record(&record) {
            // Material is on disk; the next start will simply regenerate
            error!(domain = %domain, error = %e, "Failed to save domain record");
        }

        Ok(ProvisionedCertificate {
            material,
            domain,
            regenerated: true,
        })
    }

    /// Extended attempt first, then a certificate without alternate names
    async fn generate(
        &self,
        domain: &str,
        alt_names: &[AltName],
    ) -> Result<CertificateMaterial, CertificateError> {
        info!(
            domain = %domain,
            backend = self.generator.name(),
            alt_names = %join_names(alt_names),
            "Generating certificate"
        );

        let extended = match self.generator.generate(domain, alt_names).await {
            Ok(material) => return Ok(material),
            Err(e) => e,
        };

        warn!(
            domain = %domain,
            error = %extended,
            "Certificate with alternate names failed, retrying without them; some clients may reject it"
        );

        self.generator
            .generate(domain, &[])
            .await
            .map_err(|source| CertificateError::Generation {
                domain: domain.to_string(),
                source,
            })
    }

    fn check_reusable(
        &self,
        material: &CertificateMaterial,
        domain: &str,
    ) -> Result<CertificateSummary, String> {
        let summary = inspect(&material.cert_pem).map_err(|e| e.to_string())?;

        if summary.common_name.as_deref() != Some(domain) {
            return Err(format!(
                "issued for {:?}, not {}",
                summary.common_name.as_deref().unwrap_or("<none>"),
                domain
            ));
        }
        if summary.expires_within(Utc::now(), self.renew_before) {
            return Err(format!("expires at {}", summary.not_after));
        }
        Ok(summary)
    }
}

/// Name the certificate is issued for.
///
/// An explicit domain wins; with domain mode on, a bare host name gets the
/// local suffix appended. Without a domain the gateway address is used.
pub fn canonical_domain(policy: &DomainPolicy, gateway: IpAddr) -> String {
    configured_domain(policy).unwrap_or_else(|| gateway.to_string())
}

/// Canonical domain when it does not depend on the gateway
fn configured_domain(policy: &DomainPolicy) -> Option<String> {
    let name = policy
        .domain_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())?;

    if policy.use_domain && !name.contains('.') && !policy.local_suffix.is_empty() {
        Some(format!("{}.{}", name, policy.local_suffix))
    } else {
        Some(name.to_string())
    }
}

/// Alternate names for a fresh certificate, without duplicates.
///
/// The domain, the gateway, `localhost`, `127.0.0.1` and `0.0.0.0`, plus the
/// domain with the local suffix stripped when it carries one.
pub fn alternate_names(domain: &str, gateway: IpAddr, local_suffix: &str) -> Vec<AltName> {
    let mut names = vec![
        AltName::from_host(domain),
        AltName::Ip(gateway),
        AltName::Dns("localhost".to_string()),
        AltName::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        AltName::Ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
    ];

    if let Some(short) = strip_local_suffix(domain, local_suffix) {
        names.push(AltName::Dns(short.to_string()));
    }

    let mut unique = Vec::with_capacity(names.len());
    for name in names {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique
}

fn strip_local_suffix<'a>(domain: &'a str, local_suffix: &str) -> Option<&'a str> {
    if local_suffix.is_empty() || domain.parse::<IpAddr>().is_ok() {
        return None;
    }
    let split = domain.len().checked_sub(local_suffix.len() + 1)?;
    let (short, suffix) = (domain.get(..split)?, domain.get(split..)?);
    let matches = suffix.starts_with('.') && suffix[1..].eq_ignore_ascii_case(local_suffix);
    (matches && !short.is_empty()).then_some(short)
}

fn join_names(names: &[AltName]) -> String {
    names
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::error::GenerateError;
    use crate::tls::gateway::StaticGateway;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const GATEWAY: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 8, 1));

    /// Native generator that counts calls and can refuse alternate names
    #[derive(Default)]
    struct RecordingGenerator {
        calls: AtomicUsize,
        reject_alt_names: bool,
        fail_always: bool,
        seen: Mutex<Vec<(String, Vec<AltName>)>>,
    }

    impl RecordingGenerator {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CertificateGenerator for RecordingGenerator {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn generate(
            &self,
            common_name: &str,
            alt_names: &[AltName],
        ) -> Result<CertificateMaterial, GenerateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((common_name.to_string(), alt_names.to_vec()));

            if self.fail_always || (self.reject_alt_names && !alt_names.is_empty()) {
                return Err(GenerateError::ToolFailed {
                    step: "openssl req",
                    status: "exit status: 1".into(),
                    stderr: "unknown option -extensions".into(),
                });
            }
            NativeGenerator::new().generate(common_name, alt_names).await
        }
    }

    /// Fixed gateway that counts lookups
    #[derive(Default)]
    struct CountingGateway {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl GatewayDiscovery for CountingGateway {
        async fn discover(&self) -> IpAddr {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            GATEWAY
        }
    }

    fn policy(domain: Option<&str>, use_domain: bool) -> DomainPolicy {
        DomainPolicy {
            use_domain,
            domain_name: domain.map(str::to_string),
            local_suffix: "lan".to_string(),
        }
    }

    fn manager(dir: &TempDir, generator: Arc<RecordingGenerator>) -> CertificateManager {
        let storage = CertificateStorage::new(&dir.path().join("certs")).unwrap();
        CertificateManager::new(storage, generator, Arc::new(StaticGateway(GATEWAY)))
    }

    #[test]
    fn test_canonical_domain() {
        assert_eq!(canonical_domain(&policy(Some("files.lan"), true), GATEWAY), "files.lan");
        assert_eq!(canonical_domain(&policy(Some("files"), true), GATEWAY), "files.lan");
        assert_eq!(canonical_domain(&policy(Some("files"), false), GATEWAY), "files");
        assert_eq!(canonical_domain(&policy(None, true), GATEWAY), "192.168.8.1");
        assert_eq!(canonical_domain(&policy(Some("  "), true), GATEWAY), "192.168.8.1");
    }

    #[test]
    fn test_alternate_names() {
        let names = alternate_names("files.lan", GATEWAY, "lan");
        assert_eq!(
            join_names(&names),
            "DNS:files.lan,IP:192.168.8.1,DNS:localhost,IP:127.0.0.1,IP:0.0.0.0,DNS:files"
        );

        // No suffix, nothing stripped
        let names = alternate_names("files.home", GATEWAY, "lan");
        assert!(!names.contains(&AltName::Dns("files".into())));

        // Domain equal to the gateway collapses to one IP entry
        let names = alternate_names("192.168.8.1", GATEWAY, "lan");
        assert_eq!(names.iter().filter(|n| **n == AltName::Ip(GATEWAY)).count(), 1);
    }

    #[test]
    fn test_strip_local_suffix() {
        assert_eq!(strip_local_suffix("files.lan", "lan"), Some("files"));
        assert_eq!(strip_local_suffix("FILES.LAN", "lan"), Some("FILES"));
        assert_eq!(strip_local_suffix("a.lan.lan", "lan"), Some("a.lan"));
        assert_eq!(strip_local_suffix("files.plan", "lan"), None);
        assert_eq!(strip_local_suffix(".lan", "lan"), None);
        assert_eq!(strip_local_suffix("lan", "lan"), None);
        assert_eq!(strip_local_suffix("files.lan", ""), None);
    }

    #[tokio::test]
    async fn test_first_run_generates_and_records() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(RecordingGenerator::default());
        let manager = manager(&dir, generator.clone());

        let cert = manager
            .ensure_certificate(&policy(Some("a.lan"), true))
            .await
            .unwrap();

        assert!(cert.regenerated);
        assert_eq!(cert.domain, "a.lan");
        assert_eq!(generator.calls(), 1);

        let record = manager.storage().load_record().unwrap().unwrap();
        assert_eq!(record.domain, "a.lan");
        assert_eq!(manager.storage().load_material().unwrap(), Some(cert.material));

        let (cn, sans) = generator.seen.lock().unwrap()[0].clone();
        assert_eq!(cn, "a.lan");
        assert!(sans.contains(&AltName::Dns("a".into())));
        assert!(sans.contains(&AltName::Ip(GATEWAY)));
    }

    #[tokio::test]
    async fn test_unchanged_domain_reuses_material() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(RecordingGenerator::default());
        let manager = manager(&dir, generator.clone());
        let policy = policy(Some("a.lan"), true);

        let first = manager.ensure_certificate(&policy).await.unwrap();
        let cert_bytes = fs::read(manager.storage().cert_path()).unwrap();

        let second = manager.ensure_certificate(&policy).await.unwrap();
        assert!(!second.regenerated);
        assert_eq!(generator.calls(), 1);
        assert_eq!(second.material, first.material);
        assert_eq!(fs::read(manager.storage().cert_path()).unwrap(), cert_bytes);
    }

    #[tokio::test]
    async fn test_domain_change_replaces_material() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(RecordingGenerator::default());
        let manager = manager(&dir, generator.clone());

        let first = manager
            .ensure_certificate(&policy(Some("a.lan"), true))
            .await
            .unwrap();
        let second = manager
            .ensure_certificate(&policy(Some("b.lan"), true))
            .await
            .unwrap();

        assert!(second.regenerated);
        assert_eq!(generator.calls(), 2);
        assert_ne!(second.material, first.material);
        assert_eq!(
            manager.storage().load_record().unwrap().unwrap().domain,
            "b.lan"
        );
        let summary = inspect(&manager.storage().load_material().unwrap().unwrap().cert_pem).unwrap();
        assert_eq!(summary.common_name.as_deref(), Some("b.lan"));
    }

    #[tokio::test]
    async fn test_missing_record_forces_regeneration() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(RecordingGenerator::default());
        let manager = manager(&dir, generator.clone());
        let policy = policy(Some("a.lan"), true);

        manager.ensure_certificate(&policy).await.unwrap();
        fs::remove_file(manager.storage().record_path()).unwrap();

        let again = manager.ensure_certificate(&policy).await.unwrap();
        assert!(again.regenerated);
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_foreign_certificate_is_replaced() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(RecordingGenerator::default());
        let manager = manager(&dir, generator.clone());

        // Record says a.lan but the file on disk was issued for someone else
        let foreign = NativeGenerator::new().generate("other.lan", &[]).await.unwrap();
        manager.storage().save_material(&foreign).unwrap();
        manager
            .storage()
            .save_record(&DomainRecord::new("a.lan", Utc::now()))
            .unwrap();

        let cert = manager
            .ensure_certificate(&policy(Some("a.lan"), true))
            .await
            .unwrap();
        assert!(cert.regenerated);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_regeneration_leaves_no_foreign_certificate() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(RecordingGenerator {
            fail_always: true,
            ..Default::default()
        });
        let manager = manager(&dir, generator.clone());

        let foreign = NativeGenerator::new().generate("other.lan", &[]).await.unwrap();
        manager.storage().save_material(&foreign).unwrap();
        manager
            .storage()
            .save_record(&DomainRecord::new("a.lan", Utc::now()))
            .unwrap();

        let err = manager
            .ensure_certificate(&policy(Some("a.lan"), true))
            .await
            .unwrap_err();

        assert!(matches!(err, CertificateError::Generation { .. }));
        assert!(manager.storage().load_record().unwrap().is_none());
        assert!(!manager.storage().cert_path().exists());
        assert!(!manager.storage().key_path().exists());
    }

    #[tokio::test]
    async fn test_reuse_with_configured_domain_skips_discovery() {
        let dir = TempDir::new().unwrap();
        let storage = CertificateStorage::new(&dir.path().join("certs")).unwrap();
        let discovery = Arc::new(CountingGateway::default());
        let manager = CertificateManager::new(
            storage,
            Arc::new(RecordingGenerator::default()),
            discovery.clone(),
        );
        let policy = policy(Some("a.lan"), true);

        // Generation needs the gateway for the alternate names
        manager.ensure_certificate(&policy).await.unwrap();
        assert_eq!(discovery.lookups.load(Ordering::SeqCst), 1);

        let reused = manager.ensure_certificate(&policy).await.unwrap();
        assert!(!reused.regenerated);
        assert_eq!(discovery.lookups.load(Ordering::SeqCst), 1);

        // Without a configured domain the gateway names the certificate
        manager.ensure_certificate(&self::policy(None, false)).await.unwrap();
        assert_eq!(discovery.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fallback_to_minimal_certificate() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(RecordingGenerator {
            reject_alt_names: true,
            ..Default::default()
        });
        let manager = manager(&dir, generator.clone());

        let cert = manager
            .ensure_certificate(&policy(Some("a.lan"), true))
            .await
            .unwrap();

        assert_eq!(generator.calls(), 2);
        let seen = generator.seen.lock().unwrap();
        assert!(!seen[0].1.is_empty());
        assert!(seen[1].1.is_empty());
        assert!(inspect(&cert.material.cert_pem).unwrap().alt_names.is_empty());
    }

    #[tokio::test]
    async fn test_total_failure_leaves_no_material() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(RecordingGenerator {
            fail_always: true,
            ..Default::default()
        });
        let manager = manager(&dir, generator.clone());

        let err = manager
            .ensure_certificate(&policy(Some("a.lan"), true))
            .await
            .unwrap_err();

        assert!(matches!(err, CertificateError::Generation { .. }));
        assert_eq!(generator.calls(), 2);
        assert!(manager.storage().load_material().unwrap().is_none());
        assert!(manager.storage().load_record().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_gateway_used_without_domain() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(RecordingGenerator::default());
        let manager = manager(&dir, generator.clone());

        let cert = manager.ensure_certificate(&policy(None, false)).await.unwrap();
        assert_eq!(cert.domain, "192.168.8.1");

        let (_, sans) = generator.seen.lock().unwrap()[0].clone();
        assert_eq!(sans[0], AltName::Ip(GATEWAY));
    }
}
