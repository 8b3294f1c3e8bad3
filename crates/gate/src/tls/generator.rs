//! Self-signed certificate generation
//!
//! Two interchangeable backends behind [`CertificateGenerator`]:
//!
//! - [`OpensslGenerator`] drives the `openssl` CLI found on most routers
//! - [`NativeGenerator`] builds the certificate in-process with `rcgen`
//!
//! Both take a common name and an alternate-name list and hand back PEM
//! material. Neither touches the certificate directory; persistence belongs to
//! the lifecycle manager.

use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use tokio::process::Command;
use tracing::{debug, info, trace, warn};

use super::error::GenerateError;
use super::storage::CertificateMaterial;

/// Validity of generated certificates (10 years)
pub const VALIDITY_DAYS: u32 = 3650;

/// RSA key size used with the external tool
pub const RSA_KEY_BITS: u32 = 2048;

/// Organization placed in the certificate subject
pub const ORGANIZATION: &str = "Warden";

/// Places the `openssl` binary is looked for, in order
pub const OPENSSL_CANDIDATES: &[&str] = &["openssl", "/usr/bin/openssl", "/bin/openssl"];

/// Subject alternative name entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AltName {
    Dns(String),
    Ip(IpAddr),
}

impl AltName {
    /// IP entry when the host parses as an address, DNS entry otherwise
    pub fn from_host(host: &str) -> Self {
        match host.parse::<IpAddr>() {
            Ok(ip) => AltName::Ip(ip),
            Err(_) => AltName::Dns(host.to_string()),
        }
    }
}

impl fmt::Display for AltName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AltName::Dns(name) => write!(f, "DNS:{}", name),
            AltName::Ip(ip) => write!(f, "IP:{}", ip),
        }
    }
}

/// Produces a self-signed certificate for a common name
#[async_trait]
pub trait CertificateGenerator: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Generate a fresh key and a certificate for `common_name`.
    ///
    /// An empty `alt_names` slice requests a minimal certificate without the
    /// subjectAltName extension.
    async fn generate(
        &self,
        common_name: &str,
        alt_names: &[AltName],
    ) -> Result<CertificateMaterial, GenerateError>;
}

// ============================================================================
// External tool backend
// ============================================================================

/// Generator driving the `openssl` command line tool
#[derive(Debug, Clone)]
pub struct OpensslGenerator {
    candidates: Vec<PathBuf>,
    timeout: Duration,
}

impl OpensslGenerator {
    /// Generator probing the default binary locations
    pub fn new(timeout: Duration) -> Self {
        Self {
            candidates: OPENSSL_CANDIDATES.iter().map(PathBuf::from).collect(),
            timeout,
        }
    }

    /// Replace the binary search list
    pub fn with_candidates(mut self, candidates: Vec<PathBuf>) -> Self {
        self.candidates = candidates;
        self
    }

    /// First candidate that answers `version`.
    ///
    /// When no candidate answers and one of them hung, the timeout is
    /// reported instead of [`GenerateError::ToolNotFound`].
    pub async fn locate(&self) -> Result<PathBuf, GenerateError> {
        let mut timed_out = None;

        for candidate in &self.candidates {
            match run_tool(candidate, &["version".into()], "openssl version", self.timeout).await {
                Ok(()) => {
                    debug!(binary = %candidate.display(), "Found certificate tool");
                    return Ok(candidate.clone());
                }
                Err(e @ GenerateError::Timeout { .. }) => {
                    warn!(binary = %candidate.display(), error = %e, "Certificate tool hung");
                    timed_out.get_or_insert(e);
                }
                Err(e) => trace!(binary = %candidate.display(), error = %e, "Candidate unusable"),
            }
        }

        if let Some(e) = timed_out {
            return Err(e);
        }

        Err(GenerateError::ToolNotFound {
            tried: self
                .candidates
                .iter()
                .map(|c| c.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

#[async_trait]
impl CertificateGenerator for OpensslGenerator {
    fn name(&self) -> &'static str {
        "openssl"
    }

    async fn generate(
        &self,
        common_name: &str,
        alt_names: &[AltName],
    ) -> Result<CertificateMaterial, GenerateError> {
        let openssl = self.locate().await?;
        let scratch = tempfile::tempdir()?;
        let key_path = scratch.path().join("server.key");
        let cert_path = scratch.path().join("server.crt");

        run_tool(
            &openssl,
            &[
                "genrsa".into(),
                "-out".into(),
                key_path.display().to_string(),
                RSA_KEY_BITS.to_string(),
            ],
            "openssl genrsa",
            self.timeout,
        )
        .await?;

        let mut args = vec![
            "req".to_string(),
            "-new".into(),
            "-x509".into(),
            "-key".into(),
            key_path.display().to_string(),
            "-out".into(),
            cert_path.display().to_string(),
            "-days".into(),
            VALIDITY_DAYS.to_string(),
            "-subj".into(),
            subject(common_name),
        ];

        if !alt_names.is_empty() {
            let conf_path = scratch.path().join("openssl.cnf");
            std::fs::write(&conf_path, request_config(common_name, alt_names))?;
            args.extend([
                "-extensions".into(),
                "v3_req".into(),
                "-config".into(),
                conf_path.display().to_string(),
            ]);
        }

        run_tool(&openssl, &args, "openssl req", self.timeout).await?;

        let material = read_material(&cert_path, &key_path)?;
        info!(
            common_name = %common_name,
            alt_names = alt_names.len(),
            "Generated certificate with openssl"
        );
        Ok(material)
    }
}

/// `-subj` argument with separators in the name escaped
fn subject(common_name: &str) -> String {
    let escaped = common_name.replace('\\', "\\\\").replace('/', "\\/");
    format!("/CN={}/O={}", escaped, ORGANIZATION)
}

/// Minimal request config carrying the subjectAltName extension
fn request_config(common_name: &str, alt_names: &[AltName]) -> String {
    let sans = alt_names
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "[req]\n\
         distinguished_name = req_distinguished_name\n\
         req_extensions = v3_req\n\
         prompt = no\n\
         \n\
         [req_distinguished_name]\n\
         CN = {common_name}\n\
         O = {ORGANIZATION}\n\
         \n\
         [v3_req]\n\
         keyUsage = keyEncipherment, dataEncipherment, digitalSignature\n\
         extendedKeyUsage = serverAuth\n\
         subjectAltName = {sans}\n"
    )
}

fn read_material(cert_path: &Path, key_path: &Path) -> Result<CertificateMaterial, GenerateError> {
    let cert_pem = std::fs::read(cert_path)?;
    if cert_pem.is_empty() {
        return Err(GenerateError::EmptyOutput("certificate"));
    }
    let key_pem = std::fs::read(key_path)?;
    if key_pem.is_empty() {
        return Err(GenerateError::EmptyOutput("private key"));
    }
    Ok(CertificateMaterial { cert_pem, key_pem })
}

/// Run one tool invocation bounded by `timeout`
///
/// The child is killed when the timeout drops its future.
async fn run_tool(
    program: &Path,
    args: &[String],
    step: &'static str,
    timeout: Duration,
) -> Result<(), GenerateError> {
    trace!(program = %program.display(), ?args, "Running certificate tool");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(result) => result?,
        Err(_) => return Err(GenerateError::Timeout { step, timeout }),
    };

    if output.status.success() {
        Ok(())
    } else {
        Err(GenerateError::ToolFailed {
            step,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

// ============================================================================
// In-process backend
// ============================================================================

/// Generator using `rcgen`; no external process involved.
///
/// Keys are ECDSA P-256.
#[derive(Debug, Clone, Default)]
pub struct NativeGenerator;

impl NativeGenerator {
    pub fn new() -> Self {
        Self
    }

    fn build(common_name: &str, alt_names: &[AltName]) -> Result<CertificateMaterial, GenerateError> {
        let mut params = CertificateParams::new(Vec::<String>::new())?;

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, common_name.to_string());
        distinguished_name.push(DnType::OrganizationName, ORGANIZATION.to_string());
        params.distinguished_name = distinguished_name;

        for name in alt_names {
            let san = match name {
                AltName::Dns(dns) => SanType::DnsName(dns.as_str().try_into()?),
                AltName::Ip(ip) => SanType::IpAddress(*ip),
            };
            params.subject_alt_names.push(san);
        }

        let today = Utc::now().date_naive();
        let expiry = today + chrono::Duration::days(i64::from(VALIDITY_DAYS));
        params.not_before = rcgen::date_time_ymd(today.year(), today.month() as u8, today.day() as u8);
        params.not_after = rcgen::date_time_ymd(expiry.year(), expiry.month() as u8, expiry.day() as u8);

        let key_pair = KeyPair::generate()?;
        let cert = params.self_signed(&key_pair)?;

        Ok(CertificateMaterial {
            cert_pem: cert.pem().into_bytes(),
            key_pem: key_pair.serialize_pem().into_bytes(),
        })
    }
}

#[async_trait]
impl CertificateGenerator for NativeGenerator {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn generate(
        &self,
        common_name: &str,
        alt_names: &[AltName],
    ) -> Result<CertificateMaterial, GenerateError> {
        let material = Self::build(common_name, alt_names)?;
        info!(
            common_name = %common_name,
            alt_names = alt_names.len(),
            "Generated certificate in-process"
        );
        Ok(material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::inspect::inspect;

    fn sample_alt_names() -> Vec<AltName> {
        vec![
            AltName::Dns("files.lan".into()),
            AltName::Ip("192.168.8.1".parse().unwrap()),
            AltName::Dns("localhost".into()),
            AltName::Ip("127.0.0.1".parse().unwrap()),
        ]
    }

    #[test]
    fn test_alt_name_from_host() {
        assert_eq!(AltName::from_host("10.0.0.1"), AltName::Ip("10.0.0.1".parse().unwrap()));
        assert_eq!(AltName::from_host("files"), AltName::Dns("files".into()));
        assert_eq!(AltName::from_host("files").to_string(), "DNS:files");
        assert_eq!(AltName::from_host("::1").to_string(), "IP:::1");
    }

    #[test]
    fn test_subject_escapes_separators() {
        assert_eq!(subject("files.lan"), "/CN=files.lan/O=Warden");
        assert_eq!(subject("a/b"), "/CN=a\\/b/O=Warden");
    }

    #[test]
    fn test_request_config_lists_sans() {
        let conf = request_config("files.lan", &sample_alt_names());
        assert!(conf.contains("CN = files.lan"));
        assert!(conf.contains(
            "subjectAltName = DNS:files.lan, IP:192.168.8.1, DNS:localhost, IP:127.0.0.1"
        ));
    }

    #[tokio::test]
    async fn test_native_generator_sets_cn_and_sans() {
        let material = NativeGenerator::new()
            .generate("files.lan", &sample_alt_names())
            .await
            .unwrap();
        assert!(material.is_complete());

        let summary = inspect(&material.cert_pem).unwrap();
        assert_eq!(summary.common_name.as_deref(), Some("files.lan"));
        assert!(summary.alt_names.contains(&AltName::Dns("localhost".into())));
        assert!(summary
            .alt_names
            .contains(&AltName::Ip("192.168.8.1".parse().unwrap())));
        assert!(summary.not_after > Utc::now() + chrono::Duration::days(3000));
    }

    #[tokio::test]
    async fn test_native_generator_minimal() {
        let material = NativeGenerator::new().generate("files.lan", &[]).await.unwrap();
        let summary = inspect(&material.cert_pem).unwrap();
        assert!(summary.alt_names.is_empty());
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported() {
        let generator = OpensslGenerator::new(Duration::from_secs(2))
            .with_candidates(vec![PathBuf::from("/nonexistent/openssl")]);
        let err = generator.generate("files.lan", &[]).await.unwrap_err();
        assert!(matches!(err, GenerateError::ToolNotFound { .. }));
        assert!(err.to_string().contains("/nonexistent/openssl"));
    }

    /// Executable shell script standing in for the certificate tool
    #[cfg(unix)]
    fn stub_tool(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("openssl");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_tool_is_cut_off() {
        let dir = tempfile::tempdir().unwrap();
        let tool = stub_tool(dir.path(), "exec sleep 30");
        let generator =
            OpensslGenerator::new(Duration::from_secs(1)).with_candidates(vec![tool]);

        let started = std::time::Instant::now();
        let err = generator.generate("files.lan", &[]).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(
            matches!(err, GenerateError::Timeout { step: "openssl version", .. }),
            "unexpected error: {err}"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_generation_step_is_cut_off() {
        let dir = tempfile::tempdir().unwrap();
        let tool = stub_tool(
            dir.path(),
            "case \"$1\" in version) exit 0 ;; *) exec sleep 30 ;; esac",
        );
        let generator =
            OpensslGenerator::new(Duration::from_secs(1)).with_candidates(vec![tool]);

        let started = std::time::Instant::now();
        let err = generator.generate("files.lan", &[]).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(
            matches!(err, GenerateError::Timeout { step: "openssl genrsa", .. }),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn test_openssl_generator_sets_cn_and_sans() {
        let generator = OpensslGenerator::new(Duration::from_secs(30));
        if generator.locate().await.is_err() {
            eprintln!("openssl not installed, skipping");
            return;
        }

        let material = generator
            .generate("files.lan", &sample_alt_names())
            .await
            .unwrap();
        assert!(material.is_complete());

        let summary = inspect(&material.cert_pem).unwrap();
        assert_eq!(summary.common_name.as_deref(), Some("files.lan"));
        for name in sample_alt_names() {
            assert!(summary.alt_names.contains(&name), "missing {name}");
        }
        assert!(summary.not_after > Utc::now() + chrono::Duration::days(3000));

        let minimal = generator.generate("files.lan", &[]).await.unwrap();
        assert!(inspect(&minimal.cert_pem).unwrap().alt_names.is_empty());
    }
}
