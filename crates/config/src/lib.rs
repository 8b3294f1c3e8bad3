//! Warden configuration
//!
//! Static settings for the access gate, read once at startup.
//!
//! Two file formats are understood:
//!
//! - **UCI** (`/etc/config/fileshare` on OpenWrt): `option key 'value'` lines
//! - **KDL** (any `*.kdl` file): grouped `server`, `access` and `tls` blocks
//!
//! Both formats feed the same key table, so every setting has exactly one
//! parse-and-fallback rule. A malformed or out-of-range value never aborts
//! startup: it is replaced by its default and reported as a
//! [`ConfigWarning`].

mod errors;
mod kdl_doc;
mod settings;
mod uci;
mod validate;

use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use validator::Validate;

pub use errors::ConfigError;
pub use settings::{ConfigWarning, Setting};

/// Default configuration file location (OpenWrt UCI package)
pub const DEFAULT_CONFIG_PATH: &str = "/etc/config/fileshare";

/// Secret used when none is configured
pub const DEFAULT_PASSWORD: &str = "123456";

/// Domain used for the certificate when none is configured
pub const DEFAULT_DOMAIN_NAME: &str = "fileshare.lan";

/// Suffix appended to bare host names in domain mode
pub const DEFAULT_LOCAL_SUFFIX: &str = "lan";

// ============================================================================
// Configuration model
// ============================================================================

/// How certificates are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CertBackend {
    /// Shell out to the `openssl` command line tool
    #[default]
    Openssl,
    /// Generate in-process
    Native,
}

impl CertBackend {
    fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openssl" => Some(CertBackend::Openssl),
            "native" | "rcgen" | "builtin" => Some(CertBackend::Native),
            _ => None,
        }
    }
}

impl fmt::Display for CertBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertBackend::Openssl => write!(f, "openssl"),
            CertBackend::Native => write!(f, "native"),
        }
    }
}

/// Configuration file syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Uci,
    Kdl,
}

impl ConfigFormat {
    /// Pick the format from a file name: `*.kdl` is KDL, anything else UCI
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("kdl") => ConfigFormat::Kdl,
            _ => ConfigFormat::Uci,
        }
    }
}

/// Effective Warden configuration
#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
pub struct Config {
    /// Plain HTTP port
    #[validate(range(min = 1))]
    pub port: u16,

    /// Address every listener binds to
    #[validate(custom(function = "validate::ip_address"))]
    pub bind_address: String,

    /// Shared access secret
    #[serde(skip_serializing)]
    #[validate(length(min = 1))]
    pub password: String,

    /// Host or address fragments trusted without a password on private origins
    pub allowed_hosts: Vec<String>,

    /// Serve over TLS
    pub enable_https: bool,

    /// TLS port
    #[validate(range(min = 1))]
    pub https_port: u16,

    /// Append the local suffix to bare host names
    pub use_domain: bool,

    /// Explicit certificate domain; `None` means "use the gateway address"
    #[validate(length(min = 1, max = 253), custom(function = "validate::host_name"))]
    pub domain_name: Option<String>,

    /// Local DNS suffix, without the leading dot
    #[validate(length(min = 1, max = 63), custom(function = "validate::dns_label"))]
    pub local_suffix: String,

    /// Directory holding certificate, key and domain record
    pub cert_dir: PathBuf,

    /// Certificate generator
    pub cert_backend: CertBackend,

    /// Upper bound for one external tool invocation
    #[validate(range(min = 1, max = 300))]
    pub tool_timeout_secs: u64,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`
    pub trust_proxy: bool,

    /// Cap on origins held in the lockout table
    #[validate(range(min = 1, max = 1_000_000))]
    pub max_tracked_origins: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_address: "0.0.0.0".to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            allowed_hosts: Vec::new(),
            enable_https: false,
            https_port: 3443,
            use_domain: false,
            domain_name: Some(DEFAULT_DOMAIN_NAME.to_string()),
            local_suffix: DEFAULT_LOCAL_SUFFIX.to_string(),
            cert_dir: PathBuf::from("certs"),
            cert_backend: CertBackend::Openssl,
            tool_timeout_secs: 10,
            trust_proxy: false,
            max_tracked_origins: 10_000,
        }
    }
}

/// A parsed configuration together with everything that was substituted
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub warnings: Vec<ConfigWarning>,
}

impl Config {
    /// Parse configuration text.
    ///
    /// Only a syntactically broken KDL document is an error; every bad value
    /// is replaced by its default and listed in the returned warnings.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<LoadedConfig, ConfigError> {
        let settings = match format {
            ConfigFormat::Uci => uci::parse(content),
            ConfigFormat::Kdl => kdl_doc::parse(content)?,
        };

        let mut config = Config::default();
        let mut warnings = settings::apply(&mut config, &settings);
        warnings.extend(validate::enforce(&mut config));

        debug!(
            settings = settings.len(),
            warnings = warnings.len(),
            "Parsed configuration"
        );

        Ok(LoadedConfig { config, warnings })
    }

    /// Read and parse a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<LoadedConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, ConfigFormat::detect(path))
    }

    /// Load configuration for the running service.
    ///
    /// Never fails: a missing or unreadable file yields the defaults. All
    /// substitutions are logged as warnings.
    pub fn load(path: impl AsRef<Path>) -> Config {
        let path = path.as_ref();

        if !path.exists() {
            warn!(
                path = %path.display(),
                "Configuration file not found, using defaults"
            );
            return Config::default();
        }

        match Self::from_file(path) {
            Ok(loaded) => {
                for warning in &loaded.warnings {
                    warn!(key = %warning.key, "{}", warning.message);
                }
                loaded.config.log_summary();
                loaded.config
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load configuration, using defaults"
                );
                Config::default()
            }
        }
    }

    /// Whether the shared secret was left at its built-in value
    pub fn uses_default_password(&self) -> bool {
        self.password == DEFAULT_PASSWORD
    }

    /// Parsed bind address
    pub fn bind_ip(&self) -> IpAddr {
        self.bind_address
            .parse()
            .unwrap_or(IpAddr::from([0, 0, 0, 0]))
    }

    /// Settings consumed by the access policy engine
    pub fn access_policy(&self) -> AccessPolicyConfig {
        AccessPolicyConfig {
            secret: self.password.clone(),
            allow_list_fragments: self.allowed_hosts.clone(),
            https_enabled: self.enable_https,
            domain_policy: self.domain_policy(),
        }
    }

    /// Settings consumed by the certificate lifecycle manager
    pub fn domain_policy(&self) -> DomainPolicy {
        DomainPolicy {
            use_domain: self.use_domain,
            domain_name: self.domain_name.clone(),
            local_suffix: self.local_suffix.clone(),
        }
    }

    fn log_summary(&self) {
        let password = if self.password.is_empty() { "unset" } else { "set" };
        let allowed_hosts = if self.allowed_hosts.is_empty() {
            "none".to_string()
        } else {
            self.allowed_hosts.join(",")
        };
        info!(
            port = self.port,
            password,
            allowed_hosts = %allowed_hosts,
            https = self.enable_https,
            https_port = self.https_port,
            "Configuration loaded"
        );
    }
}

// ============================================================================
// Derived policy views
// ============================================================================

/// How the certificate common name is chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainPolicy {
    /// Append `local_suffix` to names without a dot
    pub use_domain: bool,
    /// Explicit name; `None` falls back to the gateway address
    pub domain_name: Option<String>,
    /// Local suffix without the leading dot
    pub local_suffix: String,
}

impl Default for DomainPolicy {
    fn default() -> Self {
        Config::default().domain_policy()
    }
}

/// Immutable inputs to the access policy engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicyConfig {
    pub secret: String,
    pub allow_list_fragments: Vec<String>,
    pub https_enabled: bool,
    pub domain_policy: DomainPolicy,
}

impl AccessPolicyConfig {
    /// Policy with a secret and allow-list, everything else default
    pub fn new(secret: impl Into<String>, allow_list: Vec<String>) -> Self {
        Self {
            secret: secret.into(),
            allow_list_fragments: allow_list,
            https_enabled: false,
            domain_policy: DomainPolicy::default(),
        }
    }
}
