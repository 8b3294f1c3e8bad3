//! Key table shared by the UCI and KDL front ends.

use std::fmt;
use std::path::PathBuf;

use tracing::trace;

use crate::{CertBackend, Config};

/// One raw `key = value` pair read from a configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    /// Normalised key (lowercase, `_` separated)
    pub key: String,
    /// Raw value text
    pub value: String,
    /// Appends to a list instead of replacing it (UCI `list` lines)
    pub append: bool,
    /// Source line, when known
    pub line: Option<usize>,
}

impl Setting {
    pub fn new(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: normalize_key(key),
            value: value.into(),
            append: false,
            line: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn appending(mut self) -> Self {
        self.append = true;
        self
    }
}

/// A value that was ignored or replaced by its default
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub key: String,
    pub message: String,
}

impl ConfigWarning {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// `https-port` and `https_port` name the same setting
pub(crate) fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('-', "_")
}

/// Apply raw settings on top of `config`, returning what had to be ignored
pub(crate) fn apply(config: &mut Config, settings: &[Setting]) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    for setting in settings {
        let value = setting.value.trim();
        let mut warn = |message: String| {
            let message = match setting.line {
                Some(line) => format!("{} (line {})", message, line),
                None => message,
            };
            warnings.push(ConfigWarning::new(setting.key.clone(), message));
        };

        trace!(key = %setting.key, "Applying setting");

        match setting.key.as_str() {
            "port" => match parse_port(value) {
                Some(port) => config.port = port,
                None => warn(format!(
                    "invalid port '{}', using default {}",
                    value, config.port
                )),
            },
            "https_port" => match parse_port(value) {
                Some(port) => config.https_port = port,
                None => warn(format!(
                    "invalid HTTPS port '{}', using default {}",
                    value, config.https_port
                )),
            },
            "bind_address" => {
                if value.is_empty() {
                    warn("empty bind address ignored".to_string());
                } else {
                    config.bind_address = value.to_string();
                }
            }
            "password" => {
                if value.is_empty() {
                    warn("empty password ignored".to_string());
                } else {
                    config.password = value.to_string();
                }
            }
            "allowed_hosts" => {
                let hosts = split_list(value);
                if setting.append {
                    config.allowed_hosts.extend(hosts);
                } else {
                    config.allowed_hosts = hosts;
                }
            }
            "enable_https" => apply_bool(&mut config.enable_https, value, &mut warn),
            "use_domain" => apply_bool(&mut config.use_domain, value, &mut warn),
            "trust_proxy" => apply_bool(&mut config.trust_proxy, value, &mut warn),
            "domain_name" => {
                config.domain_name = (!value.is_empty()).then(|| value.to_string());
            }
            "local_suffix" => {
                let suffix = value.trim_start_matches('.');
                if suffix.is_empty() {
                    warn("empty local suffix ignored".to_string());
                } else {
                    config.local_suffix = suffix.to_ascii_lowercase();
                }
            }
            "cert_dir" => {
                if value.is_empty() {
                    warn("empty certificate directory ignored".to_string());
                } else {
                    config.cert_dir = PathBuf::from(value);
                }
            }
            "cert_backend" => match CertBackend::from_str_loose(value) {
                Some(backend) => config.cert_backend = backend,
                None => warn(format!(
                    "unknown certificate backend '{}', using {}",
                    value, config.cert_backend
                )),
            },
            "tool_timeout_secs" => match value.parse::<u64>() {
                Ok(secs) => config.tool_timeout_secs = secs,
                Err(_) => warn(format!(
                    "invalid timeout '{}', using default {}",
                    value, config.tool_timeout_secs
                )),
            },
            "max_tracked_origins" => match value.parse::<usize>() {
                Ok(max) => config.max_tracked_origins = max,
                Err(_) => warn(format!(
                    "invalid origin limit '{}', using default {}",
                    value, config.max_tracked_origins
                )),
            },
            other => warn(format!("unknown setting '{}' ignored", other)),
        }
    }

    warnings
}

fn parse_port(value: &str) -> Option<u16> {
    match value.parse::<u32>() {
        Ok(port) if (1..=65535).contains(&port) => Some(port as u16),
        _ => None,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn apply_bool(slot: &mut bool, value: &str, warn: &mut impl FnMut(String)) {
    match parse_bool(value) {
        Some(b) => *slot = b,
        None => warn(format!("invalid boolean '{}', using default {}", value, slot)),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(settings: &[Setting]) -> (Config, Vec<ConfigWarning>) {
        let mut config = Config::default();
        let warnings = apply(&mut config, settings);
        (config, warnings)
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("HTTPS-Port"), "https_port");
        assert_eq!(normalize_key(" use_domain "), "use_domain");
    }

    #[test]
    fn test_port_out_of_range_falls_back() {
        let (config, warnings) = applied(&[
            Setting::new("port", "70000"),
            Setting::new("https_port", "abc").at_line(4),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.https_port, 3443);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[1].message.contains("line 4"));
    }

    #[test]
    fn test_booleans() {
        let (config, warnings) = applied(&[
            Setting::new("enable_https", "1"),
            Setting::new("use-domain", "yes"),
            Setting::new("trust_proxy", "maybe"),
        ]);
        assert!(config.enable_https);
        assert!(config.use_domain);
        assert!(!config.trust_proxy);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].key, "trust_proxy");
    }

    #[test]
    fn test_allowed_hosts_list_and_option() {
        let (config, _) = applied(&[
            Setting::new("allowed_hosts", "a, ,b,"),
            Setting::new("allowed_hosts", "c").appending(),
        ]);
        assert_eq!(config.allowed_hosts, vec!["a", "b", "c"]);

        let (config, _) = applied(&[
            Setting::new("allowed_hosts", "a"),
            Setting::new("allowed_hosts", "b"),
        ]);
        assert_eq!(config.allowed_hosts, vec!["b"]);
    }

    #[test]
    fn test_empty_domain_means_discover() {
        let (config, warnings) = applied(&[Setting::new("domain_name", "")]);
        assert_eq!(config.domain_name, None);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_local_suffix_strips_dot() {
        let (config, _) = applied(&[Setting::new("local_suffix", ".Home")]);
        assert_eq!(config.local_suffix, "home");
    }

    #[test]
    fn test_unknown_key_warns() {
        let (config, warnings) = applied(&[Setting::new("colour", "blue")]);
        assert_eq!(config, Config::default());
        assert!(warnings[0].message.contains("unknown setting"));
    }

    #[test]
    fn test_cert_backend() {
        let (config, warnings) = applied(&[Setting::new("cert-backend", "native")]);
        assert_eq!(config.cert_backend, CertBackend::Native);
        assert!(warnings.is_empty());

        let (config, warnings) = applied(&[Setting::new("cert-backend", "gnutls")]);
        assert_eq!(config.cert_backend, CertBackend::Openssl);
        assert_eq!(warnings.len(), 1);
    }
}
