//! Range and shape checks on a parsed configuration.
//!
//! Runs the `validator` rules declared on [`Config`] and resets every failing
//! field to its default.

use std::net::IpAddr;

use tracing::debug;
use validator::{Validate, ValidationError};

use crate::settings::ConfigWarning;
use crate::Config;

/// Reset invalid fields to their defaults, reporting each one
pub(crate) fn enforce(config: &mut Config) -> Vec<ConfigWarning> {
    let errors = match config.validate() {
        Ok(()) => return Vec::new(),
        Err(errors) => errors,
    };

    let defaults = Config::default();
    let mut fields: Vec<String> = errors
        .field_errors()
        .into_iter()
        .map(|(field, _)| field.to_string())
        .collect();
    fields.sort();

    let mut warnings = Vec::with_capacity(fields.len());
    for field in fields {
        let replaced = match field.as_str() {
            "port" => {
                config.port = defaults.port;
                defaults.port.to_string()
            }
            "https_port" => {
                config.https_port = defaults.https_port;
                defaults.https_port.to_string()
            }
            "bind_address" => {
                config.bind_address = defaults.bind_address.clone();
                defaults.bind_address.clone()
            }
            "password" => {
                config.password = defaults.password.clone();
                "the built-in password".to_string()
            }
            "domain_name" => {
                config.domain_name = defaults.domain_name.clone();
                defaults.domain_name.clone().unwrap_or_default()
            }
            "local_suffix" => {
                config.local_suffix = defaults.local_suffix.clone();
                defaults.local_suffix.clone()
            }
            "tool_timeout_secs" => {
                config.tool_timeout_secs = defaults.tool_timeout_secs;
                defaults.tool_timeout_secs.to_string()
            }
            "max_tracked_origins" => {
                config.max_tracked_origins = defaults.max_tracked_origins;
                defaults.max_tracked_origins.to_string()
            }
            other => {
                debug!(field = %other, "Validation failure on field without default rule");
                continue;
            }
        };

        warnings.push(ConfigWarning::new(
            field.clone(),
            format!("value out of range, using default {}", replaced),
        ));
    }

    warnings
}

/// Bind address must be a literal IP
pub(crate) fn ip_address(value: &str) -> Result<(), ValidationError> {
    value
        .parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("ip_address"))
}

/// Local suffix must be a single DNS label
pub(crate) fn dns_label(value: &str) -> Result<(), ValidationError> {
    let valid = !value.starts_with('-')
        && !value.ends_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("dns_label"))
    }
}

/// Certificate domain must be an IP literal or dot-separated DNS labels
pub(crate) fn host_name(value: &str) -> Result<(), ValidationError> {
    if value.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    let valid = value
        .split('.')
        .all(|label| !label.is_empty() && label.len() <= 63 && dns_label(label).is_ok());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("host_name"))
    }
}
