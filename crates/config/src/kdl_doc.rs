//! KDL configuration parsing.
//!
//! ```kdl
//! server {
//!     port 3000
//!     bind-address "0.0.0.0"
//!     trust-proxy #false
//! }
//! access {
//!     password "change-me"
//!     allowed-hosts "nas.lan" "192.168.1."
//! }
//! tls {
//!     enable-https #true
//!     https-port 3443
//!     domain-name "fileshare.lan"
//!     cert-dir "/etc/warden/certs"
//! }
//! ```
//!
//! Blocks only group settings; a key may appear in any block or at the top
//! level.

use kdl::{KdlDocument, KdlNode, KdlValue};
use tracing::trace;

use crate::errors::ConfigError;
use crate::settings::Setting;

/// Parse a KDL document into raw settings
pub(crate) fn parse(content: &str) -> Result<Vec<Setting>, ConfigError> {
    let doc: KdlDocument = content.parse()?;
    let mut settings = Vec::new();

    for node in doc.nodes() {
        match node.children() {
            Some(children) => {
                trace!(block = %node.name().value(), "Parsing configuration block");
                for child in children.nodes() {
                    if let Some(setting) = parse_setting(child) {
                        settings.push(setting);
                    }
                }
            }
            None => {
                if let Some(setting) = parse_setting(node) {
                    settings.push(setting);
                }
            }
        }
    }

    trace!(count = settings.len(), "Parsed KDL settings");
    Ok(settings)
}

/// `name arg1 arg2 ...` becomes one setting; several args join with commas
fn parse_setting(node: &KdlNode) -> Option<Setting> {
    let values: Vec<String> = node
        .entries()
        .iter()
        .filter(|entry| entry.name().is_none())
        .map(|entry| value_to_string(entry.value()))
        .collect();

    if values.is_empty() {
        trace!(key = %node.name().value(), "KDL setting without value skipped");
        return None;
    }

    Some(Setting::new(node.name().value(), values.join(",")))
}

fn value_to_string(value: &KdlValue) -> String {
    if let Some(s) = value.as_string() {
        s.to_string()
    } else if let Some(i) = value.as_integer() {
        i.to_string()
    } else if let Some(b) = value.as_bool() {
        b.to_string()
    } else {
        value.to_string()
    }
}
