//! Origin classification.
//!
//! Decides whether a request origin sits on a private network. The check is
//! purely address based; allow-lists live in the policy engine.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Prefix carried by IPv4 addresses reported through a dual-stack socket
const IPV4_MAPPED_PREFIX: &str = "::ffff:";

/// Network class of a request origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginClass {
    /// 10/8, 172.16/12, 192.168/16 or 127/8
    Private,
    /// Everything else, including addresses that could not be parsed
    External,
}

impl OriginClass {
    /// Whether the origin must authenticate unconditionally
    #[inline]
    pub fn is_external(self) -> bool {
        matches!(self, OriginClass::External)
    }
}

impl fmt::Display for OriginClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginClass::Private => write!(f, "private"),
            OriginClass::External => write!(f, "external"),
        }
    }
}

/// Classify an origin address.
///
/// An IPv4-mapped IPv6 prefix (`::ffff:`) is stripped before matching. Empty
/// or unparseable input is [`OriginClass::External`], so an unknown origin
/// always has to authenticate.
pub fn classify(address: &str) -> OriginClass {
    let trimmed = address.trim();
    let candidate = strip_mapped_prefix(trimmed);

    let class = match candidate.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => classify_v4(v4),
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => classify_v4(v4),
            None => OriginClass::External,
        },
        Err(_) => OriginClass::External,
    };

    trace!(address = %trimmed, class = %class, "Classified origin");
    class
}

/// Classify an already parsed address
pub fn classify_ip(ip: IpAddr) -> OriginClass {
    match ip {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(classify_v4)
            .unwrap_or(OriginClass::External),
    }
}

fn classify_v4(ip: Ipv4Addr) -> OriginClass {
    if ip.is_private() || ip.is_loopback() {
        OriginClass::Private
    } else {
        OriginClass::External
    }
}

fn strip_mapped_prefix(address: &str) -> &str {
    match address.get(..IPV4_MAPPED_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(IPV4_MAPPED_PREFIX) => {
            let rest = &address[IPV4_MAPPED_PREFIX.len()..];
            // Only strip when what follows is dotted IPv4
            if rest.parse::<Ipv4Addr>().is_ok() {
                rest
            } else {
                address
            }
        }
        _ => address,
    }
}
