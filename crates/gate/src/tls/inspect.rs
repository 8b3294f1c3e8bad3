//! Read back what a stored certificate actually says
//!
//! Used by the lifecycle manager to decide whether stored material can be
//! reused and by `warden cert` to print it.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use x509_parser::extensions::GeneralName;

use super::error::InspectError;
use super::generator::AltName;

/// The parts of a certificate the gate cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    pub common_name: Option<String>,
    pub not_after: DateTime<Utc>,
    pub alt_names: Vec<AltName>,
}

impl CertificateSummary {
    /// Expires before `now + margin`
    pub fn expires_within(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.not_after <= now + margin
    }
}

/// Parse the first PEM certificate in `cert_pem`
pub fn inspect(cert_pem: &[u8]) -> Result<CertificateSummary, InspectError> {
    let pem = pem::parse(cert_pem)?;
    if pem.tag() != "CERTIFICATE" {
        return Err(InspectError::WrongTag(pem.tag().to_string()));
    }

    let (_, cert) = x509_parser::parse_x509_certificate(pem.contents())
        .map_err(|e| InspectError::X509(e.to_string()))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);

    let not_after_ts = cert.validity().not_after.timestamp();
    let not_after = DateTime::from_timestamp(not_after_ts, 0)
        .ok_or_else(|| InspectError::X509(format!("notAfter out of range: {}", not_after_ts)))?;

    let alt_names = match cert.subject_alternative_name() {
        Ok(Some(ext)) => ext
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(AltName::Dns(dns.to_string())),
                GeneralName::IPAddress(bytes) => ip_from_bytes(bytes).map(AltName::Ip),
                _ => None,
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(e) => return Err(InspectError::X509(e.to_string())),
    };

    Ok(CertificateSummary {
        common_name,
        not_after,
        alt_names,
    })
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}
