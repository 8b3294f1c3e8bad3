//! Gateway address discovery
//!
//! When no domain is configured the certificate is issued for the router's
//! LAN address. Discovery walks a list of platform queries and stops at the
//! first one that yields an address; if none do, a fixed default is used.

use std::net::{IpAddr, Ipv4Addr};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace, warn};

/// Used when every query fails
pub const DEFAULT_GATEWAY: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));

/// Finds the address clients use to reach this host
#[async_trait]
pub trait GatewayDiscovery: Send + Sync {
    /// Best-effort lookup; never fails, falls back to a default instead
    async fn discover(&self) -> IpAddr;
}

/// Always returns the same address
#[derive(Debug, Clone, Copy)]
pub struct StaticGateway(pub IpAddr);

#[async_trait]
impl GatewayDiscovery for StaticGateway {
    async fn discover(&self) -> IpAddr {
        self.0
    }
}

/// One platform query and how to read its output
#[derive(Debug, Clone)]
pub struct Probe {
    pub program: String,
    pub args: Vec<String>,
    pub parse: fn(&str) -> Option<IpAddr>,
}

impl Probe {
    pub fn new(program: &str, args: &[&str], parse: fn(&str) -> Option<IpAddr>) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            parse,
        }
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs probes in order until one produces an address
#[derive(Debug, Clone)]
pub struct CommandChainDiscovery {
    probes: Vec<Probe>,
    timeout: Duration,
    fallback: IpAddr,
}

impl CommandChainDiscovery {
    /// OpenWrt chain: UCI, then iproute2, then ifconfig on `br-lan`
    pub fn new(timeout: Duration) -> Self {
        Self {
            probes: vec![
                Probe::new("uci", &["get", "network.lan.ipaddr"], parse_plain_address),
                Probe::new("ip", &["-4", "addr", "show", "br-lan"], parse_inet_line),
                Probe::new("ifconfig", &["br-lan"], parse_inet_line),
            ],
            timeout,
            fallback: DEFAULT_GATEWAY,
        }
    }

    /// Custom probe chain
    pub fn with_probes(mut self, probes: Vec<Probe>) -> Self {
        self.probes = probes;
        self
    }

    pub fn with_fallback(mut self, fallback: IpAddr) -> Self {
        self.fallback = fallback;
        self
    }

    async fn run_probe(&self, probe: &Probe) -> Option<IpAddr> {
        let child = Command::new(&probe.program)
            .args(&probe.args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                trace!(probe = %probe.describe(), status = %output.status, "Probe failed");
                return None;
            }
            Ok(Err(e)) => {
                trace!(probe = %probe.describe(), error = %e, "Probe could not run");
                return None;
            }
            Err(_) => {
                debug!(probe = %probe.describe(), "Probe timed out");
                return None;
            }
        };

        (probe.parse)(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl GatewayDiscovery for CommandChainDiscovery {
    async fn discover(&self) -> IpAddr {
        for probe in &self.probes {
            if let Some(address) = self.run_probe(probe).await {
                debug!(probe = %probe.describe(), address = %address, "Discovered gateway address");
                return address;
            }
        }

        warn!(
            fallback = %self.fallback,
            "Could not discover gateway address, using default"
        );
        self.fallback
    }
}

/// Output that is just an address, as printed by `uci get`
pub fn parse_plain_address(output: &str) -> Option<IpAddr> {
    output.lines().next()?.trim().parse().ok()
}

/// First IPv4 `inet` address in `ip addr` or `ifconfig` output
///
/// Handles `inet 192.168.1.1/24`, `inet 192.168.1.1  netmask ...` and the
/// busybox `inet addr:192.168.1.1` form.
pub fn parse_inet_line(output: &str) -> Option<IpAddr> {
    output.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        while let Some(word) = words.next() {
            if word != "inet" {
                continue;
            }
            let value = words.next()?;
            let value = value.strip_prefix("addr:").unwrap_or(value);
            let value = value.split('/').next().unwrap_or(value);
            if let Ok(ip) = value.parse::<Ipv4Addr>() {
                return Some(IpAddr::V4(ip));
            }
        }
        None
    })
}
