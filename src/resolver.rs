use std::net::{IpAddr, ToSocketAddrs};

use log::debug;

use crate::error::ProbeError;

/// Turns a hostname into an address to ping.
pub trait Resolver: Send + Sync {
    fn resolve(&self, hostname: &str) -> Result<IpAddr, ProbeError>;
}

/// Sanitize hostname by keeping only valid characters (alphanumeric, dots, hyphens)
/// Returns None if the result is empty
pub fn sanitize_hostname(hostname: &str) -> Option<String> {
    // Also handle case where user included port like "example.com:8080"
    let hostname = hostname.split(':').next().unwrap_or(hostname);

    let sanitized: String = hostname
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '.' || *c == '-')
        .collect();

    if sanitized.is_empty() {
        None
    } else {
        Some(sanitized)
    }
}

/// Blocking lookup through the operating system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, hostname: &str) -> Result<IpAddr, ProbeError> {
        // Literal addresses need no lookup
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return Ok(ip);
        }

        let sanitized = sanitize_hostname(hostname)
            .ok_or_else(|| ProbeError::Resolution(hostname.to_string()))?;

        let addrs: Vec<IpAddr> = (sanitized.as_str(), 0)
            .to_socket_addrs()
            .map_err(|e| {
                debug!(target: "ping", "Lookup of [{}] failed: {}", sanitized, e);
                ProbeError::Resolution(hostname.to_string())
            })?
            .map(|addr| addr.ip())
            .collect();

        // Prefer IPv4 when the name has both
        addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| ProbeError::Resolution(hostname.to_string()))
    }
}
