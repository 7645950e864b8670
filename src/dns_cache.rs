use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::debug;

use crate::error::ProbeError;
use crate::resolver::Resolver;

pub const DEFAULT_DNS_TTL_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct DnsCacheEntry {
    ip_address: IpAddr,
    cached_at: Instant,
    ttl: Duration,
}

impl DnsCacheEntry {
    pub fn new(ip_address: IpAddr, ttl: Duration) -> Self {
        Self {
            ip_address,
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }

    pub fn ip_address(&self) -> IpAddr {
        self.ip_address
    }
}

#[derive(Debug, Default)]
pub struct DnsCache {
    cache: HashMap<String, DnsCacheEntry>,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, hostname: String, entry: DnsCacheEntry) {
        self.cache.insert(hostname, entry);
    }

    /// Valid address for `hostname`; an expired entry is evicted on the way.
    pub fn get_valid_ip(&mut self, hostname: &str) -> Option<IpAddr> {
        match self.cache.get(hostname) {
            Some(entry) if !entry.is_expired() => Some(entry.ip_address()),
            Some(_) => {
                self.cache.remove(hostname);
                None
            }
            None => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Remembers successful lookups of an inner resolver for `ttl`.
///
/// Failures are never cached, so a host that comes back is picked up on the
/// next probe.
pub struct CachingResolver<R> {
    inner: R,
    ttl: Duration,
    cache: Mutex<DnsCache>,
}

impl<R: Resolver> CachingResolver<R> {
    pub fn new(inner: R) -> Self {
        Self::with_ttl(inner, Duration::from_secs(DEFAULT_DNS_TTL_SECS))
    }

    pub fn with_ttl(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(DnsCache::new()),
        }
    }
}

impl<R: Resolver> Resolver for CachingResolver<R> {
    fn resolve(&self, hostname: &str) -> Result<IpAddr, ProbeError> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(ip) = cache.get_valid_ip(hostname) {
                debug!(target: "ping", "Using cached address {} for [{}]", ip, hostname);
                return Ok(ip);
            }
        }

        let ip = self.inner.resolve(hostname)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(hostname.to_string(), DnsCacheEntry::new(ip, self.ttl));
        }
        Ok(ip)
    }
}
