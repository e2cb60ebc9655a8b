//! SSRF guard for every outbound fetch
//!
//! Page navigations, metadata probes and downloads all pass through a
//! [`UrlSafety`] check before any network I/O happens.

use ipnet::IpNet;
use std::collections::HashSet;
use std::net::IpAddr;
use url::{Host, Url};

/// Decides whether a URL may be fetched
pub trait UrlSafety: Send + Sync {
    /// Returns true if fetching `url` is allowed
    fn is_safe_url(&self, url: &Url) -> bool;

    /// Why `url` is rejected, `None` if it is safe
    fn rejection_reason(&self, url: &Url) -> Option<String> {
        if self.is_safe_url(url) {
            None
        } else {
            Some(format!("{url} targets a disallowed host"))
        }
    }
}

/// Default guard: http(s) only, no credentials, no private/loopback/link-local
/// or cloud-metadata destinations
#[derive(Debug, Clone)]
pub struct SsrfGuard {
    allowed_schemes: HashSet<String>,
    blocked_hosts: HashSet<String>,
    blocked_cidrs: Vec<IpNet>,
    allowed_hosts: HashSet<String>,
}

impl Default for SsrfGuard {
    fn default() -> Self {
        Self::new()
    }
}

const BLOCKED_CIDRS: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16", // link-local, cloud metadata
    "172.16.0.0/12",
    "192.168.0.0/16",
    "::/128",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
];

impl SsrfGuard {
    /// Guard with the default rules
    pub fn new() -> Self {
        Self {
            allowed_schemes: ["http", "https"].into_iter().map(String::from).collect(),
            blocked_hosts: [
                "localhost",
                "metadata.google.internal",
                "metadata.gke.internal",
                "metadata",
                "instance-data",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            blocked_cidrs: BLOCKED_CIDRS
                .iter()
                .filter_map(|cidr| cidr.parse().ok())
                .collect(),
            allowed_hosts: HashSet::new(),
        }
    }

    /// Allow a host unconditionally (e.g. a local test server)
    pub fn allow_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.insert(host.into().to_ascii_lowercase());
        self
    }

    /// Block an additional hostname
    pub fn block_host(mut self, host: impl Into<String>) -> Self {
        self.blocked_hosts.insert(host.into().to_ascii_lowercase());
        self
    }

    /// Block an additional CIDR range
    pub fn block_cidr(mut self, cidr: IpNet) -> Self {
        self.blocked_cidrs.push(cidr);
        self
    }

    /// Check a URL, returning the reason on rejection
    pub fn check(&self, url: &Url) -> Result<(), String> {
        if !self.allowed_schemes.contains(url.scheme()) {
            return Err(format!("scheme '{}' is not allowed", url.scheme()));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err("credentialed URLs are not allowed".to_string());
        }

        let host = url.host().ok_or_else(|| "URL has no host".to_string())?;
        let host_key = match &host {
            Host::Domain(d) => d.trim_end_matches('.').to_ascii_lowercase(),
            Host::Ipv4(ip) => ip.to_string(),
            Host::Ipv6(ip) => ip.to_string(),
        };

        if self.allowed_hosts.contains(&host_key) {
            return Ok(());
        }
        if self.blocked_hosts.contains(&host_key) || host_key.ends_with(".localhost") {
            return Err(format!("host '{host_key}' is blocked"));
        }

        let ip = match host {
            Host::Ipv4(ip) => Some(IpAddr::V4(ip)),
            Host::Ipv6(ip) => Some(match ip.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => IpAddr::V6(ip),
            }),
            Host::Domain(_) => None,
        };
        if let Some(ip) = ip
            && let Some(cidr) = self.blocked_cidrs.iter().find(|c| c.contains(&ip))
        {
            return Err(format!("address {ip} is in blocked range {cidr}"));
        }

        Ok(())
    }
}

impl UrlSafety for SsrfGuard {
    fn is_safe_url(&self, url: &Url) -> bool {
        self.check(url).is_ok()
    }

    fn rejection_reason(&self, url: &Url) -> Option<String> {
        self.check(url).err()
    }
}
