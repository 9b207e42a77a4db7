//! DNS resolver configuration.

use serde::{Deserialize, Serialize};

use hyroute_core::defaults;

/// DNS resolver configuration.
///
/// When omitted from config files the system resolver is used with caching
/// enabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsConfig {
    /// Upstream kind.
    #[serde(rename = "type", default)]
    pub strategy: DnsStrategy,

    /// Upstream server. Required for every strategy except `system`.
    ///
    /// - `udp`, `tcp`: `"8.8.8.8"` or `"8.8.8.8:53"`
    /// - `tls`: `"1.1.1.1"` or `"dns.example:853"`
    /// - `https`: `"dns.google"`, `"1.1.1.1:443/dns-query"` or a full
    ///   `https://` URL
    ///
    /// When a port is omitted the standard port for the protocol is used.
    #[serde(default)]
    pub addr: Option<String>,

    /// TLS server name for `tls` and `https`. Defaults to the host of `addr`.
    #[serde(default)]
    pub sni: Option<String>,

    /// Skip certificate verification for `tls` and `https` upstreams.
    #[serde(default)]
    pub insecure: bool,

    /// Per-query timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Cache capacity (number of entries). 0 disables caching.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            strategy: DnsStrategy::default(),
            addr: None,
            sni: None,
            insecure: false,
            timeout_secs: default_timeout_secs(),
            cache_size: default_cache_size(),
        }
    }
}

impl DnsConfig {
    pub fn is_system(&self) -> bool {
        self.strategy == DnsStrategy::System
    }

    /// Whether certificate verification is disabled for this upstream.
    pub fn skips_verification(&self) -> bool {
        self.insecure && matches!(self.strategy, DnsStrategy::Tls | DnsStrategy::Https)
    }
}

/// DNS resolution strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DnsStrategy {
    /// `/etc/resolv.conf` on Unix, system DNS settings on Windows.
    #[default]
    System,
    Tcp,
    Udp,
    /// DNS-over-TLS.
    Tls,
    /// DNS-over-HTTPS.
    Https,
}

impl std::fmt::Display for DnsStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DnsStrategy::System => "system",
            DnsStrategy::Tcp => "tcp",
            DnsStrategy::Udp => "udp",
            DnsStrategy::Tls => "tls",
            DnsStrategy::Https => "https",
        })
    }
}

fn default_timeout_secs() -> u64 {
    defaults::DEFAULT_DNS_TIMEOUT_SECS
}

fn default_cache_size() -> usize {
    defaults::DEFAULT_DNS_CACHE_SIZE
}
