//! Egress configuration types.
//!
//! Deserializable with `serde` from whatever format the caller loads.

use serde::{Deserialize, Serialize};

use hyroute_acl::RawRule;
use hyroute_core::defaults;
use hyroute_dns::DnsConfig;

/// Complete egress configuration: resolver, ACL and outbounds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EgressConfig {
    /// Resolver placed in front of the chain. Absent means `system`.
    #[serde(default)]
    pub resolver: Option<DnsConfig>,
    #[serde(default)]
    pub acl: Option<AclConfig>,
    /// Named outbounds. The first one is the default.
    #[serde(default)]
    pub outbounds: Vec<OutboundConfig>,
}

/// ACL section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclConfig {
    /// Path to a MaxMind `.mmdb` country or city database.
    #[serde(default)]
    pub geoip: Option<String>,
    /// Where to download the database from when the file is missing.
    #[serde(default)]
    pub geoip_url: Option<String>,
    #[serde(default = "default_acl_cache_size")]
    pub cache_size: usize,
    #[serde(default)]
    pub rules: Vec<AclRuleConfig>,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            geoip: None,
            geoip_url: None,
            cache_size: default_acl_cache_size(),
            rules: Vec::new(),
        }
    }
}

impl AclConfig {
    /// Convert to compiler input. Line numbers default to the 1-based
    /// position in `rules`.
    pub fn raw_rules(&self) -> Vec<RawRule> {
        self.rules
            .iter()
            .enumerate()
            .map(|(i, rule)| RawRule {
                line: rule.line.unwrap_or(i + 1),
                outbound: rule.outbound.clone(),
                address: rule.address.clone(),
                proto_port: rule.proto_port.clone(),
                hijack: rule.hijack.clone(),
            })
            .collect()
    }
}

/// One ACL rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclRuleConfig {
    pub outbound: String,
    pub address: String,
    #[serde(default)]
    pub proto_port: String,
    #[serde(default)]
    pub hijack: Option<String>,
    /// Source line, for callers that tokenize a rule file.
    #[serde(default)]
    pub line: Option<usize>,
}

/// Named outbound entry.
///
/// `type` selects the kind: `direct` uses `mode` and the bind options,
/// `socks5` uses `addr` and the optional credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub outbound_type: String,
    /// Direct mode: `auto`, `64`, `46`, `6` or `4`.
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub bind_ipv4: Option<String>,
    #[serde(default)]
    pub bind_ipv6: Option<String>,
    /// Network interface (Linux only). Exclusive with the bind addresses.
    #[serde(default)]
    pub bind_device: Option<String>,
    /// SOCKS5 server `host:port`.
    #[serde(default)]
    pub addr: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
}

fn default_acl_cache_size() -> usize {
    defaults::DEFAULT_ACL_CACHE_SIZE
}

fn default_dial_timeout_secs() -> u64 {
    defaults::DEFAULT_DIAL_TIMEOUT_SECS
}
