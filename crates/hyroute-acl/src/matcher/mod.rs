//! Host matchers for the different address pattern kinds.

pub mod domain;
pub mod geoip;
pub mod ip;

pub use domain::DomainMatcher;
pub use geoip::GeoipMatcher;
pub use ip::{CidrMatcher, IpMatcher};

use crate::rule::HostInfo;

/// Compiled address pattern of one rule.
#[derive(Debug)]
pub enum HostMatcher {
    /// `*` or `all`.
    All,
    Domain(DomainMatcher),
    Cidr(CidrMatcher),
    Ip(IpMatcher),
    GeoIp(GeoipMatcher),
}

impl HostMatcher {
    /// Check a normalized host (lower-case name) against this pattern.
    pub fn matches(&self, host: &HostInfo) -> bool {
        match self {
            HostMatcher::All => true,
            HostMatcher::Domain(m) => m.matches(&host.name),
            HostMatcher::Cidr(m) => m.matches(host),
            HostMatcher::Ip(m) => m.matches(host),
            HostMatcher::GeoIp(m) => m.matches(host),
        }
    }

    /// Whether this matcher can only succeed once the host has an address.
    pub fn needs_ip(&self) -> bool {
        matches!(
            self,
            HostMatcher::Cidr(_) | HostMatcher::Ip(_) | HostMatcher::GeoIp(_)
        )
    }
}
