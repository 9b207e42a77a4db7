//! CIDR and literal IP matchers.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::rule::HostInfo;

/// Matcher for a single CIDR network.
///
/// An IPv4 network only looks at `host.ipv4`, an IPv6 network only at
/// `host.ipv6`. Host bits in the configured prefix are discarded.
#[derive(Debug, Clone)]
pub struct CidrMatcher {
    net: IpNet,
}

impl CidrMatcher {
    pub fn new(net: IpNet) -> Self {
        Self { net: net.trunc() }
    }

    pub fn network(&self) -> IpNet {
        self.net
    }

    pub fn matches(&self, host: &HostInfo) -> bool {
        match self.net {
            IpNet::V4(net) => host.ipv4.is_some_and(|ip| net.contains(&ip)),
            IpNet::V6(net) => host.ipv6.is_some_and(|ip| net.contains(&ip)),
        }
    }
}

/// Matcher for one literal address.
#[derive(Debug, Clone)]
pub struct IpMatcher {
    ip: IpAddr,
}

impl IpMatcher {
    /// IPv4-mapped IPv6 literals are compared in their IPv4 form.
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip: ip.to_canonical(),
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn matches(&self, host: &HostInfo) -> bool {
        match self.ip {
            IpAddr::V4(ip) => host.ipv4 == Some(ip),
            IpAddr::V6(ip) => host.ipv6 == Some(ip),
        }
    }
}
