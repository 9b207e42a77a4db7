//! Request addresses flowing through the outbound chain.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use hyroute_acl::HostInfo;
use hyroute_dns::ResolvedIps;

/// Addresses found for a request host by a resolver stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveInfo {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    /// Set when resolution failed; both addresses are then empty.
    pub error: Option<String>,
}

impl ResolveInfo {
    pub fn from_ip(ip: IpAddr) -> Self {
        match ip.to_canonical() {
            IpAddr::V4(v4) => Self {
                ipv4: Some(v4),
                ..Self::default()
            },
            IpAddr::V6(v6) => Self {
                ipv6: Some(v6),
                ..Self::default()
            },
        }
    }

    pub fn from_error(error: impl fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn has_ip(&self) -> bool {
        self.ipv4.is_some() || self.ipv6.is_some()
    }
}

impl From<ResolvedIps> for ResolveInfo {
    fn from(ips: ResolvedIps) -> Self {
        Self {
            ipv4: ips.ipv4,
            ipv6: ips.ipv6,
            error: None,
        }
    }
}

/// Destination of a TCP connection or UDP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addr {
    /// Domain name or IP literal. IPv6 literals may be bracketed.
    pub host: String,
    pub port: u16,
    pub resolve_info: Option<ResolveInfo>,
}

impl Addr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            resolve_info: None,
        }
    }

    /// The host as an IP address, if it is a literal.
    pub fn host_ip(&self) -> Option<IpAddr> {
        let host = self
            .host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host);
        host.parse::<IpAddr>().ok().map(|ip| ip.to_canonical())
    }

    /// Identity used for ACL matching.
    ///
    /// An IP-literal host yields only that address. Otherwise the name is
    /// combined with whatever a resolver stage found.
    pub fn host_info(&self) -> HostInfo {
        if let Some(ip) = self.host_ip() {
            return HostInfo::from_ip(ip);
        }
        let (ipv4, ipv6) = self
            .resolve_info
            .as_ref()
            .map_or((None, None), |info| (info.ipv4, info.ipv6));
        HostInfo::new(self.host.clone(), ipv4, ipv6)
    }
}

impl From<SocketAddr> for Addr {
    fn from(sa: SocketAddr) -> Self {
        let ip = sa.ip().to_canonical();
        Self {
            host: ip.to_string(),
            port: sa.port(),
            resolve_info: Some(ResolveInfo::from_ip(ip)),
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
