//! Request, rule and result type definitions.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Transport protocol of a request, or the protocol filter of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    /// Wildcard: a rule with `Both` accepts TCP and UDP requests.
    #[default]
    Both,
    Tcp,
    Udp,
}

impl Protocol {
    /// Check whether a rule with this protocol accepts a request made over `request`.
    pub fn accepts(self, request: Protocol) -> bool {
        self == Protocol::Both || self == request
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Both => "*",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        })
    }
}

/// Identity of a connection target.
///
/// `name` is empty when the request carried only an IP address. The
/// addresses are filled from the request itself or by a resolver stage.
/// The whole struct is hashed as part of the match cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HostInfo {
    pub name: String,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl HostInfo {
    pub fn new(name: impl Into<String>, ipv4: Option<Ipv4Addr>, ipv6: Option<Ipv6Addr>) -> Self {
        Self {
            name: name.into(),
            ipv4,
            ipv6,
        }
    }

    /// Host known only by domain name.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self::new(name, None, None)
    }

    /// Host known only by address. IPv4-mapped IPv6 addresses are stored as IPv4.
    pub fn from_ip(ip: IpAddr) -> Self {
        match ip.to_canonical() {
            IpAddr::V4(v4) => Self::new(String::new(), Some(v4), None),
            IpAddr::V6(v6) => Self::new(String::new(), None, Some(v6)),
        }
    }

    /// Populated addresses, IPv4 first.
    pub fn ips(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.ipv4
            .map(IpAddr::V4)
            .into_iter()
            .chain(self.ipv6.map(IpAddr::V6))
    }

    /// Copy with the name lower-cased.
    pub(crate) fn normalized(&self) -> HostInfo {
        HostInfo {
            name: self.name.to_lowercase(),
            ipv4: self.ipv4,
            ipv6: self.ipv6,
        }
    }
}

/// A rule record as produced by a rule-file tokenizer or a config loader.
///
/// Nothing is validated until [`compile`](crate::compile) runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRule {
    /// 1-based line number used in diagnostics.
    pub line: usize,
    /// Outbound name, looked up case-insensitively.
    pub outbound: String,
    /// Address pattern: `*`, `all`, `geoip:XX`, CIDR, IP or domain.
    pub address: String,
    /// Protocol/port filter such as `tcp/443`, `udp`, `*/80` or empty.
    pub proto_port: String,
    /// Optional IP the destination is rewritten to on match.
    pub hijack: Option<String>,
}

impl RawRule {
    pub fn new(line: usize, outbound: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            line,
            outbound: outbound.into(),
            address: address.into(),
            proto_port: String::new(),
            hijack: None,
        }
    }

    #[must_use]
    pub fn with_proto_port(mut self, proto_port: impl Into<String>) -> Self {
        self.proto_port = proto_port.into();
        self
    }

    #[must_use]
    pub fn with_hijack(mut self, hijack: impl Into<String>) -> Self {
        self.hijack = Some(hijack.into());
        self
    }
}

/// Outcome of a successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<O> {
    /// Handle of the selected outbound.
    pub outbound: O,
    /// Destination rewrite requested by the rule.
    pub hijack: Option<IpAddr>,
}
