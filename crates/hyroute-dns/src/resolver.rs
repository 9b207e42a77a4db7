//! Async DNS resolver backed by hickory-resolver.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::xfer::Protocol;
use hickory_resolver::Resolver;
use hickory_resolver::config::{
    LookupIpStrategy, NameServerConfig, NameServerConfigGroup, ResolverConfig, ResolverOpts,
};
use hickory_resolver::name_server::TokioConnectionProvider;
use tracing::{debug, warn};

use hyroute_core::defaults::{DEFAULT_DNS_PORT, DEFAULT_DOH_PATH, DEFAULT_DOH_PORT, DEFAULT_DOT_PORT};

use crate::config::{DnsConfig, DnsStrategy};
use crate::error::DnsError;
use crate::tls;

/// First IPv4 and first IPv6 address of a lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvedIps {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl ResolvedIps {
    pub fn is_empty(&self) -> bool {
        self.ipv4.is_none() && self.ipv6.is_none()
    }

    fn push(&mut self, ip: IpAddr) {
        match ip.to_canonical() {
            IpAddr::V4(v4) => {
                self.ipv4.get_or_insert(v4);
            }
            IpAddr::V6(v6) => {
                self.ipv6.get_or_insert(v6);
            }
        }
    }
}

impl From<IpAddr> for ResolvedIps {
    fn from(ip: IpAddr) -> Self {
        let mut ips = Self::default();
        ips.push(ip);
        ips
    }
}

/// Shared async DNS resolver.
///
/// Wraps `hickory_resolver::Resolver` with built-in TTL caching and one
/// configured upstream. Thread-safe and cheaply cloneable.
#[derive(Clone)]
pub struct DnsResolver {
    inner: Arc<Inner>,
}

struct Inner {
    resolver: Resolver<TokioConnectionProvider>,
    strategy: DnsStrategy,
}

impl std::fmt::Debug for DnsResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsResolver")
            .field("strategy", &self.inner.strategy)
            .finish()
    }
}

impl DnsResolver {
    /// Build a resolver from configuration.
    ///
    /// Call once at startup and share via `Clone`.
    pub fn new(config: &DnsConfig) -> Result<Self, DnsError> {
        let resolver = match config.strategy {
            DnsStrategy::System => {
                let mut builder = Resolver::builder_tokio()
                    .map_err(|e| DnsError::InvalidServer(format!("system config: {e}")))?;
                apply_options(builder.options_mut(), config);
                builder.build()
            }
            strategy => {
                let addr = config
                    .addr
                    .as_deref()
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| {
                        DnsError::InvalidServer(format!("empty {strategy} resolver address"))
                    })?;
                let server = name_server(strategy, addr, config.sni.as_deref())?;
                let resolver_config =
                    ResolverConfig::from_parts(None, vec![], NameServerConfigGroup::from(vec![server]));
                let mut opts = ResolverOpts::default();
                apply_options(&mut opts, config);
                if config.skips_verification() {
                    opts.tls_config = tls::insecure_client_config()?;
                    warn!(strategy = %strategy, addr = %addr, "certificate verification disabled for resolver");
                }
                let mut builder = Resolver::builder_with_config(
                    resolver_config,
                    TokioConnectionProvider::default(),
                );
                *builder.options_mut() = opts;
                builder.build()
            }
        };

        Ok(Self {
            inner: Arc::new(Inner {
                resolver,
                strategy: config.strategy,
            }),
        })
    }

    pub fn strategy(&self) -> DnsStrategy {
        self.inner.strategy
    }

    /// Resolve a host name to its first IPv4 and first IPv6 address.
    ///
    /// IP literals are returned without a query. Fails with
    /// [`DnsError::NoResults`] when neither family has an address.
    pub async fn lookup(&self, host: &str) -> Result<ResolvedIps, DnsError> {
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ResolvedIps::from(ip));
        }

        let response = self.inner.resolver.lookup_ip(host).await?;
        let mut ips = ResolvedIps::default();
        for ip in response.iter() {
            ips.push(ip);
            if ips.ipv4.is_some() && ips.ipv6.is_some() {
                break;
            }
        }

        if ips.is_empty() {
            return Err(DnsError::NoResults(host.to_string()));
        }
        debug!(host = %host, ipv4 = ?ips.ipv4, ipv6 = ?ips.ipv6, "dns resolved");
        Ok(ips)
    }
}

fn apply_options(opts: &mut ResolverOpts, config: &DnsConfig) {
    opts.cache_size = config.cache_size;
    opts.timeout = Duration::from_secs(config.timeout_secs);
    opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
}

/// Split `"host:port"` into (host, port).
///
/// Handles IPv6 bracket notation: `"[::1]:443"` → `("::1", 443)`.
pub fn split_host_port(addr: &str) -> Result<(&str, u16), DnsError> {
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some((host, port_str)) = rest.split_once("]:") {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| DnsError::InvalidAddress(addr.to_string()))?;
            return Ok((host, port));
        }
        return Err(DnsError::InvalidAddress(addr.to_string()));
    }

    if let Some((host, port_str)) = addr.rsplit_once(':') {
        if host.is_empty() || host.contains(':') {
            return Err(DnsError::InvalidAddress(addr.to_string()));
        }
        let port = port_str
            .parse::<u16>()
            .map_err(|_| DnsError::InvalidAddress(addr.to_string()))?;
        Ok((host, port))
    } else {
        Err(DnsError::InvalidAddress(format!(
            "missing port in address: {addr}"
        )))
    }
}

/// Build the hickory name server entry for one upstream.
fn name_server(
    strategy: DnsStrategy,
    addr: &str,
    sni: Option<&str>,
) -> Result<NameServerConfig, DnsError> {
    let sni = sni.map(str::trim).filter(|s| !s.is_empty());

    match strategy {
        DnsStrategy::Udp | DnsStrategy::Tcp => {
            if addr.contains('/') {
                return Err(DnsError::InvalidServer(format!(
                    "unexpected path for {strategy} server: {addr}"
                )));
            }
            let protocol = if strategy == DnsStrategy::Udp {
                Protocol::Udp
            } else {
                Protocol::Tcp
            };
            let (host, port) = parse_host_port(addr, DEFAULT_DNS_PORT)?;
            Ok(NameServerConfig {
                socket_addr: resolve_server_addr(host, port)?,
                protocol,
                tls_dns_name: None,
                http_endpoint: None,
                trust_negative_responses: false,
                bind_addr: None,
            })
        }
        DnsStrategy::Tls => {
            if addr.contains('/') {
                return Err(DnsError::InvalidServer(format!(
                    "unexpected path for tls server: {addr}"
                )));
            }
            let (host, port) = parse_host_port(addr, DEFAULT_DOT_PORT)?;
            Ok(NameServerConfig {
                socket_addr: resolve_server_addr(host, port)?,
                protocol: Protocol::Tls,
                tls_dns_name: Some(sni.unwrap_or(host).to_string()),
                http_endpoint: None,
                trust_negative_responses: false,
                bind_addr: None,
            })
        }
        DnsStrategy::Https => {
            let rest = addr.strip_prefix("https://").unwrap_or(addr);
            let (authority, path) = match rest.split_once('/') {
                Some((authority, path)) if !path.is_empty() => (authority, format!("/{path}")),
                Some((authority, _)) => (authority, DEFAULT_DOH_PATH.to_string()),
                None => (rest, DEFAULT_DOH_PATH.to_string()),
            };
            let (host, port) = parse_host_port(authority, DEFAULT_DOH_PORT)?;
            Ok(NameServerConfig {
                socket_addr: resolve_server_addr(host, port)?,
                protocol: Protocol::Https,
                tls_dns_name: Some(sni.unwrap_or(host).to_string()),
                http_endpoint: Some(path),
                trust_negative_responses: false,
                bind_addr: None,
            })
        }
        DnsStrategy::System => Err(DnsError::InvalidServer(
            "system resolver takes no server address".to_string(),
        )),
    }
}

/// Parse "host:port", "[ipv6]:port", "host", or "[ipv6]" with a default port.
fn parse_host_port(s: &str, default_port: u16) -> Result<(&str, u16), DnsError> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| DnsError::InvalidServer(format!("invalid IPv6 host in: {s}")))?;
        if host.is_empty() {
            return Err(DnsError::InvalidServer(format!("empty host in: {s}")));
        }
        if tail.is_empty() {
            return Ok((host, default_port));
        }
        let port_str = tail.strip_prefix(':').ok_or_else(|| {
            DnsError::InvalidServer(format!("invalid port separator in bracketed host: {s}"))
        })?;
        let port = port_str
            .parse::<u16>()
            .map_err(|_| DnsError::InvalidServer(format!("invalid port in: {s}")))?;
        return Ok((host, port));
    }

    // A bare IPv6 literal has no port.
    if s.parse::<Ipv6Addr>().is_ok() {
        return Ok((s, default_port));
    }

    if let Some((host, port_str)) = s.rsplit_once(':') {
        if host.is_empty() {
            return Err(DnsError::InvalidServer(format!("empty host in: {s}")));
        }
        let port = port_str
            .parse::<u16>()
            .map_err(|_| DnsError::InvalidServer(format!("invalid port in: {s}")))?;
        return Ok((host, port));
    }

    if s.is_empty() {
        return Err(DnsError::InvalidServer("empty host".to_string()));
    }

    Ok((s, default_port))
}

/// Resolve a DNS server host to a SocketAddr.
///
/// Hostnames are resolved once at startup via the system resolver.
fn resolve_server_addr(host: &str, port: u16) -> Result<SocketAddr, DnsError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let mut addrs = (host, port).to_socket_addrs().map_err(|e| {
        DnsError::InvalidServer(format!("failed to resolve dns server host '{host}': {e}"))
    })?;
    addrs
        .next()
        .ok_or_else(|| DnsError::InvalidServer(format!("dns server host has no addresses: {host}")))
}
