//! Resolver stage: fills `resolve_info` before delegating inward.

use std::sync::Arc;

use async_trait::async_trait;
use hyroute_dns::DnsResolver;
use tokio::net::TcpStream;
use tracing::{trace, warn};

use crate::addr::{Addr, ResolveInfo};
use crate::error::OutboundError;
use crate::traits::{Outbound, UdpConn};

/// Outbound stage that resolves the request host and records the result.
///
/// A failed lookup does not fail the request. The error is kept in
/// `resolve_info.error` so later stages can still route on the name and
/// the terminal outbound can report it.
#[derive(Debug, Clone)]
pub struct ResolverOutbound {
    resolver: DnsResolver,
    inner: Arc<dyn Outbound>,
}

impl ResolverOutbound {
    pub fn new(resolver: DnsResolver, inner: Arc<dyn Outbound>) -> Self {
        Self { resolver, inner }
    }

    pub fn resolver(&self) -> &DnsResolver {
        &self.resolver
    }
}

/// Fill `addr.resolve_info` unless an earlier stage already did.
async fn resolve(resolver: &DnsResolver, addr: &mut Addr) {
    if addr.resolve_info.is_some() {
        return;
    }
    if let Some(ip) = addr.host_ip() {
        addr.resolve_info = Some(ResolveInfo::from_ip(ip));
        return;
    }
    match resolver.lookup(&addr.host).await {
        Ok(ips) => {
            trace!(host = %addr.host, ipv4 = ?ips.ipv4, ipv6 = ?ips.ipv6, "resolved");
            addr.resolve_info = Some(ips.into());
        }
        Err(e) => {
            warn!(host = %addr.host, error = %e, "resolution failed");
            addr.resolve_info = Some(ResolveInfo::from_error(e));
        }
    }
}

#[async_trait]
impl Outbound for ResolverOutbound {
    async fn tcp(&self, addr: &mut Addr) -> Result<TcpStream, OutboundError> {
        resolve(&self.resolver, addr).await;
        self.inner.tcp(addr).await
    }

    async fn udp(&self, addr: &mut Addr) -> Result<Box<dyn UdpConn>, OutboundError> {
        resolve(&self.resolver, addr).await;
        let conn = self.inner.udp(addr).await?;
        Ok(Box::new(ResolvingUdpConn {
            resolver: self.resolver.clone(),
            inner: conn,
        }))
    }
}

/// Resolves every datagram destination before handing it to `inner`.
#[derive(Debug)]
struct ResolvingUdpConn {
    resolver: DnsResolver,
    inner: Box<dyn UdpConn>,
}

#[async_trait]
impl UdpConn for ResolvingUdpConn {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Addr), OutboundError> {
        self.inner.recv_from(buf).await
    }

    async fn send_to(&self, buf: &[u8], addr: &Addr) -> Result<usize, OutboundError> {
        let mut addr = addr.clone();
        resolve(&self.resolver, &mut addr).await;
        self.inner.send_to(buf, &addr).await
    }
}
