//! ACL stage: picks a named outbound for each request.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hyroute_acl::{CompiledRuleSet, Protocol, RouteMatch};
use tokio::net::TcpStream;
use tracing::debug;

use crate::addr::{Addr, ResolveInfo};
use crate::error::OutboundError;
use crate::traits::{NamedOutbound, Outbound, UdpConn};

pub type AclRules = CompiledRuleSet<Arc<NamedOutbound>>;

/// Routes requests through the first matching rule's outbound.
///
/// Requests that match nothing fail with [`OutboundError::Unroutable`].
/// A hijacked request is dialed at a rewritten copy of the address, so the
/// caller's address keeps the requested host.
///
/// A UDP association is routed once, by its first destination. Later
/// datagrams are hijacked only by rules that select the same outbound.
#[derive(Debug, Clone)]
pub struct AclOutbound {
    rules: Arc<AclRules>,
}

impl AclOutbound {
    pub fn new(rules: AclRules) -> Self {
        Self {
            rules: Arc::new(rules),
        }
    }

    pub fn rules(&self) -> &AclRules {
        &self.rules
    }

    /// Select the outbound for `addr`. The second value is the rewritten
    /// destination when the matching rule hijacks.
    fn route(
        &self,
        addr: &Addr,
        protocol: Protocol,
    ) -> Result<(Arc<NamedOutbound>, Option<Addr>), OutboundError> {
        let Some(RouteMatch { outbound, hijack }) = route_match(&self.rules, addr, protocol) else {
            debug!(host = %addr.host, port = addr.port, %protocol, "no matching rule");
            return Err(OutboundError::Unroutable {
                host: addr.host.clone(),
                port: addr.port,
            });
        };
        let Some(ip) = hijack else {
            debug!(host = %addr.host, port = addr.port, %protocol, outbound = %outbound, "routed");
            return Ok((outbound, None));
        };
        debug!(
            host = %addr.host,
            port = addr.port,
            hijack = %ip,
            outbound = %outbound,
            "hijacking destination"
        );
        Ok((outbound, Some(rewritten(addr, ip))))
    }
}

fn route_match(rules: &AclRules, addr: &Addr, protocol: Protocol) -> Option<RouteMatch<Arc<NamedOutbound>>> {
    rules.match_host(&addr.host_info(), protocol, addr.port)
}

/// Copy of `addr` pointed at `ip`, keeping the port.
fn rewritten(addr: &Addr, ip: IpAddr) -> Addr {
    let mut target = addr.clone();
    target.host = ip.to_string();
    target.resolve_info = Some(ResolveInfo::from_ip(ip));
    target
}

#[async_trait]
impl Outbound for AclOutbound {
    async fn tcp(&self, addr: &mut Addr) -> Result<TcpStream, OutboundError> {
        match self.route(addr, Protocol::Tcp)? {
            (selected, Some(mut target)) => selected.outbound.tcp(&mut target).await,
            (selected, None) => selected.outbound.tcp(addr).await,
        }
    }

    async fn udp(&self, addr: &mut Addr) -> Result<Box<dyn UdpConn>, OutboundError> {
        let (selected, hijacked) = self.route(addr, Protocol::Udp)?;
        let conn = match hijacked {
            Some(mut target) => selected.outbound.udp(&mut target).await?,
            None => selected.outbound.udp(addr).await?,
        };
        Ok(Box::new(AclUdpConn {
            rules: self.rules.clone(),
            outbound: selected,
            inner: conn,
        }))
    }
}

#[derive(Debug)]
struct AclUdpConn {
    rules: Arc<AclRules>,
    /// Outbound the association was opened on.
    outbound: Arc<NamedOutbound>,
    inner: Box<dyn UdpConn>,
}

#[async_trait]
impl UdpConn for AclUdpConn {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Addr), OutboundError> {
        self.inner.recv_from(buf).await
    }

    async fn send_to(&self, buf: &[u8], addr: &Addr) -> Result<usize, OutboundError> {
        if let Some(RouteMatch {
            outbound,
            hijack: Some(ip),
        }) = route_match(&self.rules, addr, Protocol::Udp)
            && Arc::ptr_eq(&outbound, &self.outbound)
        {
            debug!(host = %addr.host, port = addr.port, hijack = %ip, "hijacking datagram");
            return self.inner.send_to(buf, &rewritten(addr, ip)).await;
        }
        self.inner.send_to(buf, addr).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyroute_acl::{RawRule, RulesError, compile};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Recorder {
        seen: Mutex<Vec<Addr>>,
        sent: Arc<Mutex<Vec<Addr>>>,
    }

    #[derive(Debug)]
    struct RecordingUdp {
        sent: Arc<Mutex<Vec<Addr>>>,
    }

    #[async_trait]
    impl UdpConn for RecordingUdp {
        async fn recv_from(&self, _buf: &mut [u8]) -> Result<(usize, Addr), OutboundError> {
            Err(OutboundError::Socks5("closed".into()))
        }

        async fn send_to(&self, buf: &[u8], addr: &Addr) -> Result<usize, OutboundError> {
            self.sent.lock().unwrap().push(addr.clone());
            Ok(buf.len())
        }
    }

    #[async_trait]
    impl Outbound for Recorder {
        async fn tcp(&self, addr: &mut Addr) -> Result<TcpStream, OutboundError> {
            self.seen.lock().unwrap().push(addr.clone());
            Err(OutboundError::Rejected {
                host: addr.host.clone(),
                port: addr.port,
            })
        }

        async fn udp(&self, addr: &mut Addr) -> Result<Box<dyn UdpConn>, OutboundError> {
            self.seen.lock().unwrap().push(addr.clone());
            Ok(Box::new(RecordingUdp {
                sent: self.sent.clone(),
            }))
        }
    }

    fn acl(rules: &[RawRule], table: &[(&str, Arc<Recorder>)]) -> AclOutbound {
        let outbounds: HashMap<String, Arc<NamedOutbound>> = table
            .iter()
            .map(|(name, rec)| (name.to_string(), NamedOutbound::new(*name, rec.clone())))
            .collect();
        let compiled = compile(rules, &outbounds, 16, || Err(RulesError::GeoIp("none".into()))).unwrap();
        AclOutbound::new(compiled)
    }

    #[tokio::test]
    async fn first_match_selects_outbound() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let stage = acl(
            &[RawRule::new(1, "a", "*.example.com"), RawRule::new(2, "b", "all")],
            &[("a", a.clone()), ("b", b.clone())],
        );

        stage.tcp(&mut Addr::new("www.example.com", 443)).await.unwrap_err();
        stage.tcp(&mut Addr::new("other.org", 443)).await.unwrap_err();

        assert_eq!(a.seen.lock().unwrap()[0].host, "www.example.com");
        assert_eq!(b.seen.lock().unwrap()[0].host, "other.org");
    }

    #[tokio::test]
    async fn hijack_rewrites_host_and_keeps_port() {
        let rec = Arc::new(Recorder::default());
        let stage = acl(
            &[RawRule::new(1, "out", "intercept.example").with_hijack("203.0.113.9")],
            &[("out", rec.clone())],
        );

        let mut addr = Addr::new("intercept.example", 8443);
        stage.tcp(&mut addr).await.unwrap_err();

        let seen = rec.seen.lock().unwrap();
        assert_eq!(seen[0].host, "203.0.113.9");
        assert_eq!(seen[0].port, 8443);
        assert_eq!(
            seen[0].resolve_info.as_ref().unwrap().ipv4,
            Some("203.0.113.9".parse().unwrap())
        );
        // The caller still sees what it asked for.
        assert_eq!(addr.host, "intercept.example");
        assert_eq!(addr.port, 8443);
        assert!(addr.resolve_info.is_none());
    }

    #[tokio::test]
    async fn udp_hijack_leaves_caller_address() {
        let rec = Arc::new(Recorder::default());
        let stage = acl(
            &[RawRule::new(1, "out", "intercept.example").with_hijack("203.0.113.9")],
            &[("out", rec.clone())],
        );

        let mut addr = Addr::new("intercept.example", 53);
        stage.udp(&mut addr).await.unwrap();
        assert_eq!(rec.seen.lock().unwrap()[0].host, "203.0.113.9");
        assert_eq!(addr.host, "intercept.example");
    }

    #[tokio::test]
    async fn no_match_is_unroutable() {
        let rec = Arc::new(Recorder::default());
        let stage = acl(&[RawRule::new(1, "out", "only.example")], &[("out", rec.clone())]);

        let err = stage.tcp(&mut Addr::new("else.example", 80)).await.unwrap_err();
        assert!(matches!(err, OutboundError::Unroutable { ref host, port: 80 } if host == "else.example"));
        assert!(rec.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn protocol_filter_applies() {
        let rec = Arc::new(Recorder::default());
        let stage = acl(
            &[RawRule::new(1, "out", "all").with_proto_port("udp/53")],
            &[("out", rec.clone())],
        );

        assert!(matches!(
            stage.tcp(&mut Addr::new("dns.example", 53)).await,
            Err(OutboundError::Unroutable { .. })
        ));
        stage.udp(&mut Addr::new("dns.example", 53)).await.unwrap();
        assert_eq!(rec.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn udp_datagrams_are_hijacked() {
        let rec = Arc::new(Recorder::default());
        let stage = acl(
            &[
                RawRule::new(1, "out", "all")
                    .with_proto_port("udp/53")
                    .with_hijack("192.0.2.53"),
                RawRule::new(2, "out", "all"),
            ],
            &[("out", rec.clone())],
        );

        let conn = stage.udp(&mut Addr::new("first.example", 443)).await.unwrap();
        conn.send_to(b"q", &Addr::new("8.8.8.8", 53)).await.unwrap();
        conn.send_to(b"q", &Addr::new("8.8.8.8", 443)).await.unwrap();

        let sent = rec.sent.lock().unwrap();
        assert_eq!(sent[0].host, "192.0.2.53");
        assert_eq!(sent[0].port, 53);
        assert_eq!(sent[1].host, "8.8.8.8");
    }

    #[tokio::test]
    async fn udp_hijack_ignores_rules_for_other_outbounds() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let stage = acl(
            &[
                RawRule::new(1, "a", "all")
                    .with_proto_port("udp/53")
                    .with_hijack("192.0.2.53"),
                RawRule::new(2, "b", "all"),
            ],
            &[("a", a.clone()), ("b", b.clone())],
        );

        // Routed to `b` by its first destination.
        let conn = stage.udp(&mut Addr::new("first.example", 443)).await.unwrap();
        conn.send_to(b"q", &Addr::new("8.8.8.8", 53)).await.unwrap();

        let sent = b.sent.lock().unwrap();
        assert_eq!(sent[0].host, "8.8.8.8");
        assert_eq!(sent[0].port, 53);
        assert!(a.seen.lock().unwrap().is_empty());
    }
}
