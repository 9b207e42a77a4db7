//! SOCKS5 client outbound (RFC 1928, RFC 1929).
//!
//! TCP requests use CONNECT. UDP associations use UDP ASSOCIATE and keep
//! the control connection open for as long as the association lives; the
//! association fails once the server closes it.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::addr::Addr;
use crate::config::OutboundConfig;
use crate::error::OutboundError;
use crate::traits::{Outbound, UdpConn};

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_METHOD_NONE: u8 = 0x00;
const AUTH_METHOD_PASSWORD: u8 = 0x02;
const AUTH_METHOD_NO_ACCEPTABLE: u8 = 0xFF;
const AUTH_PASSWORD_VERSION: u8 = 0x01;

const CMD_CONNECT: u8 = 0x01;
const CMD_UDP_ASSOCIATE: u8 = 0x03;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REPLY_SUCCEEDED: u8 = 0x00;

/// Largest datagram accepted from the relay.
const MAX_UDP_PACKET: usize = 65535;

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}

fn socks_err(msg: impl Into<String>) -> OutboundError {
    OutboundError::Socks5(msg.into())
}

/// Destination as sent on the wire: resolved IPv4 first, then IPv6, then
/// the domain name.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TargetAddr<'a> {
    Ip(IpAddr),
    Domain(&'a str),
}

impl<'a> TargetAddr<'a> {
    fn from_addr(addr: &'a Addr) -> Self {
        if let Some(ip) = addr.host_ip() {
            return TargetAddr::Ip(ip);
        }
        let info = addr.resolve_info.as_ref();
        if let Some(v4) = info.and_then(|i| i.ipv4) {
            TargetAddr::Ip(IpAddr::V4(v4))
        } else if let Some(v6) = info.and_then(|i| i.ipv6) {
            TargetAddr::Ip(IpAddr::V6(v6))
        } else {
            TargetAddr::Domain(&addr.host)
        }
    }

    /// Append `ATYP | ADDR | PORT`.
    fn encode(&self, port: u16, buf: &mut BytesMut) -> Result<(), OutboundError> {
        match self {
            TargetAddr::Ip(IpAddr::V4(ip)) => {
                buf.put_u8(ATYP_IPV4);
                buf.put_slice(&ip.octets());
            }
            TargetAddr::Ip(IpAddr::V6(ip)) => {
                buf.put_u8(ATYP_IPV6);
                buf.put_slice(&ip.octets());
            }
            TargetAddr::Domain(domain) => {
                let len = u8::try_from(domain.len())
                    .map_err(|_| socks_err(format!("domain too long: {domain}")))?;
                buf.put_u8(ATYP_DOMAIN);
                buf.put_u8(len);
                buf.put_slice(domain.as_bytes());
            }
        }
        buf.put_u16(port);
        Ok(())
    }
}

/// Parse `ATYP | ADDR | PORT` at the start of `buf`.
///
/// Returns the address and the number of bytes consumed.
fn decode_addr(buf: &[u8]) -> Option<(Addr, usize)> {
    let atyp = *buf.first()?;
    let (host, len) = match atyp {
        ATYP_IPV4 => {
            let octets: [u8; 4] = buf.get(1..5)?.try_into().ok()?;
            (Ipv4Addr::from(octets).to_string(), 4)
        }
        ATYP_IPV6 => {
            let octets: [u8; 16] = buf.get(1..17)?.try_into().ok()?;
            (Ipv6Addr::from(octets).to_canonical().to_string(), 16)
        }
        ATYP_DOMAIN => {
            let n = *buf.get(1)? as usize;
            let name = std::str::from_utf8(buf.get(2..2 + n)?).ok()?;
            (name.to_string(), n + 1)
        }
        _ => return None,
    };
    let port_at = 1 + len;
    let port = u16::from_be_bytes(buf.get(port_at..port_at + 2)?.try_into().ok()?);
    let addr = match host.parse::<IpAddr>() {
        Ok(ip) if atyp != ATYP_DOMAIN => Addr::from(SocketAddr::new(ip, port)),
        _ => Addr::new(host, port),
    };
    Some((addr, port_at + 2))
}

/// Outbound that relays through an upstream SOCKS5 server.
#[derive(Debug, Clone)]
pub struct Socks5Outbound {
    server: String,
    auth: Option<(String, String)>,
    dial_timeout: Duration,
}

impl Socks5Outbound {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            auth: None,
            dial_timeout: Duration::from_secs(hyroute_core::DEFAULT_DIAL_TIMEOUT_SECS),
        }
    }

    /// Use RFC 1929 username/password authentication.
    pub fn with_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, OutboundError> {
        let (username, password) = (username.into(), password.into());
        if username.len() > 255 || password.len() > 255 {
            return Err(OutboundError::Config(
                "socks5 username and password must be at most 255 bytes".to_string(),
            ));
        }
        self.auth = Some((username, password));
        Ok(self)
    }

    #[must_use]
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Build a SOCKS5 outbound from a `type: socks5` config entry.
    pub fn from_config(cfg: &OutboundConfig) -> Result<Self, OutboundError> {
        let name = &cfg.name;
        let server = cfg
            .addr
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                OutboundError::Config(format!("outbound '{name}': addr is required for socks5"))
            })?;
        hyroute_dns::split_host_port(server).map_err(|e| {
            OutboundError::Config(format!("outbound '{name}': invalid addr '{server}': {e}"))
        })?;

        let mut outbound = Self::new(server).with_dial_timeout(Duration::from_secs(cfg.dial_timeout_secs));
        match (cfg.username.as_deref(), cfg.password.as_deref()) {
            (None, None) => {}
            (Some(user), pass) => outbound = outbound.with_auth(user, pass.unwrap_or_default())?,
            (None, Some(_)) => {
                return Err(OutboundError::Config(format!(
                    "outbound '{name}': password given without username"
                )));
            }
        }
        Ok(outbound)
    }

    /// Connect to the server and run method negotiation plus authentication.
    async fn connect_server(&self) -> Result<TcpStream, OutboundError> {
        let fut = async {
            let mut stream = TcpStream::connect(&self.server).await?;
            stream.set_nodelay(hyroute_core::DEFAULT_TCP_NO_DELAY)?;
            self.negotiate(&mut stream).await?;
            Ok::<_, OutboundError>(stream)
        };
        tokio::time::timeout(self.dial_timeout, fut)
            .await
            .map_err(|_| OutboundError::Timeout(self.dial_timeout))?
    }

    async fn negotiate(&self, stream: &mut TcpStream) -> Result<(), OutboundError> {
        let greeting: &[u8] = if self.auth.is_some() {
            &[SOCKS5_VERSION, 2, AUTH_METHOD_NONE, AUTH_METHOD_PASSWORD]
        } else {
            &[SOCKS5_VERSION, 1, AUTH_METHOD_NONE]
        };
        stream.write_all(greeting).await?;

        let mut response = [0u8; 2];
        stream.read_exact(&mut response).await?;
        if response[0] != SOCKS5_VERSION {
            return Err(socks_err(format!("invalid version {:#04x}", response[0])));
        }

        match (response[1], &self.auth) {
            (AUTH_METHOD_NONE, _) => Ok(()),
            (AUTH_METHOD_PASSWORD, Some((user, pass))) => {
                let mut req = BytesMut::with_capacity(3 + user.len() + pass.len());
                req.put_u8(AUTH_PASSWORD_VERSION);
                req.put_u8(user.len() as u8);
                req.put_slice(user.as_bytes());
                req.put_u8(pass.len() as u8);
                req.put_slice(pass.as_bytes());
                stream.write_all(&req).await?;

                let mut status = [0u8; 2];
                stream.read_exact(&mut status).await?;
                if status[1] != 0x00 {
                    return Err(socks_err("authentication failed"));
                }
                trace!(server = %self.server, "socks5 authenticated");
                Ok(())
            }
            (AUTH_METHOD_NO_ACCEPTABLE, _) => Err(socks_err("no acceptable authentication method")),
            (other, _) => Err(socks_err(format!("unsupported auth method {other:#04x}"))),
        }
    }

    /// Send a request and read the reply. Returns the bound address.
    async fn request(
        &self,
        stream: &mut TcpStream,
        cmd: u8,
        target: &TargetAddr<'_>,
        port: u16,
    ) -> Result<Addr, OutboundError> {
        let mut req = BytesMut::with_capacity(262);
        req.put_slice(&[SOCKS5_VERSION, cmd, 0x00]);
        target.encode(port, &mut req)?;
        stream.write_all(&req).await?;

        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await?;
        if header[0] != SOCKS5_VERSION {
            return Err(socks_err(format!("invalid version {:#04x}", header[0])));
        }
        if header[1] != REPLY_SUCCEEDED {
            return Err(socks_err(format!(
                "server replied {:#04x}: {}",
                header[1],
                reply_message(header[1])
            )));
        }

        let rest = match header[3] {
            ATYP_IPV4 => 4 + 2,
            ATYP_IPV6 => 16 + 2,
            ATYP_DOMAIN => stream.read_u8().await? as usize + 2,
            other => return Err(socks_err(format!("invalid address type {other:#04x}"))),
        };
        let mut bound = vec![0u8; rest + 2];
        bound[0] = header[3];
        let offset = if header[3] == ATYP_DOMAIN {
            bound[1] = (rest - 2) as u8;
            2
        } else {
            1
        };
        bound.truncate(offset + rest);
        stream.read_exact(&mut bound[offset..]).await?;
        decode_addr(&bound)
            .map(|(addr, _)| addr)
            .ok_or_else(|| socks_err("malformed bound address"))
    }
}

#[async_trait]
impl Outbound for Socks5Outbound {
    async fn tcp(&self, addr: &mut Addr) -> Result<TcpStream, OutboundError> {
        let mut stream = self.connect_server().await?;
        let target = TargetAddr::from_addr(addr);
        self.request(&mut stream, CMD_CONNECT, &target, addr.port).await?;
        debug!(server = %self.server, dest = %addr, "socks5 connect established");
        Ok(stream)
    }

    async fn udp(&self, addr: &mut Addr) -> Result<Box<dyn UdpConn>, OutboundError> {
        let mut control = self.connect_server().await?;
        let any = TargetAddr::Ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let bound = self.request(&mut control, CMD_UDP_ASSOCIATE, &any, 0).await?;

        let relay_ip = match bound.host_ip() {
            Some(ip) if !ip.is_unspecified() => ip,
            Some(_) => control.peer_addr()?.ip(),
            None => return Err(socks_err("relay address must be an IP")),
        };
        let relay = SocketAddr::new(relay_ip, bound.port);

        let local: SocketAddr = if relay.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(relay).await?;

        let (closed_tx, closed_rx) = watch::channel(false);
        let watcher = tokio::spawn(async move {
            // The server closes the control connection when it drops the association.
            let mut buf = [0u8; 64];
            loop {
                match control.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = closed_tx.send(true);
        });

        debug!(server = %self.server, relay = %relay, dest = %addr, "socks5 udp association opened");
        Ok(Box::new(Socks5UdpConn {
            socket,
            closed: closed_rx,
            watcher,
        }))
    }
}

#[derive(Debug)]
struct Socks5UdpConn {
    socket: UdpSocket,
    closed: watch::Receiver<bool>,
    watcher: JoinHandle<()>,
}

impl Socks5UdpConn {
    fn closed_error() -> OutboundError {
        socks_err("udp association closed by server")
    }
}

impl Drop for Socks5UdpConn {
    fn drop(&mut self) {
        // Dropping the watcher task closes the control connection.
        self.watcher.abort();
    }
}

#[async_trait]
impl UdpConn for Socks5UdpConn {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Addr), OutboundError> {
        let mut closed = self.closed.clone();
        let mut packet = vec![0u8; MAX_UDP_PACKET];
        loop {
            if *closed.borrow() {
                return Err(Self::closed_error());
            }
            let n = tokio::select! {
                res = self.socket.recv(&mut packet) => res?,
                _ = closed.changed() => return Err(Self::closed_error()),
            };

            // RSV(2) FRAG(1) ATYP ADDR PORT DATA
            if n < 4 || packet[2] != 0x00 {
                trace!(len = n, "dropping fragmented or short socks5 datagram");
                continue;
            }
            let Some((from, header_len)) = decode_addr(&packet[3..n]) else {
                trace!(len = n, "dropping malformed socks5 datagram");
                continue;
            };
            let payload = &packet[3 + header_len..n];
            let len = payload.len().min(buf.len());
            buf[..len].copy_from_slice(&payload[..len]);
            return Ok((len, from));
        }
    }

    async fn send_to(&self, buf: &[u8], addr: &Addr) -> Result<usize, OutboundError> {
        if *self.closed.borrow() {
            return Err(Self::closed_error());
        }
        let mut packet = BytesMut::with_capacity(3 + 262 + buf.len());
        packet.put_slice(&[0x00, 0x00, 0x00]);
        TargetAddr::from_addr(addr).encode(addr.port, &mut packet)?;
        packet.put_slice(buf);
        self.socket.send(&packet).await?;
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::ResolveInfo;

    fn encoded(addr: &Addr) -> Vec<u8> {
        let mut buf = BytesMut::new();
        TargetAddr::from_addr(addr).encode(addr.port, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn target_prefers_ipv4_then_ipv6_then_domain() {
        let mut addr = Addr::new("example.com", 443);
        assert_eq!(TargetAddr::from_addr(&addr), TargetAddr::Domain("example.com"));

        addr.resolve_info = Some(ResolveInfo {
            ipv4: None,
            ipv6: Some(Ipv6Addr::LOCALHOST),
            error: None,
        });
        assert_eq!(TargetAddr::from_addr(&addr), TargetAddr::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));

        addr.resolve_info = Some(ResolveInfo {
            ipv4: Some(Ipv4Addr::new(192, 0, 2, 1)),
            ipv6: Some(Ipv6Addr::LOCALHOST),
            error: None,
        });
        assert_eq!(
            TargetAddr::from_addr(&addr),
            TargetAddr::Ip(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)))
        );
    }

    #[test]
    fn encode_wire_format() {
        assert_eq!(encoded(&Addr::new("1.2.3.4", 80)), [ATYP_IPV4, 1, 2, 3, 4, 0, 80]);
        let domain = encoded(&Addr::new("ab.c", 0x1f90));
        assert_eq!(domain, [ATYP_DOMAIN, 4, b'a', b'b', b'.', b'c', 0x1f, 0x90]);
        let v6 = encoded(&Addr::new("::1", 53));
        assert_eq!(v6[0], ATYP_IPV6);
        assert_eq!(v6.len(), 1 + 16 + 2);
    }

    #[test]
    fn long_domain_rejected() {
        let host = "a".repeat(256);
        let mut buf = BytesMut::new();
        TargetAddr::from_addr(&Addr::new(host, 1))
            .encode(1, &mut buf)
            .unwrap_err();
    }

    #[test]
    fn decode_addresses() {
        let (addr, used) = decode_addr(&[ATYP_IPV4, 10, 0, 0, 1, 0, 53, 0xAA]).unwrap();
        assert_eq!(addr.host, "10.0.0.1");
        assert_eq!(addr.port, 53);
        assert_eq!(used, 7);

        let (addr, used) = decode_addr(&[ATYP_DOMAIN, 3, b'f', b'o', b'o', 1, 0]).unwrap();
        assert_eq!(addr.host, "foo");
        assert_eq!(addr.port, 256);
        assert_eq!(used, 7);

        assert!(decode_addr(&[ATYP_IPV4, 10, 0]).is_none());
        assert!(decode_addr(&[0x09, 0, 0]).is_none());
    }

    #[test]
    fn from_config_validation() {
        let cfg: OutboundConfig =
            serde_yaml::from_str("{name: s, type: socks5, addr: '127.0.0.1:1080', username: u, password: p}").unwrap();
        let ob = Socks5Outbound::from_config(&cfg).unwrap();
        assert_eq!(ob.server(), "127.0.0.1:1080");
        assert!(ob.auth.is_some());

        let cfg: OutboundConfig = serde_yaml::from_str("{name: s, type: socks5}").unwrap();
        Socks5Outbound::from_config(&cfg).unwrap_err();

        let cfg: OutboundConfig = serde_yaml::from_str("{name: s, type: socks5, addr: 'proxy'}").unwrap();
        Socks5Outbound::from_config(&cfg).unwrap_err();

        let cfg: OutboundConfig =
            serde_yaml::from_str("{name: s, type: socks5, addr: 'proxy:1080', password: p}").unwrap();
        Socks5Outbound::from_config(&cfg).unwrap_err();
    }
}
