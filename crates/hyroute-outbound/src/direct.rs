//! Direct outbound: dial the destination from this host.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::select_ok;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tracing::debug;

use crate::addr::Addr;
use crate::config::OutboundConfig;
use crate::error::OutboundError;
use crate::traits::{Outbound, UdpConn};

/// Address family policy of a direct outbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectMode {
    /// Race IPv4 and IPv6 and keep whichever connects first.
    #[default]
    Auto,
    /// Prefer IPv6, fall back to IPv4.
    Prefer64,
    /// Prefer IPv4, fall back to IPv6.
    Prefer46,
    Only6,
    Only4,
}

impl FromStr for DirectMode {
    type Err = OutboundError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(DirectMode::Auto),
            "64" => Ok(DirectMode::Prefer64),
            "46" => Ok(DirectMode::Prefer46),
            "6" => Ok(DirectMode::Only6),
            "4" => Ok(DirectMode::Only4),
            other => Err(OutboundError::Config(format!(
                "unsupported direct mode '{other}'"
            ))),
        }
    }
}

/// Destination addresses available for one request, at most one per family.
#[derive(Debug, Clone, Copy, Default)]
struct Targets {
    v4: Option<Ipv4Addr>,
    v6: Option<Ipv6Addr>,
}

impl Targets {
    fn push(&mut self, ip: IpAddr) {
        match ip.to_canonical() {
            IpAddr::V4(v4) => {
                self.v4.get_or_insert(v4);
            }
            IpAddr::V6(v6) => {
                self.v6.get_or_insert(v6);
            }
        }
    }
}

/// Find the destination IPs: literal host, then resolver-stage results,
/// then the system resolver.
async fn targets(addr: &Addr) -> Result<Targets, OutboundError> {
    let mut targets = Targets::default();
    if let Some(ip) = addr.host_ip() {
        targets.push(ip);
        return Ok(targets);
    }

    if let Some(info) = &addr.resolve_info {
        if !info.has_ip() {
            let reason = info.error.as_deref().unwrap_or("no address found");
            return Err(OutboundError::resolve(&addr.host, reason));
        }
        targets.v4 = info.ipv4;
        targets.v6 = info.ipv6;
        return Ok(targets);
    }

    let resolved = tokio::net::lookup_host((addr.host.as_str(), addr.port))
        .await
        .map_err(|e| OutboundError::resolve(&addr.host, e.to_string()))?;
    for sa in resolved {
        targets.push(sa.ip());
        if targets.v4.is_some() && targets.v6.is_some() {
            break;
        }
    }
    if targets.v4.is_none() && targets.v6.is_none() {
        return Err(OutboundError::resolve(&addr.host, "no address found"));
    }
    Ok(targets)
}

/// Outbound that connects straight to the destination.
#[derive(Debug, Clone)]
pub struct DirectOutbound {
    mode: DirectMode,
    bind_ipv4: Option<Ipv4Addr>,
    bind_ipv6: Option<Ipv6Addr>,
    bind_device: Option<String>,
    dial_timeout: Duration,
    no_delay: bool,
}

impl Default for DirectOutbound {
    fn default() -> Self {
        Self::new(DirectMode::Auto)
    }
}

impl DirectOutbound {
    pub fn new(mode: DirectMode) -> Self {
        Self {
            mode,
            bind_ipv4: None,
            bind_ipv6: None,
            bind_device: None,
            dial_timeout: Duration::from_secs(hyroute_core::DEFAULT_DIAL_TIMEOUT_SECS),
            no_delay: hyroute_core::DEFAULT_TCP_NO_DELAY,
        }
    }

    /// Bind outgoing sockets to local source addresses.
    pub fn with_bind_ips(
        mut self,
        bind_ipv4: Option<Ipv4Addr>,
        bind_ipv6: Option<Ipv6Addr>,
    ) -> Result<Self, OutboundError> {
        if self.bind_device.is_some() && (bind_ipv4.is_some() || bind_ipv6.is_some()) {
            return Err(OutboundError::Config(
                "cannot bind both IP and device".to_string(),
            ));
        }
        self.bind_ipv4 = bind_ipv4;
        self.bind_ipv6 = bind_ipv6;
        Ok(self)
    }

    /// Bind outgoing sockets to a network interface.
    pub fn with_bind_device(mut self, device: impl Into<String>) -> Result<Self, OutboundError> {
        if self.bind_ipv4.is_some() || self.bind_ipv6.is_some() {
            return Err(OutboundError::Config(
                "cannot bind both IP and device".to_string(),
            ));
        }
        if !cfg!(any(target_os = "linux", target_os = "android")) {
            return Err(OutboundError::Config(
                "binding to a device is only supported on Linux".to_string(),
            ));
        }
        self.bind_device = Some(device.into());
        Ok(self)
    }

    #[must_use]
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn mode(&self) -> DirectMode {
        self.mode
    }

    /// Build a direct outbound from a `type: direct` config entry.
    pub fn from_config(cfg: &OutboundConfig) -> Result<Self, OutboundError> {
        let name = &cfg.name;
        let mode_str = cfg
            .mode
            .as_deref()
            .unwrap_or(hyroute_core::DEFAULT_DIRECT_MODE);
        let mode = mode_str.parse::<DirectMode>().map_err(|_| {
            OutboundError::Config(format!("outbound '{name}': unsupported mode '{mode_str}'"))
        })?;
        let bind_ipv4 = cfg
            .bind_ipv4
            .as_deref()
            .map(|s| {
                s.parse::<Ipv4Addr>().map_err(|e| {
                    OutboundError::Config(format!(
                        "outbound '{name}': invalid bind_ipv4 '{s}': {e}"
                    ))
                })
            })
            .transpose()?;
        let bind_ipv6 = cfg
            .bind_ipv6
            .as_deref()
            .map(|s| {
                s.parse::<Ipv6Addr>().map_err(|e| {
                    OutboundError::Config(format!(
                        "outbound '{name}': invalid bind_ipv6 '{s}': {e}"
                    ))
                })
            })
            .transpose()?;

        let mut direct = Self::new(mode)
            .with_dial_timeout(Duration::from_secs(cfg.dial_timeout_secs))
            .with_bind_ips(bind_ipv4, bind_ipv6)?;
        if let Some(device) = cfg.bind_device.as_deref().filter(|d| !d.is_empty()) {
            direct = direct.with_bind_device(device)?;
        }
        Ok(direct)
    }

    /// Create a non-blocking socket of the given family, bound as configured.
    fn socket(&self, ipv4: bool, ty: Type, proto: Protocol) -> io::Result<Socket> {
        let domain = if ipv4 { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, ty, Some(proto))?;
        socket.set_nonblocking(true)?;

        #[cfg(any(target_os = "linux", target_os = "android"))]
        if let Some(device) = &self.bind_device {
            socket.bind_device(Some(device.as_bytes()))?;
        }

        let bind = match (ipv4, self.bind_ipv4, self.bind_ipv6) {
            (true, Some(ip), _) => Some(IpAddr::V4(ip)),
            (false, _, Some(ip)) => Some(IpAddr::V6(ip)),
            _ => None,
        };
        if let Some(ip) = bind {
            socket.bind(&SocketAddr::new(ip, 0).into())?;
        }
        Ok(socket)
    }

    async fn dial(&self, ip: IpAddr, port: u16) -> Result<TcpStream, OutboundError> {
        let socket = self.socket(ip.is_ipv4(), Type::STREAM, Protocol::TCP)?;
        let socket = TcpSocket::from_std_stream(socket.into());
        let target = SocketAddr::new(ip, port);
        let stream = tokio::time::timeout(self.dial_timeout, socket.connect(target))
            .await
            .map_err(|_| OutboundError::Timeout(self.dial_timeout))??;
        stream.set_nodelay(self.no_delay)?;
        Ok(stream)
    }

    /// Dial `first`, then `second` if the first attempt fails.
    async fn dial_fallback(
        &self,
        host: &str,
        first: Option<IpAddr>,
        second: Option<IpAddr>,
        port: u16,
    ) -> Result<TcpStream, OutboundError> {
        match (first, second) {
            (Some(a), Some(b)) => match self.dial(a, port).await {
                Ok(stream) => Ok(stream),
                Err(e) => {
                    debug!(ip = %a, error = %e, "preferred family failed, trying fallback");
                    self.dial(b, port).await
                }
            },
            (Some(ip), None) | (None, Some(ip)) => self.dial(ip, port).await,
            (None, None) => Err(OutboundError::resolve(host, "no address found")),
        }
    }

    fn family_error(host: &str, family: &str) -> OutboundError {
        OutboundError::resolve(host, format!("no {family} address"))
    }
}

#[async_trait]
impl Outbound for DirectOutbound {
    async fn tcp(&self, addr: &mut Addr) -> Result<TcpStream, OutboundError> {
        let t = targets(addr).await?;
        let v4 = t.v4.map(IpAddr::V4);
        let v6 = t.v6.map(IpAddr::V6);

        match self.mode {
            DirectMode::Only4 => {
                let ip = v4.ok_or_else(|| Self::family_error(&addr.host, "IPv4"))?;
                self.dial(ip, addr.port).await
            }
            DirectMode::Only6 => {
                let ip = v6.ok_or_else(|| Self::family_error(&addr.host, "IPv6"))?;
                self.dial(ip, addr.port).await
            }
            DirectMode::Prefer46 => self.dial_fallback(&addr.host, v4, v6, addr.port).await,
            DirectMode::Prefer64 => self.dial_fallback(&addr.host, v6, v4, addr.port).await,
            DirectMode::Auto => match (v4, v6) {
                (Some(a), Some(b)) => {
                    let attempts = [
                        Box::pin(self.dial(a, addr.port)),
                        Box::pin(self.dial(b, addr.port)),
                    ];
                    let (stream, _) = select_ok(attempts).await?;
                    Ok(stream)
                }
                (first, second) => self.dial_fallback(&addr.host, first, second, addr.port).await,
            },
        }
    }

    async fn udp(&self, addr: &mut Addr) -> Result<Box<dyn UdpConn>, OutboundError> {
        let ipv4 = match self.mode {
            DirectMode::Only4 => true,
            DirectMode::Only6 => false,
            mode => {
                let t = targets(addr).await?;
                match mode {
                    DirectMode::Prefer46 => t.v4.is_some(),
                    _ => t.v6.is_none(),
                }
            }
        };

        let socket = self.socket(ipv4, Type::DGRAM, Protocol::UDP)?;
        if !ipv4 && self.bind_ipv6.is_none() {
            // Dual-stack so IPv4 destinations can be reached as mapped addresses.
            socket.set_only_v6(false)?;
        }
        if (ipv4 && self.bind_ipv4.is_none()) || (!ipv4 && self.bind_ipv6.is_none()) {
            let any = if ipv4 {
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            } else {
                IpAddr::V6(Ipv6Addr::UNSPECIFIED)
            };
            socket.bind(&SocketAddr::new(any, 0).into())?;
        }
        let socket = UdpSocket::from_std(socket.into())?;

        debug!(dest = %addr, ipv4, "direct udp association opened");
        Ok(Box::new(DirectUdpConn {
            socket,
            ipv4,
            dual_stack: !ipv4 && self.bind_ipv6.is_none(),
            mode: self.mode,
        }))
    }
}

/// One local UDP socket per association.
#[derive(Debug)]
struct DirectUdpConn {
    socket: UdpSocket,
    ipv4: bool,
    dual_stack: bool,
    mode: DirectMode,
}

impl DirectUdpConn {
    fn destination(&self, host: &str, t: Targets, port: u16) -> Result<SocketAddr, OutboundError> {
        let mapped = |v4: Ipv4Addr| IpAddr::V6(v4.to_ipv6_mapped());
        let ip = if self.ipv4 {
            t.v4.map(IpAddr::V4)
                .ok_or_else(|| DirectOutbound::family_error(host, "IPv4"))?
        } else {
            let v4 = t.v4.filter(|_| self.dual_stack && self.mode != DirectMode::Only6);
            let v6 = t.v6.map(IpAddr::V6);
            let ip = match self.mode {
                DirectMode::Prefer46 => v4.map(mapped).or(v6),
                _ => v6.or(v4.map(mapped)),
            };
            ip.ok_or_else(|| DirectOutbound::family_error(host, "reachable"))?
        };
        Ok(SocketAddr::new(ip, port))
    }
}

#[async_trait]
impl UdpConn for DirectUdpConn {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Addr), OutboundError> {
        let (n, from) = self.socket.recv_from(buf).await?;
        Ok((n, Addr::from(from)))
    }

    async fn send_to(&self, buf: &[u8], addr: &Addr) -> Result<usize, OutboundError> {
        let t = targets(addr).await?;
        let dest = self.destination(&addr.host, t, addr.port)?;
        Ok(self.socket.send_to(buf, dest).await?)
    }
}
