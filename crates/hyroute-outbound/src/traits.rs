//! The outbound capability shared by every chain stage.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::addr::Addr;
use crate::error::OutboundError;

/// Something that can carry a TCP connection or a UDP association.
///
/// Stages receive the request address mutably; a stage may fill
/// `resolve_info` or rewrite the host before delegating inward.
#[async_trait]
pub trait Outbound: Send + Sync + fmt::Debug {
    async fn tcp(&self, addr: &mut Addr) -> Result<TcpStream, OutboundError>;

    /// Open a UDP association. `addr` is the first destination.
    async fn udp(&self, addr: &mut Addr) -> Result<Box<dyn UdpConn>, OutboundError>;
}

/// A UDP association returned by an outbound.
#[async_trait]
pub trait UdpConn: Send + Sync + fmt::Debug {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Addr), OutboundError>;

    async fn send_to(&self, buf: &[u8], addr: &Addr) -> Result<usize, OutboundError>;
}

/// An outbound together with the name it was configured under.
///
/// This is the handle type stored in compiled ACL rules.
#[derive(Debug, Clone)]
pub struct NamedOutbound {
    pub name: String,
    pub outbound: Arc<dyn Outbound>,
}

impl NamedOutbound {
    pub fn new(name: impl Into<String>, outbound: Arc<dyn Outbound>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            outbound,
        })
    }
}

impl fmt::Display for NamedOutbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
