//! Outbound that refuses every request.

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::addr::Addr;
use crate::error::OutboundError;
use crate::traits::{Outbound, UdpConn};

#[derive(Debug, Default, Clone, Copy)]
pub struct RejectOutbound;

impl RejectOutbound {
    fn reject(addr: &Addr, proto: &'static str) -> OutboundError {
        debug!(host = %addr.host, port = addr.port, proto, "request rejected");
        OutboundError::Rejected {
            host: addr.host.clone(),
            port: addr.port,
        }
    }
}

#[async_trait]
impl Outbound for RejectOutbound {
    async fn tcp(&self, addr: &mut Addr) -> Result<TcpStream, OutboundError> {
        Err(Self::reject(addr, "tcp"))
    }

    async fn udp(&self, addr: &mut Addr) -> Result<Box<dyn UdpConn>, OutboundError> {
        Err(Self::reject(addr, "udp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_both_protocols() {
        let reject = RejectOutbound;
        let mut addr = Addr::new("blocked.example", 443);
        let err = reject.tcp(&mut addr).await.unwrap_err();
        assert!(matches!(err, OutboundError::Rejected { ref host, port: 443 } if host == "blocked.example"));
        assert!(matches!(
            reject.udp(&mut addr).await,
            Err(OutboundError::Rejected { .. })
        ));
    }
}
