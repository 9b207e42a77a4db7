//! Outbound error types.

use std::time::Duration;

use hyroute_acl::RulesError;
use hyroute_core::{
    ERROR_CONFIG, ERROR_IO, ERROR_PROTOCOL, ERROR_REJECTED, ERROR_RESOLVE, ERROR_TIMEOUT,
    ERROR_UNROUTABLE,
};
use hyroute_dns::DnsError;

/// Errors raised while building or using an outbound chain.
#[derive(Debug, thiserror::Error)]
pub enum OutboundError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("resolve {host}: {reason}")]
    Resolve { host: String, reason: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("rejected {host}:{port}")]
    Rejected { host: String, port: u16 },
    #[error("no outbound selected for {host}:{port}")]
    Unroutable { host: String, port: u16 },
    #[error("socks5: {0}")]
    Socks5(String),
    #[error("config: {0}")]
    Config(String),
    #[error("acl: {0}")]
    Acl(#[from] RulesError),
    #[error("dns: {0}")]
    Dns(#[from] DnsError),
}

impl OutboundError {
    pub(crate) fn resolve(host: &str, reason: impl Into<String>) -> Self {
        OutboundError::Resolve {
            host: host.to_string(),
            reason: reason.into(),
        }
    }

    /// Get the error type string for logs and metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            OutboundError::Io(_) => ERROR_IO,
            OutboundError::Resolve { .. } | OutboundError::Dns(_) => ERROR_RESOLVE,
            OutboundError::Timeout(_) => ERROR_TIMEOUT,
            OutboundError::Rejected { .. } => ERROR_REJECTED,
            OutboundError::Unroutable { .. } => ERROR_UNROUTABLE,
            OutboundError::Socks5(_) => ERROR_PROTOCOL,
            OutboundError::Config(_) | OutboundError::Acl(_) => ERROR_CONFIG,
        }
    }
}
