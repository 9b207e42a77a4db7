//! DNS resolver errors.

/// Errors from DNS resolution.
#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    /// DNS lookup returned no usable address.
    #[error("dns lookup returned no results for {0}")]
    NoResults(String),

    /// DNS lookup failed.
    #[error("dns lookup failed: {0}")]
    Lookup(#[from] hickory_resolver::ResolveError),

    /// Invalid address format (missing port, bad IP, etc.).
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid resolver server configuration.
    #[error("invalid dns server: {0}")]
    InvalidServer(String),
}
