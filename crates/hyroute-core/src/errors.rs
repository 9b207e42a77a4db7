//! Error type constants for metrics and logging.
//!
//! These constants provide consistent error classification across all crates.

/// I/O error while dialing or relaying.
pub const ERROR_IO: &str = "io";
/// DNS/address resolution error.
pub const ERROR_RESOLVE: &str = "resolve";
/// Dial or handshake timeout.
pub const ERROR_TIMEOUT: &str = "timeout";
/// Request rejected by a reject outbound.
pub const ERROR_REJECTED: &str = "rejected";
/// No ACL rule selected an outbound.
pub const ERROR_UNROUTABLE: &str = "unroutable";
/// Upstream proxy protocol violation.
pub const ERROR_PROTOCOL: &str = "protocol";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
