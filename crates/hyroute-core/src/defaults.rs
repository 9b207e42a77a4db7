//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// ACL Defaults
// ============================================================================

/// Default number of cached ACL match results.
pub const DEFAULT_ACL_CACHE_SIZE: usize = 1024;
/// GeoIP database file used when only a download URL is configured.
pub const DEFAULT_GEOIP_FILENAME: &str = "GeoLite2-Country.mmdb";

// ============================================================================
// Resolver Defaults
// ============================================================================

/// Default DNS query timeout in seconds.
pub const DEFAULT_DNS_TIMEOUT_SECS: u64 = 5;
/// Default DNS cache capacity (0 disables caching).
pub const DEFAULT_DNS_CACHE_SIZE: usize = 256;
/// Default port for plain UDP/TCP resolvers.
pub const DEFAULT_DNS_PORT: u16 = 53;
/// Default port for DNS-over-TLS resolvers.
pub const DEFAULT_DOT_PORT: u16 = 853;
/// Default port for DNS-over-HTTPS resolvers.
pub const DEFAULT_DOH_PORT: u16 = 443;
/// Default DNS-over-HTTPS query path.
pub const DEFAULT_DOH_PATH: &str = "/dns-query";

// ============================================================================
// Outbound Defaults
// ============================================================================

/// Default dial timeout for direct and SOCKS5 outbounds in seconds.
pub const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 10;
/// Default direct outbound mode.
pub const DEFAULT_DIRECT_MODE: &str = "auto";
/// Name of the outbound used when none is configured.
pub const DEFAULT_OUTBOUND_NAME: &str = "default";
/// Default TCP_NODELAY on dialed connections.
pub const DEFAULT_TCP_NO_DELAY: bool = true;
