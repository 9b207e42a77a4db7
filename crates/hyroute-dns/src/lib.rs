//! Async DNS resolver for hyroute.
//!
//! Provides a shared, caching resolver backed by
//! [`hickory-resolver`](https://crates.io/crates/hickory-resolver). One
//! upstream is configured per resolver: the system configuration, a plain
//! UDP or TCP server, DNS-over-TLS, or DNS-over-HTTPS.
//!
//! # Usage
//!
//! ```rust,no_run
//! use hyroute_dns::{DnsConfig, DnsResolver, DnsStrategy};
//!
//! # async fn example() -> Result<(), hyroute_dns::DnsError> {
//! let config = DnsConfig {
//!     strategy: DnsStrategy::Tls,
//!     addr: Some("1.1.1.1".into()),
//!     sni: Some("one.one.one.one".into()),
//!     ..DnsConfig::default()
//! };
//! let resolver = DnsResolver::new(&config)?;
//!
//! let ips = resolver.lookup("example.com").await?;
//! println!("v4={:?} v6={:?}", ips.ipv4, ips.ipv6);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod resolver;
pub mod tls;

pub use config::{DnsConfig, DnsStrategy};
pub use error::DnsError;
pub use resolver::{DnsResolver, ResolvedIps, split_host_port};
