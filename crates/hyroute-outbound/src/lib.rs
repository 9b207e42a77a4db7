//! Composable egress chain.
//!
//! Every stage implements [`Outbound`] and wraps the next one:
//!
//! ```text
//! ResolverOutbound -> AclOutbound -> { DirectOutbound | Socks5Outbound | RejectOutbound }
//! ```
//!
//! - [`ResolverOutbound`] fills [`Addr::resolve_info`] so IP and GeoIP rules
//!   can match domain requests
//! - [`AclOutbound`] selects a named outbound and applies hijack rewrites
//! - terminal outbounds dial the destination
//!
//! [`build_outbound`] assembles the chain from an [`EgressConfig`].
//!
//! # Example
//!
//! ```no_run
//! use hyroute_outbound::{Addr, EgressConfig, build_outbound};
//!
//! # async fn run(config: EgressConfig) -> Result<(), hyroute_outbound::OutboundError> {
//! let outbound = build_outbound(&config)?;
//! let mut addr = Addr::new("example.com", 443);
//! let _stream = outbound.tcp(&mut addr).await?;
//! # Ok(())
//! # }
//! ```

pub mod acl;
pub mod addr;
pub mod chain;
pub mod config;
pub mod direct;
pub mod error;
pub mod reject;
pub mod resolver;
pub mod socks5;
pub mod traits;

pub use acl::{AclOutbound, AclRules};
pub use addr::{Addr, ResolveInfo};
pub use chain::{build_outbound, build_terminal};
pub use config::{AclConfig, AclRuleConfig, EgressConfig, OutboundConfig};
pub use direct::{DirectMode, DirectOutbound};
pub use error::OutboundError;
pub use reject::RejectOutbound;
pub use resolver::ResolverOutbound;
pub use socks5::Socks5Outbound;
pub use traits::{NamedOutbound, Outbound, UdpConn};
