//! # hyroute
//!
//! ACL-driven egress routing for proxy servers.
//!
//! ## Crates
//!
//! - [`hyroute_core`] - Shared defaults and error labels
//! - [`hyroute_acl`] - Rule compiler and cached matching engine
//! - [`hyroute_dns`] - Resolver for system, UDP, TCP, TLS and HTTPS upstreams
//! - [`hyroute_outbound`] - Outbound chain: resolver stage, ACL stage, direct, SOCKS5, reject

pub mod logging;

use serde::{Deserialize, Serialize};

pub use hyroute_acl as acl;
pub use hyroute_core as core;
pub use hyroute_dns as dns;
pub use hyroute_outbound as outbound;

pub use logging::{LoggingConfig, init_tracing};

/// Top-level configuration: logging plus the egress sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(flatten)]
    pub egress: hyroute_outbound::EgressConfig,
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{Config, LoggingConfig, init_tracing};
    pub use hyroute_acl::{CompiledRuleSet, HostInfo, Protocol, RawRule, RulesError, compile};
    pub use hyroute_outbound::{Addr, EgressConfig, Outbound, OutboundError, build_outbound};
}
