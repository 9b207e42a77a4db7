//! Ordered ACL routing rules for egress selection.
//!
//! Rules are compiled once from [`RawRule`] records into an immutable
//! [`CompiledRuleSet`] and then evaluated concurrently, first match wins,
//! behind a bounded LRU cache.
//!
//! # Architecture
//!
//! - **Matchers**: [`HostMatcher`] variants for match-all, exact/wildcard
//!   domains, CIDR ranges, literal IPs and GeoIP countries
//! - **Compiler**: [`compile`] validates rules against an outbound table and
//!   reports the first failure with its line number
//! - **Engine**: [`CompiledRuleSet::match_host`] scans rules in order and
//!   memoizes every result, including "no match"
//! - **GeoIP**: [`CountryLookup`] abstraction, with a MaxMind-backed
//!   `GeoipDb` and a load-once `GeoipLoader` behind the `geoip` feature;
//!   the `download` feature lets the loader fetch a missing database
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use hyroute_acl::{compile, HostInfo, Protocol, RawRule, RulesError};
//!
//! let rules = vec![
//!     RawRule::new(1, "reject", "*.ads.example.com"),
//!     RawRule::new(2, "reject", "all").with_proto_port("udp/443"),
//!     RawRule::new(3, "direct", "all"),
//! ];
//! let mut outbounds = HashMap::new();
//! outbounds.insert("reject".to_string(), "REJECT");
//! outbounds.insert("direct".to_string(), "DIRECT");
//!
//! let rule_set = compile(&rules, &outbounds, 1024, || {
//!     Err(RulesError::GeoIp("not needed".into()))
//! })
//! .unwrap();
//!
//! let host = HostInfo::from_name("tracker.ads.example.com");
//! let decision = rule_set.match_host(&host, Protocol::Tcp, 443).unwrap();
//! assert_eq!(decision.outbound, "REJECT");
//!
//! let host = HostInfo::from_name("example.com");
//! assert_eq!(rule_set.match_host(&host, Protocol::Udp, 443).unwrap().outbound, "REJECT");
//! assert_eq!(rule_set.match_host(&host, Protocol::Tcp, 443).unwrap().outbound, "DIRECT");
//! ```

pub mod compile;
pub mod engine;
pub mod error;
pub mod geoip_db;
pub mod matcher;
pub mod rule;

pub use compile::{compile, parse_proto_port};
pub use engine::{CompiledRule, CompiledRuleSet};
pub use error::RulesError;
pub use geoip_db::CountryLookup;
#[cfg(feature = "geoip")]
pub use geoip_db::{GeoipDb, GeoipLoader, GeoipSource, MaxmindSource};
pub use matcher::HostMatcher;
pub use rule::{HostInfo, Protocol, RawRule, RouteMatch};
