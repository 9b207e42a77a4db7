//! Builds the outbound chain from an [`EgressConfig`].
//!
//! Stages nest bottom-up: terminal outbounds, then the ACL stage over
//! them, then the resolver stage in front.

use std::collections::HashMap;
use std::sync::Arc;

use hyroute_acl::{CountryLookup, RulesError, compile};
use hyroute_core::DEFAULT_OUTBOUND_NAME;
use hyroute_dns::{DnsConfig, DnsResolver};
use tracing::info;

use crate::acl::AclOutbound;
use crate::config::{AclConfig, EgressConfig, OutboundConfig};
use crate::direct::DirectOutbound;
use crate::error::OutboundError;
use crate::reject::RejectOutbound;
use crate::resolver::ResolverOutbound;
use crate::socks5::Socks5Outbound;
use crate::traits::{NamedOutbound, Outbound};

/// Build one terminal outbound from its config entry.
pub fn build_terminal(cfg: &OutboundConfig) -> Result<Arc<dyn Outbound>, OutboundError> {
    if cfg.name.trim().is_empty() {
        return Err(OutboundError::Config("outbound name cannot be empty".into()));
    }
    let outbound: Arc<dyn Outbound> = match cfg.outbound_type.to_ascii_lowercase().as_str() {
        "direct" => Arc::new(DirectOutbound::from_config(cfg)?),
        "socks5" => Arc::new(Socks5Outbound::from_config(cfg)?),
        "reject" => Arc::new(RejectOutbound),
        other => {
            return Err(OutboundError::Config(format!(
                "outbound '{}': unsupported type '{other}'",
                cfg.name
            )));
        }
    };
    Ok(outbound)
}

/// Build the complete chain.
///
/// - No outbounds configured: a single direct outbound named `default`.
/// - With ACL rules: an ACL stage over every configured outbound plus the
///   built-ins `direct`, `reject` and `default` (the first outbound),
///   unless a configured outbound already uses the name.
/// - Without ACL rules: the first outbound is used as is.
/// - A non-system resolver is always placed in front. The system resolver
///   is only added when there is an ACL to feed.
pub fn build_outbound(config: &EgressConfig) -> Result<Arc<dyn Outbound>, OutboundError> {
    let mut named = Vec::with_capacity(config.outbounds.len().max(1));
    for cfg in &config.outbounds {
        named.push(NamedOutbound::new(cfg.name.clone(), build_terminal(cfg)?));
    }
    if named.is_empty() {
        named.push(NamedOutbound::new(
            DEFAULT_OUTBOUND_NAME,
            Arc::new(DirectOutbound::default()),
        ));
    }

    let acl = config.acl.as_ref().filter(|acl| !acl.rules.is_empty());
    let mut outbound: Arc<dyn Outbound> = match acl {
        Some(acl_cfg) => Arc::new(build_acl(acl_cfg, &named)?),
        None => {
            info!(outbound = %named[0], "no ACL configured, using first outbound");
            named[0].outbound.clone()
        }
    };

    let resolver_cfg = config.resolver.clone().unwrap_or_default();
    if !resolver_cfg.is_system() || acl.is_some() {
        outbound = Arc::new(wrap_resolver(&resolver_cfg, outbound)?);
    }
    Ok(outbound)
}

fn wrap_resolver(
    cfg: &DnsConfig,
    inner: Arc<dyn Outbound>,
) -> Result<ResolverOutbound, OutboundError> {
    let resolver = DnsResolver::new(cfg)?;
    info!(strategy = %cfg.strategy, addr = ?cfg.addr, "resolver stage enabled");
    Ok(ResolverOutbound::new(resolver, inner))
}

fn build_acl(cfg: &AclConfig, named: &[Arc<NamedOutbound>]) -> Result<AclOutbound, OutboundError> {
    let mut table: HashMap<String, Arc<NamedOutbound>> = named
        .iter()
        .map(|ob| (ob.name.to_ascii_lowercase(), ob.clone()))
        .collect();
    table
        .entry("direct".into())
        .or_insert_with(|| NamedOutbound::new("direct", Arc::new(DirectOutbound::default())));
    table
        .entry("reject".into())
        .or_insert_with(|| NamedOutbound::new("reject", Arc::new(RejectOutbound)));
    table
        .entry(DEFAULT_OUTBOUND_NAME.into())
        .or_insert_with(|| named[0].clone());

    let geoip = geoip_accessor(cfg.geoip.as_deref(), cfg.geoip_url.as_deref());
    let rules = compile(&cfg.raw_rules(), &table, cfg.cache_size, geoip)?;
    info!(
        rules = rules.rule_count(),
        outbounds = table.len(),
        cache_size = cfg.cache_size,
        "ACL stage enabled"
    );
    Ok(AclOutbound::new(rules))
}

/// Database accessor handed to the compiler. Nothing is opened or
/// downloaded unless a GeoIP rule asks for it.
///
/// With only a URL configured, the database is cached under
/// [`hyroute_core::DEFAULT_GEOIP_FILENAME`] in the working directory.
#[cfg(feature = "geoip")]
fn geoip_accessor(
    path: Option<&str>,
    url: Option<&str>,
) -> impl FnMut() -> Result<Arc<dyn CountryLookup>, RulesError> {
    let path = path.filter(|p| !p.is_empty());
    let url = url.filter(|u| !u.is_empty());
    let loader = match (path, url) {
        (None, None) => None,
        (path, url) => {
            let loader = hyroute_acl::GeoipLoader::new(
                path.unwrap_or(hyroute_core::DEFAULT_GEOIP_FILENAME),
            );
            Some(match url {
                Some(url) => loader.with_download_url(url),
                None => loader,
            })
        }
    };
    move || match &loader {
        Some(loader) => loader.load(),
        None => Err(RulesError::GeoIp("no database path configured".into())),
    }
}

#[cfg(not(feature = "geoip"))]
fn geoip_accessor(
    _path: Option<&str>,
    _url: Option<&str>,
) -> impl FnMut() -> Result<Arc<dyn CountryLookup>, RulesError> {
    || Err(RulesError::GeoIp("built without GeoIP support".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESOLVER: &str = "resolver: { type: udp, addr: '127.0.0.1:53' }\n";

    /// Parse a config with an explicit resolver so tests never read the
    /// host's system resolver settings.
    fn config(yaml: &str) -> EgressConfig {
        serde_yaml::from_str(&format!("{RESOLVER}{yaml}")).unwrap()
    }

    #[test]
    fn terminal_types() {
        for yaml in [
            "{name: a, type: direct}",
            "{name: b, type: REJECT}",
            "{name: c, type: socks5, addr: '127.0.0.1:1080'}",
        ] {
            build_terminal(&serde_yaml::from_str(yaml).unwrap()).unwrap();
        }
    }

    #[test]
    fn empty_name_and_unknown_type_rejected() {
        let err = build_terminal(&serde_yaml::from_str("{name: '', type: direct}").unwrap()).unwrap_err();
        assert!(matches!(err, OutboundError::Config(_)));
        let err = build_terminal(&serde_yaml::from_str("{name: x, type: wireguard}").unwrap()).unwrap_err();
        assert!(err.to_string().contains("unsupported type 'wireguard'"));
    }

    #[test]
    fn builds_without_anything_configured() {
        build_outbound(&EgressConfig::default()).unwrap();
    }

    #[tokio::test]
    async fn explicit_resolver_wraps_plain_outbound() {
        build_outbound(&config("outbounds: [{ name: up, type: socks5, addr: '127.0.0.1:1080' }]")).unwrap();
    }

    #[tokio::test]
    async fn unknown_rule_outbound_reports_line() {
        let err = build_outbound(&config(
            r#"
acl:
  rules:
    - { outbound: direct, address: "a.example" }
    - { outbound: missing, address: "b.example" }
"#,
        ))
        .unwrap_err();
        match err {
            OutboundError::Acl(e) => {
                assert_eq!(e.line(), Some(2));
                assert!(e.to_string().contains("outbound missing not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn builtins_resolve_in_rules() {
        build_outbound(&config(
            r#"
acl:
  rules:
    - { outbound: Reject, address: "ads.example" }
    - { outbound: default, address: "all" }
    - { outbound: direct, address: "10.0.0.0/8" }
outbounds:
  - { name: main, type: direct }
"#,
        ))
        .unwrap();
    }

    #[tokio::test]
    async fn geoip_rule_without_database_fails_at_its_line() {
        let err = build_outbound(&config(
            r#"
acl:
  rules:
    - { outbound: direct, address: "all", proto_port: "udp/53" }
    - { outbound: reject, address: "geoip:cn" }
"#,
        ))
        .unwrap_err();
        match err {
            OutboundError::Acl(e) => assert_eq!(e.line(), Some(2)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_database_path_is_fine_without_geoip_rules() {
        build_outbound(&config(
            r#"
acl:
  geoip: /nonexistent/country.mmdb
  rules:
    - { outbound: direct, address: "all" }
"#,
        ))
        .unwrap();
    }

    #[cfg(feature = "download")]
    #[tokio::test]
    async fn unreachable_geoip_download_fails_at_its_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("country.mmdb");
        let err = build_outbound(&config(&format!(
            r#"
acl:
  geoip: '{}'
  geoip_url: 'http://127.0.0.1:1/country.mmdb'
  rules:
    - {{ outbound: reject, address: "geoip:cn" }}
"#,
            path.display()
        )))
        .unwrap_err();
        match err {
            OutboundError::Acl(e) => assert_eq!(e.line(), Some(1), "{e}"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn bad_resolver_config_fails() {
        let cfg: EgressConfig = serde_yaml::from_str("resolver: { type: tls }").unwrap();
        let err = build_outbound(&cfg).unwrap_err();
        assert!(matches!(err, OutboundError::Dns(_)));
    }
}
