//! Rule compiler: raw rule records to an immutable rule set.

use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;

use ipnet::IpNet;
use tracing::debug;

use crate::engine::{CompiledRule, CompiledRuleSet};
use crate::error::RulesError;
use crate::geoip_db::CountryLookup;
use crate::matcher::{CidrMatcher, DomainMatcher, GeoipMatcher, HostMatcher, IpMatcher};
use crate::rule::{Protocol, RawRule};

const GEOIP_PREFIX: &str = "geoip:";

/// Compile raw rules against an outbound table.
///
/// `outbounds` must be keyed by lower-case name. `geoip` is invoked lazily,
/// at most once, and only when a `geoip:` rule is present. The first invalid
/// rule aborts compilation.
pub fn compile<O, F>(
    rules: &[RawRule],
    outbounds: &HashMap<String, O>,
    cache_size: usize,
    mut geoip: F,
) -> Result<CompiledRuleSet<O>, RulesError>
where
    O: Clone,
    F: FnMut() -> Result<Arc<dyn CountryLookup>, RulesError>,
{
    let capacity = NonZeroUsize::new(cache_size).ok_or(RulesError::InvalidCacheSize(cache_size))?;

    let mut geoip_db: Option<Arc<dyn CountryLookup>> = None;
    let mut compiled = Vec::with_capacity(rules.len());

    for rule in rules {
        let outbound = outbounds
            .get(&rule.outbound.to_lowercase())
            .cloned()
            .ok_or_else(|| {
                RulesError::at_line(rule.line, format!("outbound {} not found", rule.outbound))
            })?;

        let matcher = compile_host_matcher(&rule.address, &mut geoip_db, &mut geoip)
            .map_err(|message| RulesError::at_line(rule.line, message))?;

        let (protocol, port) = parse_proto_port(&rule.proto_port).ok_or_else(|| {
            RulesError::at_line(
                rule.line,
                format!("invalid protocol/port: {}", rule.proto_port),
            )
        })?;

        let hijack = match rule.hijack.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<IpAddr>().map_err(|_| {
                RulesError::at_line(
                    rule.line,
                    format!("invalid hijack address (must be an IP address): {raw}"),
                )
            })?),
        };

        compiled.push(CompiledRule {
            outbound,
            matcher,
            protocol,
            port,
            hijack,
        });
    }

    debug!(
        rules = compiled.len(),
        ip_rules = compiled.iter().filter(|r| r.matcher.needs_ip()).count(),
        cache_size,
        geoip = geoip_db.is_some(),
        "compiled ACL rules"
    );

    Ok(CompiledRuleSet::new(compiled, capacity))
}

/// Build the matcher for one address pattern.
///
/// Dispatch order: match-all, `geoip:`, CIDR (contains `/`), IP literal,
/// wildcard domain, exact domain.
fn compile_host_matcher<F>(
    address: &str,
    geoip_db: &mut Option<Arc<dyn CountryLookup>>,
    geoip: &mut F,
) -> Result<HostMatcher, String>
where
    F: FnMut() -> Result<Arc<dyn CountryLookup>, RulesError>,
{
    let address = address.to_lowercase();

    if address == "*" || address == "all" {
        return Ok(HostMatcher::All);
    }

    if let Some(code) = address.strip_prefix(GEOIP_PREFIX) {
        let code = code.to_ascii_uppercase();
        if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(format!("invalid country code: {code}"));
        }
        let db = match geoip_db {
            Some(db) => Arc::clone(db),
            None => {
                let db = geoip().map_err(|e| match e {
                    RulesError::GeoIp(msg) => format!("failed to load GeoIP database: {msg}"),
                    other => format!("failed to load GeoIP database: {other}"),
                })?;
                *geoip_db = Some(Arc::clone(&db));
                db
            }
        };
        return Ok(HostMatcher::GeoIp(GeoipMatcher::new(db, &code)));
    }

    if address.contains('/') {
        let net: IpNet = address
            .parse()
            .map_err(|_| format!("invalid CIDR address: {address}"))?;
        return Ok(HostMatcher::Cidr(CidrMatcher::new(net)));
    }

    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(HostMatcher::Ip(IpMatcher::new(ip)));
    }

    Ok(HostMatcher::Domain(DomainMatcher::new(&address)))
}

/// Parse a protocol/port filter. Port `0` means any port.
///
/// Accepted forms (case-insensitive): `""`, `*`, `*/*`, `tcp`, `udp`, and
/// `<tcp|udp|*>/<port|*>`.
pub fn parse_proto_port(spec: &str) -> Option<(Protocol, u16)> {
    let spec = spec.to_ascii_lowercase();
    match spec.as_str() {
        "" | "*" | "*/*" => return Some((Protocol::Both, 0)),
        "tcp" => return Some((Protocol::Tcp, 0)),
        "udp" => return Some((Protocol::Udp, 0)),
        _ => {}
    }

    let (proto, port) = spec.split_once('/')?;
    let protocol = match proto {
        "tcp" => Protocol::Tcp,
        "udp" => Protocol::Udp,
        "*" => Protocol::Both,
        _ => return None,
    };
    let port = match port {
        "*" => 0,
        digits if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            digits.parse::<u16>().ok()?
        }
        _ => return None,
    };
    Some((protocol, port))
}
