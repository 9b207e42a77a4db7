//! GeoIP country matcher.

use std::sync::Arc;

use crate::geoip_db::CountryLookup;
use crate::rule::HostInfo;

/// Matches hosts whose resolved address belongs to one country.
///
/// A host without any address never matches; domain-only requests must go
/// through a resolver stage first.
pub struct GeoipMatcher {
    db: Arc<dyn CountryLookup>,
    country: String,
}

impl GeoipMatcher {
    /// `country` is an ISO 3166 alpha-2 code; it is stored upper-case.
    pub fn new(db: Arc<dyn CountryLookup>, country: &str) -> Self {
        Self {
            db,
            country: country.to_ascii_uppercase(),
        }
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn matches(&self, host: &HostInfo) -> bool {
        host.ips().any(|ip| {
            self.db
                .country_code(ip)
                .is_some_and(|code| code.eq_ignore_ascii_case(&self.country))
        })
    }
}

impl std::fmt::Debug for GeoipMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoipMatcher")
            .field("country", &self.country)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    #[derive(Debug)]
    struct FixedDb;

    impl CountryLookup for FixedDb {
        fn country_code(&self, ip: IpAddr) -> Option<String> {
            match ip {
                IpAddr::V4(v4) if v4.octets()[0] == 1 => Some("CN".into()),
                IpAddr::V6(v6) if v6.segments()[0] == 0x2400 => Some("cn".into()),
                IpAddr::V4(_) => Some("US".into()),
                IpAddr::V6(_) => None,
            }
        }
    }

    fn matcher(code: &str) -> GeoipMatcher {
        GeoipMatcher::new(Arc::new(FixedDb), code)
    }

    #[test]
    fn code_stored_uppercase() {
        assert_eq!(matcher("cn").country(), "CN");
    }

    #[test]
    fn matches_ipv4_country() {
        let m = matcher("cn");
        assert!(m.matches(&HostInfo::from_ip(IpAddr::V4(Ipv4Addr::new(1, 0, 0, 1)))));
        assert!(!m.matches(&HostInfo::from_ip(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)))));
    }

    #[test]
    fn matches_ipv6_country_case_insensitive() {
        let m = matcher("CN");
        let host = HostInfo::new("", None, Some(Ipv6Addr::new(0x2400, 0, 0, 0, 0, 0, 0, 1)));
        assert!(m.matches(&host));
    }

    #[test]
    fn either_address_may_match() {
        let m = matcher("cn");
        let host = HostInfo::new(
            "example.cn",
            Some(Ipv4Addr::new(8, 8, 8, 8)),
            Some(Ipv6Addr::new(0x2400, 0, 0, 0, 0, 0, 0, 1)),
        );
        assert!(m.matches(&host));
    }

    #[test]
    fn domain_only_never_matches() {
        assert!(!matcher("cn").matches(&HostInfo::from_name("example.cn")));
    }

    #[test]
    fn unknown_address_does_not_match() {
        let host = HostInfo::from_ip(IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert!(!matcher("us").matches(&host));
    }
}
