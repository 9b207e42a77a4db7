//! Matching engine: ordered first-match evaluation behind an LRU cache.

use std::net::IpAddr;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::matcher::HostMatcher;
use crate::rule::{HostInfo, Protocol, RouteMatch};

/// One compiled rule.
#[derive(Debug)]
pub struct CompiledRule<O> {
    pub outbound: O,
    pub matcher: HostMatcher,
    pub protocol: Protocol,
    /// Destination port, `0` for any.
    pub port: u16,
    pub hijack: Option<IpAddr>,
}

impl<O> CompiledRule<O> {
    /// Whether this rule applies to a normalized host, protocol and port.
    pub fn matches(&self, host: &HostInfo, protocol: Protocol, port: u16) -> bool {
        self.protocol.accepts(protocol)
            && (self.port == 0 || self.port == port)
            && self.matcher.matches(host)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    host: HostInfo,
    protocol: Protocol,
    port: u16,
}

/// Immutable ordered rule list plus a bounded result cache.
pub struct CompiledRuleSet<O> {
    rules: Vec<CompiledRule<O>>,
    cache: Mutex<LruCache<CacheKey, Option<RouteMatch<O>>>>,
}

impl<O: Clone> CompiledRuleSet<O> {
    pub(crate) fn new(rules: Vec<CompiledRule<O>>, cache_size: NonZeroUsize) -> Self {
        Self {
            rules,
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Find the first rule matching the request.
    ///
    /// The host name is lower-cased before matching. Results, including
    /// `None`, are cached per (host, protocol, port).
    pub fn match_host(&self, host: &HostInfo, protocol: Protocol, port: u16) -> Option<RouteMatch<O>> {
        let key = CacheKey {
            host: host.normalized(),
            protocol,
            port,
        };

        if let Some(cached) = self.cache.lock().get(&key) {
            return cached.clone();
        }

        // Evaluated without the lock; a concurrent miss on the same key may
        // compute the same result twice.
        let result = self
            .rules
            .iter()
            .find(|rule| rule.matches(&key.host, protocol, port))
            .map(|rule| RouteMatch {
                outbound: rule.outbound.clone(),
                hijack: rule.hijack,
            });

        self.cache.lock().put(key, result.clone());
        result
    }

    pub fn rules(&self) -> &[CompiledRule<O>] {
        &self.rules
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }
}

impl<O> std::fmt::Debug for CompiledRuleSet<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.lock();
        f.debug_struct("CompiledRuleSet")
            .field("rules", &self.rules.len())
            .field("cached", &cache.len())
            .field("cache_capacity", &cache.cap())
            .finish()
    }
}
