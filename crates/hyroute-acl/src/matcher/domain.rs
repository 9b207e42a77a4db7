//! Domain name matcher.
//!
//! Patterns without `*` require exact equality. Patterns with `*` are
//! anchored globs where `*` matches any run of characters, dots included:
//!
//! | pattern | matches | does not match |
//! |---|---|---|
//! | `*.example.com` | `a.example.com`, `a.b.example.com` | `example.com` |
//! | `*example.com` | `example.com`, `notexample.com` | `example.org` |
//! | `api.*.com` | `api.x.com`, `api.x.y.com` | `api.com` |

/// Matcher for a single exact or wildcard domain pattern.
#[derive(Debug, Clone)]
pub struct DomainMatcher {
    pattern: String,
    wildcard: bool,
}

impl DomainMatcher {
    /// Build a matcher. The pattern is lower-cased.
    pub fn new(pattern: &str) -> Self {
        let pattern = pattern.to_lowercase();
        let wildcard = pattern.contains('*');
        Self { pattern, wildcard }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// Check a lower-case domain name against the pattern.
    pub fn matches(&self, name: &str) -> bool {
        if self.wildcard {
            glob_match(self.pattern.as_bytes(), name.as_bytes())
        } else {
            name == self.pattern
        }
    }
}

/// Anchored glob match where `*` spans any run of bytes.
///
/// Byte-wise comparison is safe on UTF-8: literal pattern segments can only
/// line up with the text on character boundaries.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Position after the last `*` seen, and the text index it is retried from.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                p += 1;
                backtrack = Some((p, t));
            }
            Some(&c) if c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star_p, star_t)) => {
                    p = star_p;
                    t = star_t + 1;
                    backtrack = Some((star_p, t));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        let m = DomainMatcher::new("api.example.com");
        assert!(!m.is_wildcard());
        assert!(m.matches("api.example.com"));
        assert!(!m.matches("example.com"));
        assert!(!m.matches("other.api.example.com"));
        assert!(!m.matches(""));
    }

    #[test]
    fn pattern_is_lowercased() {
        let m = DomainMatcher::new("API.Example.COM");
        assert_eq!(m.pattern(), "api.example.com");
        assert!(m.matches("api.example.com"));
    }

    #[test]
    fn leading_wildcard_is_multi_level() {
        let m = DomainMatcher::new("*.example.com");
        assert!(m.is_wildcard());
        assert!(m.matches("a.example.com"));
        assert!(m.matches("a.b.example.com"));
        assert!(m.matches(".example.com"));
    }

    #[test]
    fn leading_wildcard_excludes_bare_parent() {
        let m = DomainMatcher::new("*.example.com");
        assert!(!m.matches("example.com"));
        assert!(!m.matches("notexample.com"));
        assert!(!m.matches("a.example.com.evil"));
    }

    #[test]
    fn wildcard_without_dot_matches_parent_and_lookalikes() {
        let m = DomainMatcher::new("*example.com");
        assert!(m.matches("example.com"));
        assert!(m.matches("www.example.com"));
        assert!(m.matches("notexample.com"));
        assert!(!m.matches("example.org"));
    }

    #[test]
    fn inner_and_trailing_wildcards() {
        let m = DomainMatcher::new("api.*.com");
        assert!(m.matches("api.x.com"));
        assert!(m.matches("api.x.y.com"));
        assert!(!m.matches("api.com"));

        let m = DomainMatcher::new("example.*");
        assert!(m.matches("example.org"));
        assert!(m.matches("example.co.uk"));
        assert!(!m.matches("www.example.org"));
    }

    #[test]
    fn multiple_wildcards_backtrack() {
        let m = DomainMatcher::new("*a*b*c");
        assert!(m.matches("abc"));
        assert!(m.matches("xxaxxbxxc"));
        assert!(m.matches("aabbcc"));
        assert!(!m.matches("acb"));
        assert!(!m.matches("abcx"));
    }

    #[test]
    fn empty_name_only_matches_star_only_pattern() {
        assert!(!DomainMatcher::new("*.example.com").matches(""));
        assert!(DomainMatcher::new("**").matches(""));
    }

    #[test]
    fn unicode_names() {
        let m = DomainMatcher::new("*.例子.测试");
        assert!(m.matches("www.例子.测试"));
        assert!(!m.matches("例子.测试"));
    }
}
