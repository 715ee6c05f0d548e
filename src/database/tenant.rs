//! Tenant keys derived from the request host.

use std::fmt;

/// Registry lookup key.
///
/// Always non-empty, trimmed and ASCII-lowercased, so `A.Example.COM` and
/// `a.example.com` select the same database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantKey(String);

impl TenantKey {
    /// Normalize `raw` into a key. Returns `None` for blank input.
    pub fn new(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_lowercase();
        if key.is_empty() {
            None
        } else {
            Some(Self(key))
        }
    }

    /// Key for a `Host` header value or URI authority.
    pub fn from_host(host: &str) -> Option<Self> {
        Self::new(host)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key with a trailing `:port` removed, if there is one.
    ///
    /// Bracketed IPv6 literals keep their brackets: `[::1]:8000` becomes `[::1]`.
    /// A bare IPv6 address has no port to strip.
    pub fn without_port(&self) -> Option<TenantKey> {
        let key = self.0.as_str();

        if let Some(rest) = key.strip_prefix('[') {
            let close = rest.find(']')?;
            let port = rest[close + 1..].strip_prefix(':')?;
            return is_port(port).then(|| TenantKey(key[..close + 2].to_string()));
        }

        let (host, port) = key.rsplit_once(':')?;
        if host.is_empty() || host.contains(':') || !is_port(port) {
            return None;
        }
        Some(TenantKey(host.to_string()))
    }
}

fn is_port(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> TenantKey {
        TenantKey::new(s).unwrap()
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(key("  A.Example.COM ").as_str(), "a.example.com");
        assert!(TenantKey::new("").is_none());
        assert!(TenantKey::new("   ").is_none());
    }

    #[test]
    fn strips_port() {
        assert_eq!(key("a.example.com:8000").without_port(), Some(key("a.example.com")));
        assert_eq!(key("a.example.com").without_port(), None);
        assert_eq!(key("a.example.com:").without_port(), None);
        assert_eq!(key("a.example.com:http").without_port(), None);
        assert_eq!(key(":8000").without_port(), None);
    }

    #[test]
    fn ipv6_literals() {
        assert_eq!(key("[::1]:8000").without_port(), Some(key("[::1]")));
        assert_eq!(key("[::1]").without_port(), None);
        assert_eq!(key("fe80::1").without_port(), None);
    }
}
