//! URL pattern lists for redirect URI and request_uri policy.
//!
//! A pattern is `[scheme://]host[:port][/path]`:
//! - an absent or `*` scheme matches any scheme,
//! - host `*` matches any host and a `*.` prefix matches the remainder and
//!   every subdomain of it,
//! - an absent port or `*` matches any port,
//! - an absent path or `/*` matches any path; elsewhere `*` in a path
//!   matches any sequence.
//!
//! Hosts and schemes compare case-insensitively. URLs without a host never
//! match.

use regex::Regex;
use url::Url;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct UrlPattern {
    source: String,
    scheme: Option<Regex>,
    host: Option<Regex>,
    port: Option<u16>,
    path: Option<Regex>,
}

impl UrlPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let pattern = pattern.trim();
        let invalid = |why: &str| Error::Config(format!("invalid URL pattern \"{pattern}\": {why}"));

        if pattern == "*" {
            return Ok(Self {
                source: pattern.to_string(),
                scheme: None,
                host: None,
                port: None,
                path: None,
            });
        }

        let (scheme, rest) = match pattern.split_once("://") {
            Some((scheme, rest)) => (Some(scheme), rest),
            None => (None, pattern),
        };
        if let Some(scheme) = scheme {
            if scheme != "*" && !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
                return Err(invalid("bad scheme"));
            }
        }

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], Some(&rest[i..])),
            None => (rest, None),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let wildcard_ok = host == "*" || !host.trim_start_matches("*.").contains('*');
        if !wildcard_ok {
            return Err(invalid("'*' is only allowed as the whole host or a leading '*.'"));
        }

        let scheme = match scheme {
            None | Some("*") => None,
            Some(s) => Some(compile(&format!("(?i)^{}$", regex::escape(s)), pattern)?),
        };
        let host = if host == "*" {
            None
        } else if let Some(domain) = host.strip_prefix("*.") {
            Some(compile(&format!("(?i)^([a-z0-9.-]*\\.)?{}$", regex::escape(domain)), pattern)?)
        } else {
            Some(compile(&format!("(?i)^{}$", regex::escape(host)), pattern)?)
        };
        let port = match port {
            None | Some("*") => None,
            Some(p) => Some(p.parse::<u16>().map_err(|_| invalid("bad port"))?),
        };
        let path = match path {
            None | Some("/*") => None,
            Some(p) => {
                let body = p.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
                Some(compile(&format!("^{body}$"), pattern)?)
            }
        };

        Ok(Self {
            source: pattern.to_string(),
            scheme,
            host,
            port,
            path,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        self.scheme.as_ref().is_none_or(|re| re.is_match(url.scheme()))
            && self.host.as_ref().is_none_or(|re| re.is_match(host))
            && self.port.is_none_or(|p| url.port_or_known_default() == Some(p))
            && self.path.as_ref().is_none_or(|re| re.is_match(url.path()))
    }
}

fn compile(regex: &str, pattern: &str) -> Result<Regex> {
    Regex::new(regex)
        .map_err(|e| Error::Config(format!("invalid URL pattern \"{pattern}\": {e}")))
}

/// Ordered list of patterns; a URL is listed when any pattern matches.
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    patterns: Vec<UrlPattern>,
}

impl PatternList {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| UrlPattern::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `uri` parses and matches any pattern.
    pub fn is_listed(&self, uri: &str) -> bool {
        match Url::parse(uri) {
            Ok(url) => self.patterns.iter().any(|p| p.matches(&url)),
            Err(_) => false,
        }
    }
}

/// Allow and deny lists applied to client redirect URIs. An empty allow list
/// admits everything; an empty deny list rejects nothing.
#[derive(Debug, Clone, Default)]
pub struct RedirectPolicy {
    white_list: PatternList,
    black_list: PatternList,
}

impl RedirectPolicy {
    pub fn new<S: AsRef<str>>(white_list: &[S], black_list: &[S]) -> Result<Self> {
        Ok(Self {
            white_list: PatternList::new(white_list)?,
            black_list: PatternList::new(black_list)?,
        })
    }

    pub fn permits(&self, uri: &str) -> bool {
        let allowed = self.white_list.is_empty() || self.white_list.is_listed(uri);
        allowed && !self.black_list.is_listed(uri)
    }

    /// Every URI must pass; one failure rejects the whole set.
    pub fn permits_all<S: AsRef<str>>(&self, uris: &[S]) -> bool {
        uris.iter().all(|uri| {
            let ok = self.permits(uri.as_ref());
            if !ok {
                tracing::debug!(uri = uri.as_ref(), "redirect URI rejected by policy");
            }
            ok
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, url: &str) -> bool {
        UrlPattern::parse(pattern).unwrap().matches(&Url::parse(url).unwrap())
    }

    #[test]
    fn subdomain_wildcard() {
        assert!(matches("*.example.com", "https://example.com/cb"));
        assert!(matches("*.example.com", "https://app.example.com/cb"));
        assert!(matches("*.example.com", "http://a.b.example.com:8080/x"));
        assert!(!matches("*.example.com", "https://example.com.evil.org/cb"));
        assert!(!matches("*.example.com", "https://notexample.com/cb"));
    }

    #[test]
    fn host_without_prefix_is_exact() {
        assert!(matches("example.com", "https://EXAMPLE.com/"));
        assert!(!matches("example.com", "https://app.example.com/"));
    }

    #[test]
    fn scheme_restriction() {
        assert!(matches("https://example.com", "https://example.com/cb"));
        assert!(!matches("https://example.com", "http://example.com/cb"));
        assert!(matches("*://example.com", "myapp://example.com/cb"));
    }

    #[test]
    fn port_and_path() {
        assert!(matches("example.com:8443", "https://example.com:8443/"));
        assert!(!matches("example.com:8443", "https://example.com/"));
        assert!(matches("example.com:443", "https://example.com/"));
        assert!(matches("example.com/cb/*", "https://example.com/cb/one"));
        assert!(!matches("example.com/cb/*", "https://example.com/other"));
        assert!(matches("example.com/*", "https://example.com/anything/at/all"));
        assert!(matches("example.com/a*z", "https://example.com/abcz"));
    }

    #[test]
    fn star_matches_any_url_with_host() {
        assert!(matches("*", "https://anything.org/x"));
        assert!(matches("*", "custom://host"));
        assert!(!matches("*", "urn:ietf:wg:oauth:2.0:oob"));
    }

    #[test]
    fn wildcard_host_with_path_glob() {
        assert!(matches("*.gluu.org/foo*bar", "https://mail.gluu.org/foo/bar"));
        assert!(matches("*.gluu.org/foo*bar", "https://mail.gluu.org/foobar"));
        assert!(!matches("*.gluu.org/foo*bar", "https://gluu.org"));
        assert!(!matches("*.gluu.org/foo*bar", "https://mail.gluu.org/foo/baz"));

        assert!(matches("*.attacker.com/*", "http://attacker.com"));
        assert!(matches("*.attacker.com/*", "https://www.attacker.com/"));
        assert!(matches("*.attacker.com/*", "https://www.attacker.com/steal/code?x=1"));
        assert!(!matches("*.attacker.com/*", "https://attacker.com.example.org/"));
    }

    #[test]
    fn deny_list_blocks_attacker_subdomains() {
        let policy = RedirectPolicy::new(&[], &["*.attacker.com/*"]).unwrap();
        assert!(!policy.permits("http://attacker.com"));
        assert!(!policy.permits("https://www.attacker.com/cb"));
        assert!(policy.permits("https://mail.gluu.org/foo/bar"));

        let policy = RedirectPolicy::new(&["*.gluu.org/foo*bar"], &[]).unwrap();
        assert!(policy.permits("https://mail.gluu.org/foo/bar"));
        assert!(!policy.permits("https://gluu.org"));
    }

    #[test]
    fn url_without_host_never_matches() {
        assert!(!matches("*.example.com", "mailto:user@example.com"));
    }

    #[test]
    fn invalid_patterns_rejected() {
        assert!(UrlPattern::parse("exa*mple.com").is_err());
        assert!(UrlPattern::parse("https://").is_err());
        assert!(UrlPattern::parse("example.com:port").is_err());
    }

    #[test]
    fn policy_white_and_black_lists() {
        let policy = RedirectPolicy::new(&["*.example.com"], &["evil.example.com"]).unwrap();
        assert!(policy.permits("https://app.example.com/cb"));
        assert!(!policy.permits("https://evil.example.com/cb"));
        assert!(!policy.permits("https://elsewhere.org/cb"));
        assert!(!policy.permits("not a url"));
        assert!(policy.permits_all(&["https://a.example.com/cb", "https://b.example.com/cb"]));
        assert!(!policy.permits_all(&["https://a.example.com/cb", "https://elsewhere.org/cb"]));
    }

    #[test]
    fn empty_lists_do_not_restrict() {
        let policy = RedirectPolicy::default();
        assert!(policy.permits("https://anything.org/cb"));
        let deny_only = RedirectPolicy::new(&[], &["*.internal"]).unwrap();
        assert!(deny_only.permits("https://public.org/cb"));
        assert!(!deny_only.permits("https://db.internal/cb"));
    }
}
