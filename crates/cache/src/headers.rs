//! HTTP headers and the caching policy derived from them

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Status codes a shared cache may store
pub const CACHEABLE_STATUS_CODES: [u16; 5] = [200, 203, 300, 301, 410];

/// Well-known header names
pub mod names {
    /// `Cache-Control`
    pub const CACHE_CONTROL: &str = "Cache-Control";
    /// `Cookie`
    pub const COOKIE: &str = "Cookie";
    /// `Date`
    pub const DATE: &str = "Date";
    /// `Expires`
    pub const EXPIRES: &str = "Expires";
    /// `Pragma`
    pub const PRAGMA: &str = "Pragma";
    /// `Set-Cookie`
    pub const SET_COOKIE: &str = "Set-Cookie";
    /// `Vary`
    pub const VARY: &str = "Vary";
    /// `Accept-Encoding`
    pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
}

/// Obsolete HTTP date layouts still accepted from origins, after whitespace
/// is collapsed
const LEGACY_DATE_FORMATS: [&str; 2] = [
    // RFC 850: Sunday, 06-Nov-94 08:49:37 GMT
    "%A, %d-%b-%y %H:%M:%S GMT",
    // asctime: Sun Nov  6 08:49:37 1994
    "%a %b %d %H:%M:%S %Y",
];

/// Parse an HTTP date to epoch milliseconds
///
/// Accepts `Tue, 15 Nov 1994 08:12:31 GMT` and the RFC 850 and asctime
/// layouts.
#[must_use]
pub fn parse_http_date_ms(value: &str) -> Option<i64> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value.trim()) {
        return Some(date.timestamp_millis());
    }
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    LEGACY_DATE_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(&collapsed, format)
            .ok()
            .map(|date| date.and_utc().timestamp_millis())
    })
}

/// Format epoch milliseconds as an HTTP date
#[must_use]
pub fn format_http_date(ms: i64) -> Option<String> {
    DateTime::from_timestamp_millis(ms)
        .map(|date| date.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

fn lookup<'a>(headers: &'a [(String, String)], name: &str) -> impl Iterator<Item = &'a str> + 'a {
    let name = name.to_string();
    headers
        .iter()
        .filter(move |(n, _)| n.eq_ignore_ascii_case(&name))
        .map(|(_, v)| v.as_str())
}

/// Comma-separated tokens across every value of a header
fn tokens<'a>(headers: &'a [(String, String)], name: &str) -> impl Iterator<Item = &'a str> + 'a {
    lookup(headers, name)
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Headers of an inbound request, as far as caching cares
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    headers: Vec<(String, String)>,
}

impl RequestHeaders {
    /// No headers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header
    #[must_use]
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.add(name, value);
        self
    }

    /// Append a header
    pub fn add(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// First value of `name`
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&str> {
        lookup(&self.headers, name).next()
    }

    /// Whether `name` is present
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }
}

/// Caching decision computed from a response's headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachingState {
    /// May be stored at all
    pub cacheable: bool,
    /// May be stored in a cache shared between users
    pub proxy_cacheable: bool,
    /// Lifetime from the response date
    pub ttl_ms: i64,
    /// Absolute expiry time
    pub expiration_ms: i64,
}

/// Status line and headers of a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseHeaders {
    status_code: u16,
    headers: Vec<(String, String)>,
    #[serde(default)]
    date_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    caching: Option<CachingState>,
}

impl ResponseHeaders {
    /// Empty headers for `status_code`
    #[must_use]
    pub const fn new(status_code: u16) -> Self {
        Self {
            status_code,
            headers: Vec::new(),
            date_ms: 0,
            caching: None,
        }
    }

    /// Append a header
    #[must_use]
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.add(name, value);
        self
    }

    /// Append a header; invalidates any computed caching state
    pub fn add(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
        self.caching = None;
    }

    /// First value of `name`
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&str> {
        lookup(&self.headers, name).next()
    }

    /// Whether `name` is present
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// All headers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// HTTP status code
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Response date in epoch milliseconds, set by [`compute_caching`](Self::compute_caching)
    #[must_use]
    pub const fn date_ms(&self) -> i64 {
        self.date_ms
    }

    /// Computed caching state, if any
    #[must_use]
    pub const fn caching(&self) -> Option<&CachingState> {
        self.caching.as_ref()
    }

    fn has_directive(&self, header: &str, directive: &str) -> bool {
        tokens(&self.headers, header).any(|token| token.eq_ignore_ascii_case(directive))
    }

    fn directive_seconds(&self, directive: &str) -> Option<i64> {
        tokens(&self.headers, names::CACHE_CONTROL).find_map(|token| {
            let (name, value) = token.split_once('=')?;
            if !name.trim().eq_ignore_ascii_case(directive) {
                return None;
            }
            value.trim().trim_matches('"').parse::<i64>().ok()
        })
    }

    /// Derive cacheability and lifetime from the headers
    ///
    /// `fetch_ms` stands in for a missing or unparseable `Date`.
    /// Responses without any lifetime information get `implicit_ttl_ms`.
    pub fn compute_caching(&mut self, fetch_ms: i64, implicit_ttl_ms: i64) {
        self.date_ms = self
            .lookup(names::DATE)
            .and_then(parse_http_date_ms)
            .unwrap_or(fetch_ms);

        let forbidden = self.has_directive(names::CACHE_CONTROL, "no-store")
            || self.has_directive(names::CACHE_CONTROL, "no-cache")
            || self.has_directive(names::PRAGMA, "no-cache");

        let ttl_ms = self
            .directive_seconds("s-maxage")
            .or_else(|| self.directive_seconds("max-age"))
            .map(|seconds| seconds.saturating_mul(1_000))
            .or_else(|| {
                self.lookup(names::EXPIRES).map(|expires| {
                    // An unparseable Expires means already expired
                    parse_http_date_ms(expires).map_or(0, |at| at - self.date_ms)
                })
            })
            .unwrap_or(implicit_ttl_ms)
            .max(0);

        let cacheable =
            !forbidden && ttl_ms > 0 && CACHEABLE_STATUS_CODES.contains(&self.status_code);
        let proxy_cacheable = cacheable
            && !self.has_directive(names::CACHE_CONTROL, "private")
            && !self.has(names::SET_COOKIE);

        self.caching = Some(CachingState {
            cacheable,
            proxy_cacheable,
            ttl_ms,
            expiration_ms: self.date_ms.saturating_add(ttl_ms),
        });
    }

    /// Treat the response as cacheable for `ttl_ms` from `date_ms`,
    /// whatever its headers say
    pub fn force_caching(&mut self, date_ms: i64, ttl_ms: i64) {
        self.date_ms = date_ms;
        self.caching = Some(CachingState {
            cacheable: true,
            proxy_cacheable: true,
            ttl_ms,
            expiration_ms: date_ms.saturating_add(ttl_ms),
        });
    }

    /// Whether the response may be stored at all
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.caching.is_some_and(|c| c.cacheable)
    }

    /// Whether a shared cache may serve this response to `request`
    ///
    /// `Vary` may only name `Accept-Encoding`, or `Cookie` when the request
    /// carries no cookie. `Vary: *` is never shareable.
    #[must_use]
    pub fn is_proxy_cacheable(&self, request: &RequestHeaders) -> bool {
        if !self.caching.is_some_and(|c| c.proxy_cacheable) {
            return false;
        }
        tokens(&self.headers, names::VARY).all(|varied| {
            varied.eq_ignore_ascii_case(names::ACCEPT_ENCODING)
                || (varied.eq_ignore_ascii_case(names::COOKIE) && !request.has(names::COOKIE))
        })
    }

    /// Absolute expiry time, or the response date when never computed
    #[must_use]
    pub fn expiration_ms(&self) -> i64 {
        self.caching.map_or(self.date_ms, |c| c.expiration_ms)
    }

    /// Whether the response has outlived its TTL at `now_ms`
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expiration_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;
    const IMPLICIT: i64 = 300_000;

    fn computed(headers: ResponseHeaders) -> ResponseHeaders {
        let mut headers = headers;
        headers.compute_caching(NOW, IMPLICIT);
        headers
    }

    #[test]
    fn test_max_age() {
        let h = computed(ResponseHeaders::new(200).with("Cache-Control", "public, max-age=300"));
        let c = h.caching().unwrap();
        assert!(c.cacheable && c.proxy_cacheable);
        assert_eq!(c.ttl_ms, 300_000);
        assert_eq!(h.expiration_ms(), NOW + 300_000);
        assert!(!h.is_expired(NOW + 299_999));
        assert!(h.is_expired(NOW + 300_000));
    }

    #[test]
    fn test_s_maxage_wins() {
        let h = computed(ResponseHeaders::new(200).with("cache-control", "max-age=10, s-maxage=20"));
        assert_eq!(h.caching().unwrap().ttl_ms, 20_000);
    }

    #[test]
    fn test_expires_minus_date() {
        let date = "Tue, 14 Nov 2023 22:13:20 GMT";
        let date_ms = parse_http_date_ms(date).unwrap();
        let expires = format_http_date(date_ms + 60_000).unwrap();
        let h = computed(
            ResponseHeaders::new(200)
                .with("Date", date)
                .with("Expires", &expires),
        );
        assert_eq!(h.date_ms(), date_ms);
        assert_eq!(h.caching().unwrap().ttl_ms, 60_000);
    }

    #[test]
    fn test_legacy_date_formats() {
        let expected = parse_http_date_ms("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(parse_http_date_ms("Sunday, 06-Nov-94 08:49:37 GMT"), Some(expected));
        assert_eq!(parse_http_date_ms("Sun Nov  6 08:49:37 1994"), Some(expected));
        assert_eq!(parse_http_date_ms("yesterday"), None);

        let mut h = ResponseHeaders::new(200)
            .with("Date", "Sunday, 06-Nov-94 08:49:37 GMT")
            .with("Expires", "Sun Nov  6 08:50:37 1994");
        h.compute_caching(NOW, IMPLICIT);
        assert_eq!(h.date_ms(), expected);
        assert_eq!(h.caching().unwrap().ttl_ms, 60_000);
    }

    #[test]
    fn test_bad_expires_is_uncacheable() {
        let h = computed(ResponseHeaders::new(200).with("Expires", "0"));
        assert!(!h.is_cacheable());
    }

    #[test]
    fn test_implicit_ttl_and_fetch_date() {
        let h = computed(ResponseHeaders::new(200));
        assert_eq!(h.date_ms(), NOW);
        assert_eq!(h.caching().unwrap().ttl_ms, IMPLICIT);
    }

    #[test]
    fn test_no_store_and_pragma() {
        assert!(!computed(ResponseHeaders::new(200).with("Cache-Control", "no-store")).is_cacheable());
        assert!(!computed(ResponseHeaders::new(200).with("Cache-Control", "no-cache")).is_cacheable());
        assert!(!computed(ResponseHeaders::new(200).with("Pragma", "no-cache")).is_cacheable());
    }

    #[test]
    fn test_status_codes() {
        for code in CACHEABLE_STATUS_CODES {
            assert!(computed(ResponseHeaders::new(code)).is_cacheable(), "{code}");
        }
        for code in [204, 302, 404, 500] {
            assert!(!computed(ResponseHeaders::new(code)).is_cacheable(), "{code}");
        }
    }

    #[test]
    fn test_private_and_set_cookie_are_not_shared() {
        let request = RequestHeaders::new();
        let private = computed(ResponseHeaders::new(200).with("Cache-Control", "private, max-age=60"));
        assert!(private.is_cacheable());
        assert!(!private.is_proxy_cacheable(&request));
        let cookie = computed(ResponseHeaders::new(200).with("Set-Cookie", "a=b"));
        assert!(!cookie.is_proxy_cacheable(&request));
    }

    #[test]
    fn test_vary_rules() {
        let plain = RequestHeaders::new();
        let with_cookie = RequestHeaders::new().with("Cookie", "session=1");

        let encoding = computed(ResponseHeaders::new(200).with("Vary", "Accept-Encoding"));
        assert!(encoding.is_proxy_cacheable(&plain));
        assert!(encoding.is_proxy_cacheable(&with_cookie));

        let cookie = computed(ResponseHeaders::new(200).with("Vary", "accept-encoding, Cookie"));
        assert!(cookie.is_proxy_cacheable(&plain));
        assert!(!cookie.is_proxy_cacheable(&with_cookie));

        let user_agent = computed(ResponseHeaders::new(200).with("Vary", "User-Agent"));
        assert!(!user_agent.is_proxy_cacheable(&plain));

        let star = computed(ResponseHeaders::new(200).with("Vary", "*"));
        assert!(!star.is_proxy_cacheable(&plain));
    }

    #[test]
    fn test_add_invalidates_caching_state() {
        let mut h = computed(ResponseHeaders::new(200));
        assert!(h.caching().is_some());
        h.add("Cache-Control", "no-store");
        assert!(h.caching().is_none());
        assert!(!h.is_cacheable());
    }

    #[test]
    fn test_force_caching() {
        let mut h = computed(ResponseHeaders::new(200).with("Cache-Control", "no-store"));
        h.force_caching(NOW, 1_000);
        assert!(h.is_proxy_cacheable(&RequestHeaders::new()));
        assert_eq!(h.expiration_ms(), NOW + 1_000);
    }
}
