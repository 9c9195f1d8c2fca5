//! RFC 6265 cookies and cookie jars (spec §4.C9).
//!
//! Grounded in
//! `examples/original_source/src/KDNetwork/http_cookie.{h,cpp}` and
//! `http_cookie_jar.{h,cpp}`: `HttpCookie::from_set_cookie_header` mirrors
//! `fromSetCookieHeader` attribute-by-attribute (including the two
//! `Expires` date formats and the `Max-Age` override), `domain_match`/
//! `path_match` are copied rule-for-rule, and [`CookieJar`] keeps the
//! original's "insert rejects an existing name+domain+path, update
//! replaces-or-inserts" split.

use crate::net::is_ip_literal;
use crate::uri::Uri;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// `SameSite` cookie attribute (spec §4.C9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    #[default]
    None,
    Lax,
    Strict,
}

fn same_site_from_str(s: &str) -> SameSite {
    match s.to_ascii_lowercase().as_str() {
        "lax" => SameSite::Lax,
        "strict" => SameSite::Strict,
        _ => SameSite::None,
    }
}

/// A single cookie, as read from or destined for a `Set-Cookie`/`Cookie`
/// header.
#[derive(Debug, Clone)]
pub struct HttpCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// `None` means a session cookie — never expires on its own.
    pub expiration: Option<SystemTime>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl HttpCookie {
    /// Parse a single `Set-Cookie` header value in the context of the URL it
    /// was received on (for the default domain/path when the header omits
    /// them). Returns `None` for a header with no `name=value` pair.
    pub fn from_set_cookie_header(header: &str, url: &Uri) -> Option<Self> {
        let mut parts = header.split(';');
        let name_value = parts.next()?.trim();
        let eq = name_value.find('=')?;
        let name = name_value[..eq].trim().to_string();
        let value = name_value[eq + 1..].trim().to_string();
        if name.is_empty() {
            return None;
        }

        let mut cookie = HttpCookie {
            name,
            value,
            domain: String::new(),
            path: "/".to_string(),
            expiration: None,
            secure: false,
            http_only: false,
            same_site: SameSite::None,
        };

        let mut max_age_seen = false;
        for attr in parts {
            let attr = attr.trim();
            if attr.is_empty() {
                continue;
            }
            let (attr_name, attr_value) = match attr.find('=') {
                Some(eq) => (attr[..eq].trim().to_ascii_lowercase(), attr[eq + 1..].trim()),
                None => (attr.to_ascii_lowercase(), ""),
            };
            match attr_name.as_str() {
                "expires" if !max_age_seen => cookie.expiration = parse_cookie_date(attr_value),
                "max-age" => {
                    if let Ok(seconds) = attr_value.parse::<i64>() {
                        max_age_seen = true;
                        cookie.expiration = if seconds <= 0 {
                            Some(SystemTime::UNIX_EPOCH)
                        } else {
                            Some(SystemTime::now() + Duration::from_secs(seconds as u64))
                        };
                    }
                }
                "domain" => {
                    cookie.domain = attr_value.strip_prefix('.').unwrap_or(attr_value).to_string();
                }
                "path" => cookie.path = attr_value.to_string(),
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => cookie.same_site = same_site_from_str(attr_value),
                _ => {}
            }
        }

        if cookie.domain.is_empty() {
            cookie.domain = url.host().to_string();
        }
        Some(cookie)
    }

    /// Whether `cookie_domain` (as stored, without a leading dot) matches
    /// `host` per RFC 6265 §5.1.3.
    pub fn domain_match(cookie_domain: &str, host: &str) -> bool {
        if is_ip_literal(host) {
            return cookie_domain.eq_ignore_ascii_case(host);
        }
        if cookie_domain.eq_ignore_ascii_case(host) {
            return true;
        }
        host.len() > cookie_domain.len()
            && host[host.len() - cookie_domain.len()..].eq_ignore_ascii_case(cookie_domain)
            && host.as_bytes()[host.len() - cookie_domain.len() - 1] == b'.'
    }

    /// Whether `cookie_path` matches `request_path` per RFC 6265 §5.1.4.
    pub fn path_match(cookie_path: &str, request_path: &str) -> bool {
        if request_path == cookie_path {
            return true;
        }
        if let Some(rest) = request_path.strip_prefix(cookie_path) {
            return cookie_path.ends_with('/') || rest.starts_with('/');
        }
        false
    }

    /// Whether this cookie should be sent on a request to `url`.
    pub fn matches_url(&self, url: &Uri) -> bool {
        if self.secure && !url.is_secure() {
            return false;
        }
        Self::domain_match(&self.domain, url.host()) && Self::path_match(&self.path, url.path())
    }

    /// Session cookies (no expiration) are never expired.
    pub fn is_expired(&self) -> bool {
        self.expiration.map(|exp| exp <= SystemTime::now()).unwrap_or(false)
    }

    fn key(&self) -> (String, String, String) {
        (self.name.clone(), self.domain.clone(), self.path.clone())
    }
}

const MONTHS: [&str; 12] =
    ["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"];

/// Parse an RFC 1123-ish `Expires` date (`DD Mon YYYY HH:MM:SS GMT`, the
/// format the original's regex accepted) or fall back to a raw decimal Unix
/// timestamp.
fn parse_cookie_date(text: &str) -> Option<SystemTime> {
    let text = text.trim();
    if let Ok(epoch) = text.parse::<i64>() {
        return Some(SystemTime::UNIX_EPOCH + Duration::from_secs(epoch.max(0) as u64));
    }

    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() < 5 {
        return None;
    }
    let day: u64 = fields[0].parse().ok()?;
    let month_name = fields[1].to_ascii_lowercase();
    let month = MONTHS.iter().position(|m| month_name.starts_with(m))? as u64;
    let year: u64 = fields[2].parse().ok()?;
    let mut time_parts = fields[3].split(':');
    let hour: u64 = time_parts.next()?.parse().ok()?;
    let minute: u64 = time_parts.next()?.parse().ok()?;
    let second: u64 = time_parts.next()?.parse().ok()?;

    Some(SystemTime::UNIX_EPOCH + Duration::from_secs(days_and_time_to_unix(year, month, day, hour, minute, second)))
}

fn is_leap_year(year: u64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_and_time_to_unix(year: u64, month: u64, day: u64, hour: u64, minute: u64, second: u64) -> u64 {
    let month_days = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut days: u64 = 0;
    for y in 1970..year {
        days += if is_leap_year(y) { 366 } else { 365 };
    }
    for m in 0..month {
        days += month_days[m as usize];
        if m == 1 && is_leap_year(year) {
            days += 1;
        }
    }
    days += day.saturating_sub(1);
    days * 86400 + hour * 3600 + minute * 60 + second
}

struct JarInner {
    cookies: Vec<HttpCookie>,
}

/// A thread-safe collection of cookies, shared between an [`super::session::HttpSession`]'s
/// clones. Cloning a `CookieJar` shares the underlying store (spec §4.C9
/// "copies share values"), matching the original's copy-shares-contents
/// constructor rather than copying the mutex itself.
#[derive(Clone)]
pub struct CookieJar {
    inner: Arc<Mutex<JarInner>>,
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieJar {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(JarInner { cookies: Vec::new() })) }
    }

    /// Every cookie currently stored, expired ones included.
    pub fn all_cookies(&self) -> Vec<HttpCookie> {
        self.inner.lock().unwrap().cookies.clone()
    }

    /// Cookies that should be sent on a request to `url`, pruning expired
    /// entries first.
    pub fn cookies_for_url(&self, url: &Uri) -> Vec<HttpCookie> {
        let mut inner = self.inner.lock().unwrap();
        remove_expired(&mut inner.cookies);
        inner.cookies.iter().filter(|c| c.matches_url(url)).cloned().collect()
    }

    /// Insert a new cookie. Rejected (returns `false`) if one with the same
    /// name+domain+path already exists; use [`update_cookie`](Self::update_cookie) to
    /// replace-or-insert.
    pub fn insert_cookie(&self, cookie: HttpCookie) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let key = cookie.key();
        if inner.cookies.iter().any(|c| c.key() == key) {
            return false;
        }
        inner.cookies.push(cookie);
        true
    }

    /// Replace an existing cookie with the same name+domain+path, or insert
    /// it if none matches.
    pub fn update_cookie(&self, cookie: HttpCookie) {
        let mut inner = self.inner.lock().unwrap();
        let key = cookie.key();
        if let Some(existing) = inner.cookies.iter_mut().find(|c| c.key() == key) {
            *existing = cookie;
        } else {
            inner.cookies.push(cookie);
        }
    }

    pub fn remove_cookie(&self, name: &str, domain: &str, path: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.cookies.retain(|c| !(c.name == name && c.domain == domain && c.path == path));
    }

    pub fn remove_cookies(&self, name: &str, domain: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.cookies.retain(|c| !(c.name == name && c.domain == domain));
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().cookies.clear();
    }

    pub fn remove_expired_cookies(&self) {
        remove_expired(&mut self.inner.lock().unwrap().cookies);
    }

    /// Parse every `Set-Cookie` header value received for `url` and merge
    /// them in (via [`update_cookie`](Self::update_cookie)). Returns how many parsed
    /// successfully.
    pub fn parse_cookies(&self, url: &Uri, set_cookie_headers: &[String]) -> usize {
        let mut count = 0;
        for header in set_cookie_headers {
            if let Some(cookie) = HttpCookie::from_set_cookie_header(header, url) {
                self.update_cookie(cookie);
                count += 1;
            }
        }
        count
    }

    /// Build a `Cookie:` request header value for `url`, or `None` if
    /// nothing matches.
    pub fn cookie_header_for_url(&self, url: &Uri) -> Option<String> {
        let cookies = self.cookies_for_url(url);
        if cookies.is_empty() {
            return None;
        }
        Some(cookies.iter().map(|c| format!("{}={}", c.name, c.value)).collect::<Vec<_>>().join("; "))
    }
}

fn remove_expired(cookies: &mut Vec<HttpCookie>) {
    cookies.retain(|c| !c.is_expired());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Uri {
        Uri::parse(s).unwrap()
    }

    #[test]
    fn parses_name_value_and_attributes() {
        let u = url("https://example.com/");
        let cookie = HttpCookie::from_set_cookie_header(
            "sid=abc123; Domain=.example.com; Path=/app; Secure; HttpOnly; SameSite=Strict",
            &u,
        )
        .unwrap();
        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "abc123");
        assert_eq!(cookie.domain, "example.com");
        assert_eq!(cookie.path, "/app");
        assert!(cookie.secure);
        assert!(cookie.http_only);
        assert_eq!(cookie.same_site, SameSite::Strict);
    }

    #[test]
    fn defaults_domain_to_request_host() {
        let u = url("https://example.com/foo");
        let cookie = HttpCookie::from_set_cookie_header("a=1", &u).unwrap();
        assert_eq!(cookie.domain, "example.com");
        assert_eq!(cookie.path, "/");
    }

    #[test]
    fn rejects_header_without_equals() {
        let u = url("https://example.com/");
        assert!(HttpCookie::from_set_cookie_header("garbage", &u).is_none());
    }

    #[test]
    fn max_age_overrides_expires() {
        let u = url("https://example.com/");
        let cookie =
            HttpCookie::from_set_cookie_header("a=1; Expires=Wed, 09 Jun 2021 10:18:14 GMT; Max-Age=3600", &u)
                .unwrap();
        let expected = SystemTime::now() + Duration::from_secs(3600);
        let delta = cookie.expiration.unwrap().duration_since(expected).unwrap_or(Duration::ZERO);
        assert!(delta < Duration::from_secs(2));
    }

    #[test]
    fn domain_match_subdomain_and_exact() {
        assert!(HttpCookie::domain_match("example.com", "example.com"));
        assert!(HttpCookie::domain_match("example.com", "www.example.com"));
        assert!(!HttpCookie::domain_match("example.com", "notexample.com"));
    }

    #[test]
    fn domain_match_ip_literal_requires_exact() {
        assert!(HttpCookie::domain_match("127.0.0.1", "127.0.0.1"));
        assert!(!HttpCookie::domain_match("0.0.1", "127.0.0.1"));
    }

    #[test]
    fn path_match_prefix_rules() {
        assert!(HttpCookie::path_match("/app", "/app"));
        assert!(HttpCookie::path_match("/app", "/app/sub"));
        assert!(HttpCookie::path_match("/app/", "/app/sub"));
        assert!(!HttpCookie::path_match("/app", "/application"));
    }

    #[test]
    fn jar_insert_rejects_duplicate_key_update_replaces() {
        let jar = CookieJar::new();
        let make = |value: &str| HttpCookie {
            name: "a".into(),
            value: value.into(),
            domain: "example.com".into(),
            path: "/".into(),
            expiration: None,
            secure: false,
            http_only: false,
            same_site: SameSite::None,
        };
        assert!(jar.insert_cookie(make("1")));
        assert!(!jar.insert_cookie(make("2")));
        jar.update_cookie(make("3"));
        assert_eq!(jar.all_cookies().len(), 1);
        assert_eq!(jar.all_cookies()[0].value, "3");
    }

    #[test]
    fn clone_shares_underlying_store() {
        let jar = CookieJar::new();
        let clone = jar.clone();
        clone.update_cookie(HttpCookie {
            name: "a".into(),
            value: "1".into(),
            domain: "example.com".into(),
            path: "/".into(),
            expiration: None,
            secure: false,
            http_only: false,
            same_site: SameSite::None,
        });
        assert_eq!(jar.all_cookies().len(), 1);
    }

    #[test]
    fn cookies_for_url_filters_by_match() {
        let jar = CookieJar::new();
        jar.update_cookie(HttpCookie {
            name: "a".into(),
            value: "1".into(),
            domain: "example.com".into(),
            path: "/".into(),
            expiration: None,
            secure: true,
            http_only: false,
            same_site: SameSite::None,
        });
        assert!(jar.cookies_for_url(&url("http://example.com/")).is_empty());
        assert_eq!(jar.cookies_for_url(&url("https://example.com/")).len(), 1);
    }
}
