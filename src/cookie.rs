//! RFC 6265 compliant cookie handling.
//!
//! The jar is shared by every request of a session: `Set-Cookie` values seen
//! in responses are stored against the request URI, and the outbound request
//! builder asks for the `Cookie` header of the next request.

use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use url::Url;

use crate::error::{Error, Result};

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// RFC 6265 compliant cookie representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lower-cased, without a leading dot.
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// `None` for session cookies.
    pub expires: Option<DateTime<Utc>>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: normalize_domain(&domain.into()),
            path: "/".to_string(),
            secure: false,
            http_only: false,
            expires: None,
        }
    }

    /// Parse a `Set-Cookie` value received for `request_uri`.
    ///
    /// Returns `None` when the leading `name=value` pair is missing or has an
    /// empty name, or when the Domain attribute does not cover the request
    /// host. Unparseable attributes are ignored one by one.
    pub fn parse(header: &str, request_uri: &Url) -> Option<Self> {
        Self::parse_at(header, request_uri, Utc::now())
    }

    fn parse_at(header: &str, request_uri: &Url, now: DateTime<Utc>) -> Option<Self> {
        let host = request_uri.host_str()?.to_lowercase();
        let mut parts = header.split(';').map(str::trim);

        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Cookie::new(name, value.trim(), host.as_str());
        cookie.path = default_path(request_uri.path());

        let mut expires_attr = None;
        let mut max_age = None;
        for attr in parts {
            let (key, val) = match attr.split_once('=') {
                Some((key, val)) => (key.trim(), val.trim()),
                None => (attr, ""),
            };
            match key.to_ascii_lowercase().as_str() {
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "domain" if !val.is_empty() => cookie.domain = normalize_domain(val),
                "path" if val.starts_with('/') => cookie.path = val.to_string(),
                "expires" => {
                    if let Some(date) = parse_cookie_date(val) {
                        expires_attr = Some(date);
                    }
                }
                "max-age" => {
                    if let Ok(seconds) = val.parse::<i64>() {
                        max_age = Some(seconds);
                    }
                }
                _ => {}
            }
        }

        // RFC 6265 Section 5.3 step 3: Max-Age wins over Expires
        cookie.expires = match max_age {
            Some(seconds) => Some(max_age_expiry(now, seconds)),
            None => expires_attr,
        };

        if !domain_matches(&host, &cookie.domain) {
            tracing::debug!(
                "Rejecting cookie {} for domain {} set by {}",
                cookie.name,
                cookie.domain,
                host
            );
            return None;
        }
        Some(cookie)
    }

    /// Whether the cookie replaces `other` when stored.
    pub fn same_key(&self, other: &Cookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires, Some(expires) if expires <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Persistent cookies carry an expiry in the future.
    pub fn is_persistent(&self) -> bool {
        matches!(self.expires, Some(expires) if expires > Utc::now())
    }

    fn matches_at(&self, uri: &Url, now: DateTime<Utc>) -> bool {
        let host = match uri.host_str() {
            Some(host) => host.to_lowercase(),
            None => return false,
        };
        if self.secure && !matches!(uri.scheme(), "https" | "wss") {
            return false;
        }
        !self.is_expired_at(now) && domain_matches(&host, &self.domain) && path_matches(uri.path(), &self.path)
    }

    /// Whether the cookie should be sent with a request to `uri`.
    pub fn matches_url(&self, uri: &Url) -> bool {
        self.matches_at(uri, Utc::now())
    }

    pub fn to_netscape_line(&self) -> String {
        format!("{}{}\tTRUE\t{}\t{}\t{}\t{}\t{}",
            if self.http_only { HTTP_ONLY_PREFIX } else { "" },
            self.domain,
            self.path,
            if self.secure { "TRUE" } else { "FALSE" },
            self.expires.map(|dt| dt.timestamp().to_string()).unwrap_or_else(|| "0".to_string()),
            self.name,
            self.value
        )
    }

    pub fn from_netscape_line(line: &str) -> Result<Self> {
        let (http_only, line) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 7 {
            return Err(Error::CookieLine(format!("expected 7 fields, got {}", parts.len())));
        }
        Ok(Cookie {
            name: parts[5].to_string(),
            value: parts[6].to_string(),
            domain: normalize_domain(parts[0]),
            path: parts[2].to_string(),
            secure: parts[3].eq_ignore_ascii_case("true"),
            http_only,
            expires: parts[4].parse::<i64>().ok().filter(|&ts| ts > 0).and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        })
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Session-wide cookie store, in insertion order.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Mutex<Vec<Cookie>>,
}

impl CookieJar {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Cookie>> {
        self.cookies.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a cookie, replacing any cookie with the same name, domain and
    /// path. The stored cookie moves to the end of the jar.
    pub fn insert(&self, cookie: Cookie) {
        let mut cookies = self.lock();
        cookies.retain(|existing| !existing.same_key(&cookie));
        cookies.push(cookie);
    }

    /// Store every `Set-Cookie` value received for `request_uri`.
    pub fn store<I, S>(&self, request_uri: &Url, set_cookie_values: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = Utc::now();
        for value in set_cookie_values {
            match Cookie::parse_at(value.as_ref(), request_uri, now) {
                Some(cookie) => {
                    tracing::trace!("Storing cookie {} for {}{}", cookie.name, cookie.domain, cookie.path);
                    self.insert(cookie);
                }
                None => tracing::debug!("Ignoring malformed Set-Cookie value"),
            }
        }
    }

    /// Cookies to send with a request to `uri`, in jar order.
    pub fn cookies_for(&self, uri: &Url) -> Vec<Cookie> {
        let now = Utc::now();
        self.lock().iter().filter(|c| c.matches_at(uri, now)).cloned().collect()
    }

    /// `Cookie` header value for `uri`, or `None` when nothing matches.
    pub fn cookie_header(&self, uri: &Url) -> Option<String> {
        let cookies = self.cookies_for(uri);
        if cookies.is_empty() { return None; }
        Some(cookies.iter().map(|c| c.to_string()).collect::<Vec<_>>().join("; "))
    }

    /// Cookies that should survive an application restart.
    pub fn persistent_cookies(&self) -> Vec<Cookie> {
        self.lock().iter().filter(|c| c.is_persistent()).cloned().collect()
    }

    /// All stored cookies, expired ones included.
    pub fn cookies(&self) -> Vec<Cookie> { self.lock().clone() }

    /// Drop expired cookies, returning how many were removed.
    pub fn remove_expired(&self) -> usize {
        let now = Utc::now();
        let mut cookies = self.lock();
        let before = cookies.len();
        cookies.retain(|c| !c.is_expired_at(now));
        before - cookies.len()
    }

    pub fn get(&self, domain: &str, name: &str) -> Option<Cookie> {
        let domain = normalize_domain(domain);
        self.lock().iter().rev().find(|c| c.domain == domain && c.name == name).cloned()
    }

    pub fn remove(&self, domain: &str, name: &str) -> usize {
        let domain = normalize_domain(domain);
        let mut cookies = self.lock();
        let before = cookies.len();
        cookies.retain(|c| !(c.domain == domain && c.name == name));
        before - cookies.len()
    }

    pub fn clear(&self) { self.lock().clear(); }
    pub fn len(&self) -> usize { self.lock().len() }
    pub fn is_empty(&self) -> bool { self.lock().is_empty() }

    /// Persistent cookies as a JSON document for the settings store.
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.persistent_cookies())?)
    }

    /// Restore cookies exported by [`export_json`](Self::export_json),
    /// returning how many unexpired cookies were stored.
    pub fn import_json(&self, json: &str) -> Result<usize> {
        let cookies: Vec<Cookie> = serde_json::from_str(json)?;
        let now = Utc::now();
        let mut stored = 0;
        for cookie in cookies.into_iter().filter(|c| !c.is_expired_at(now)) {
            self.insert(cookie);
            stored += 1;
        }
        Ok(stored)
    }

    /// Write unexpired cookies in Netscape cookie-file format.
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let now = Utc::now();
        let lines: String = self.lock().iter()
            .filter(|c| !c.is_expired_at(now))
            .map(|c| format!("{}\n", c.to_netscape_line()))
            .collect();

        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(b"# Netscape HTTP Cookie File\n").await?;
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Load a Netscape cookie file, returning the number of cookies stored.
    /// Malformed lines are skipped.
    pub async fn load_from_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let file = tokio::fs::File::open(path).await?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let mut loaded = 0;
        while reader.read_line(&mut line).await? > 0 {
            let trimmed = line.trim_end_matches(['\r', '\n']);
            let is_comment = trimmed.starts_with('#') && !trimmed.starts_with(HTTP_ONLY_PREFIX);
            if !trimmed.is_empty() && !is_comment {
                match Cookie::from_netscape_line(trimmed) {
                    Ok(cookie) => {
                        self.insert(cookie);
                        loaded += 1;
                    }
                    Err(e) => tracing::debug!("Skipping cookie file line: {}", e),
                }
            }
            line.clear();
        }
        Ok(loaded)
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.strip_prefix('.').unwrap_or(domain).to_lowercase()
}

/// RFC 6265 Section 5.1.3.
pub fn domain_matches(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// RFC 6265 Section 5.1.4.
pub fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    match request_path.strip_prefix(cookie_path) {
        Some(rest) => cookie_path.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

/// RFC 6265 Section 5.1.4 default-path of a request path.
pub fn default_path(request_path: &str) -> String {
    if !request_path.starts_with('/') {
        return "/".to_string();
    }
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => request_path[..idx].to_string(),
    }
}

fn max_age_expiry(now: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
    if seconds <= 0 {
        return DateTime::<Utc>::MIN_UTC;
    }
    now.timestamp()
        .checked_add(seconds)
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn parse_cookie_date(date_str: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(date_str) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%a, %d-%b-%Y %H:%M:%S GMT",
        "%a, %d-%b-%y %H:%M:%S GMT",
        "%A, %d-%b-%y %H:%M:%S GMT",
        "%a %b %e %H:%M:%S %Y",
        "%Y-%m-%dT%H:%M:%SZ",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(date_str, fmt) {
            return Some(adjust_two_digit_year(dt).and_utc());
        }
    }
    None
}

/// RFC 6265 Section 5.1.1: two-digit years 70-99 are 19xx, 00-69 are 20xx.
fn adjust_two_digit_year(dt: NaiveDateTime) -> NaiveDateTime {
    use chrono::Datelike;
    match dt.year() {
        year @ 0..=69 => dt.with_year(year + 2000).unwrap_or(dt),
        year @ 70..=99 => dt.with_year(year + 1900).unwrap_or(dt),
        _ => dt,
    }
}
