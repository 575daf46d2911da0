//! Per-response inspection state.

use std::sync::Mutex;

use url::Url;

use crate::security::ConnectionSecurity;

/// Snapshot of what is known about one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseDetails {
    pub request_uri: Option<Url>,
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub security: ConnectionSecurity,
}

impl ResponseDetails {
    pub fn is_success(&self) -> bool { matches!(self.status, Some(200..=299)) }
    pub fn is_redirect(&self) -> bool { matches!(self.status, Some(300..=399)) }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn get_headers(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }
}

/// Mutable state of one in-flight response.
///
/// Written from the transport (heads, security reclassification) while the
/// detail view reads snapshots, so every access goes through one mutex.
#[derive(Debug, Default)]
pub struct ResponseState {
    inner: Mutex<ResponseDetails>,
}

impl ResponseState {
    pub fn new(security: ConnectionSecurity) -> Self {
        Self {
            inner: Mutex::new(ResponseDetails {
                security,
                ..ResponseDetails::default()
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut ResponseDetails) -> R) -> R {
        let mut details = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut details)
    }

    pub fn set_request_uri(&self, uri: Url) { self.with(|d| d.request_uri = Some(uri)) }
    pub fn set_security(&self, security: ConnectionSecurity) {
        self.with(|d| d.security = security)
    }

    /// Record a response head. A later head (e.g. trailers or a final
    /// response after 1xx) appends its headers; a status replaces the old one.
    pub fn record_head(&self, status: Option<u16>, headers: &[(String, String)]) {
        self.with(|d| {
            if status.is_some() {
                d.status = status;
            }
            d.headers.extend(headers.iter().cloned());
        })
    }

    pub fn request_uri(&self) -> Option<Url> { self.with(|d| d.request_uri.clone()) }
    pub fn status(&self) -> Option<u16> { self.with(|d| d.status) }
    pub fn snapshot(&self) -> ResponseDetails { self.with(|d| d.clone()) }
}
