//! Per-connection inspection context.
//!
//! An [`InspectionSession`] bundles everything the observers of one
//! connection report into: the wire emitter, the session cookie jar, the
//! connection security, and the state of each response on the connection.
//! Callers construct it explicitly and hand it to the observers they install.
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use url::Url;
//! use wiretrace::{CookieJar, InspectionSession, InspectorConfig};
//! use wiretrace::transport::TapStream;
//!
//! # async fn example(tcp: tokio::net::TcpStream) -> wiretrace::Result<()> {
//! let jar = Arc::new(CookieJar::new());
//! let base = Url::parse("http://localhost:8080/")?;
//! let (session, mut events) = InspectionSession::new(base, jar, InspectorConfig::default());
//!
//! let stream = TapStream::new(tcp, session.raw_observer(true));
//! // ... drive an HTTP/1 client over `stream`, then read `events.outgoing`
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use url::Url;

use crate::config::InspectorConfig;
use crate::cookie::CookieJar;
use crate::emitter::{WireEmitter, WireEvents};
use crate::response::ResponseState;
use crate::security::ConnectionSecurity;
use crate::transport::http1::Http1Sniffer;
use crate::transport::tap::{Http2Observer, RawObserver};

/// Receives message heads reconstructed from the wire.
///
/// `stream_id` is the HTTP/2 stream, or the 1-based exchange number on an
/// HTTP/1 connection. HTTP/2 heads include their pseudo-header fields.
pub trait HeadListener: Send + Sync {
    fn on_request_head(&self, stream_id: u32, headers: &[(String, String)]);
    fn on_response_head(
        &self,
        stream_id: u32,
        status: Option<u16>,
        headers: &[(String, String)],
    );
}

/// Inspection state shared by the observers of one connection.
pub struct InspectionSession {
    config: InspectorConfig,
    base_uri: Url,
    emitter: Arc<WireEmitter>,
    cookies: Arc<CookieJar>,
    security: Mutex<ConnectionSecurity>,
    responses: Mutex<TrackedResponses>,
}

/// Response states by stream id, oldest first.
#[derive(Default)]
struct TrackedResponses {
    states: HashMap<u32, Arc<ResponseState>>,
    order: VecDeque<u32>,
}

impl TrackedResponses {
    fn get_or_insert(
        &mut self,
        stream_id: u32,
        limit: usize,
        security: ConnectionSecurity,
    ) -> Arc<ResponseState> {
        if let Some(state) = self.states.get(&stream_id) {
            return Arc::clone(state);
        }
        while self.states.len() >= limit {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.states.remove(&oldest).is_some() {
                tracing::trace!("Dropped response state of stream {}", oldest);
            }
        }
        let state = Arc::new(ResponseState::new(security));
        self.states.insert(stream_id, Arc::clone(&state));
        self.order.push_back(stream_id);
        state
    }

    fn remove(&mut self, stream_id: u32) -> Option<Arc<ResponseState>> {
        let state = self.states.remove(&stream_id)?;
        self.order.retain(|id| *id != stream_id);
        Some(state)
    }
}

impl std::fmt::Debug for InspectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InspectionSession")
            .field("base_uri", &self.base_uri.as_str())
            .field("security", &self.security().security)
            .finish_non_exhaustive()
    }
}

impl InspectionSession {
    /// Create a session for a connection to `base_uri`.
    pub fn new(
        base_uri: Url,
        cookies: Arc<CookieJar>,
        config: InspectorConfig,
    ) -> (Arc<Self>, WireEvents) {
        let (emitter, events) = WireEmitter::new();
        let session = Arc::new(Self {
            config,
            base_uri,
            emitter: Arc::new(emitter),
            cookies,
            security: Mutex::new(ConnectionSecurity::unencrypted()),
            responses: Mutex::new(TrackedResponses::default()),
        });
        (session, events)
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    pub fn base_uri(&self) -> &Url {
        &self.base_uri
    }

    pub fn emitter(&self) -> &Arc<WireEmitter> {
        &self.emitter
    }

    pub fn cookies(&self) -> &Arc<CookieJar> {
        &self.cookies
    }

    pub fn security(&self) -> ConnectionSecurity {
        self.security.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the connection security, propagating it to every response
    /// already tracked on this connection.
    pub fn set_security(&self, security: ConnectionSecurity) {
        tracing::debug!("Connection to {} classified as {:?}", self.base_uri, security.security);
        *self.security.lock().unwrap_or_else(|e| e.into_inner()) = security.clone();
        let responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        for state in responses.states.values() {
            state.set_security(security.clone());
        }
    }

    /// State of the response on `stream_id`, created on first use.
    ///
    /// At most `max_tracked_responses` states are kept; creating one more
    /// drops the oldest. Handles already given out stay valid.
    pub fn response(&self, stream_id: u32) -> Arc<ResponseState> {
        let security = self.security();
        let limit = self.config.max_tracked_responses.max(1);
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_or_insert(stream_id, limit, security)
    }

    /// State of the response on `stream_id`, if one is tracked.
    pub fn existing_response(&self, stream_id: u32) -> Option<Arc<ResponseState>> {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .states
            .get(&stream_id)
            .cloned()
    }

    /// Stop tracking a finished response, returning its state.
    pub fn release(&self, stream_id: u32) -> Option<Arc<ResponseState>> {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(stream_id)
    }

    /// Number of response states currently kept.
    pub fn tracked_responses(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .states
            .len()
    }

    /// `Cookie` header for the next request to `uri`.
    pub fn cookie_header(&self, uri: &Url) -> Option<String> {
        self.cookies.cookie_header(uri)
    }

    /// Observer for HTTP/1 and WebSocket connections. With `sniff_responses`
    /// the inbound stream is also parsed for response heads.
    pub fn raw_observer(self: &Arc<Self>, sniff_responses: bool) -> RawObserver {
        let observer = RawObserver::new(Arc::clone(&self.emitter));
        if sniff_responses {
            let listener: Arc<dyn HeadListener> = self.clone();
            observer.with_sniffer(Http1Sniffer::with_max_head_size(
                listener,
                self.config.max_head_size,
            ))
        } else {
            observer
        }
    }

    /// Observer for HTTP/2 connections.
    pub fn http2_observer(self: &Arc<Self>) -> Http2Observer {
        let listener: Arc<dyn HeadListener> = self.clone();
        Http2Observer::new(Arc::clone(&self.emitter), &self.config).with_listener(listener)
    }

    /// Flush pending outbound events and stop emitting.
    pub fn close(&self) {
        self.emitter.close();
    }

    /// Request URI from the `:scheme`, `:authority` and `:path` of a head.
    ///
    /// HTTP/1 heads only carry `:path`, the request-target: origin-form is
    /// resolved against the base URI, absolute-form is used as is. Anything
    /// unusable falls back to the base URI.
    fn request_uri(&self, headers: &[(String, String)]) -> Url {
        let pseudo = |name: &str| {
            headers
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };
        if pseudo(":method") == Some("CONNECT") {
            return self.base_uri.clone();
        }
        let parsed = match (pseudo(":authority"), pseudo(":path")) {
            (Some(authority), Some(path)) => {
                let scheme = pseudo(":scheme").unwrap_or_else(|| self.base_uri.scheme());
                Url::parse(&format!("{}://{}{}", scheme, authority, path))
            }
            (None, Some(target)) if target.starts_with('/') && !target.starts_with("//") => {
                self.base_uri.join(target)
            }
            (None, Some(target)) => Url::parse(target),
            _ => return self.base_uri.clone(),
        };
        match parsed {
            Ok(uri) => uri,
            Err(e) => {
                tracing::debug!("Unusable request target ({}), using base URI", e);
                self.base_uri.clone()
            }
        }
    }
}

impl HeadListener for InspectionSession {
    fn on_request_head(&self, stream_id: u32, headers: &[(String, String)]) {
        self.response(stream_id).set_request_uri(self.request_uri(headers));
    }

    fn on_response_head(
        &self,
        stream_id: u32,
        status: Option<u16>,
        headers: &[(String, String)],
    ) {
        let state = self.response(stream_id);
        let status = status.or_else(|| {
            headers
                .iter()
                .find(|(key, _)| key == ":status")
                .and_then(|(_, value)| value.parse().ok())
        });
        let regular: Vec<(String, String)> = headers
            .iter()
            .filter(|(key, _)| !key.starts_with(':'))
            .cloned()
            .collect();
        state.record_head(status, &regular);

        let set_cookies: Vec<&str> = regular
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case("set-cookie"))
            .map(|(_, value)| value.as_str())
            .collect();
        if !set_cookies.is_empty() {
            let uri = state.request_uri().unwrap_or_else(|| self.base_uri.clone());
            self.cookies.store(&uri, set_cookies);
        }
    }
}
