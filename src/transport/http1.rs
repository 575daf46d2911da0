//! HTTP/1 message-head sniffer.
//!
//! Follows both directions of an HTTP/1.1 connection far enough to pick out
//! message heads. Request heads give each exchange its method and target;
//! response heads carry the status, headers and `Set-Cookie` values. Bodies
//! with a `Content-Length` are skipped, and responses that carry no body
//! (HEAD requests, 1xx, 204, 304) are recognised from the paired request.
//! Any other framing (chunked, read-to-close) or a protocol switch ends
//! sniffing for that direction. The raw bytes are emitted by the tap
//! regardless, so stopping only affects header capture.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::BytesMut;

use crate::config::DEFAULT_MAX_HEAD_SIZE;
use crate::session::HeadListener;

const MAX_HEADERS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnifferState {
    Head,
    Body(u64),
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Request,
    Response,
}

/// One direction of the connection: bytes of an incomplete head, or the
/// length of the body being skipped.
#[derive(Debug)]
struct HeadStream {
    buffer: BytesMut,
    state: SnifferState,
}

impl HeadStream {
    fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            state: SnifferState::Head,
        }
    }

    fn stop(&mut self) {
        self.state = SnifferState::Stopped;
        self.buffer = BytesMut::new();
    }
}

/// Incremental parser of successive HTTP/1 request and response heads.
///
/// Responses pair with requests in order: the n-th final response answers
/// the n-th request, and both are reported under exchange id n.
pub struct Http1Sniffer {
    requests: HeadStream,
    responses: HeadStream,
    max_head_size: usize,
    requested: u32,
    exchanges: u32,
    /// Methods of requests still waiting for their final response.
    methods: VecDeque<String>,
    listener: Arc<dyn HeadListener>,
}

impl Http1Sniffer {
    pub fn new(listener: Arc<dyn HeadListener>) -> Self {
        Self::with_max_head_size(listener, DEFAULT_MAX_HEAD_SIZE)
    }

    pub fn with_max_head_size(listener: Arc<dyn HeadListener>, max_head_size: usize) -> Self {
        Self {
            requests: HeadStream::new(),
            responses: HeadStream::new(),
            max_head_size,
            requested: 0,
            exchanges: 0,
            methods: VecDeque::new(),
            listener,
        }
    }

    /// Number of final responses seen so far; also the id of the last one.
    pub fn exchanges(&self) -> u32 {
        self.exchanges
    }

    /// Number of request heads seen so far.
    pub fn requests(&self) -> u32 {
        self.requested
    }

    /// Whether response sniffing has ended for this connection.
    pub fn is_stopped(&self) -> bool {
        self.responses.state == SnifferState::Stopped
    }

    /// Feed outbound bytes.
    pub fn push_request(&mut self, bytes: &[u8]) {
        self.push(Side::Request, bytes);
    }

    /// Feed inbound bytes.
    pub fn push_response(&mut self, bytes: &[u8]) {
        self.push(Side::Response, bytes);
    }

    fn stream_mut(&mut self, side: Side) -> &mut HeadStream {
        match side {
            Side::Request => &mut self.requests,
            Side::Response => &mut self.responses,
        }
    }

    fn push(&mut self, side: Side, bytes: &[u8]) {
        let mut input = bytes;
        loop {
            let stream = self.stream_mut(side);
            match stream.state {
                SnifferState::Stopped => return,
                SnifferState::Body(remaining) => {
                    let skip = remaining.min(input.len() as u64);
                    input = &input[skip as usize..];
                    if skip < remaining {
                        stream.state = SnifferState::Body(remaining - skip);
                        return;
                    }
                    stream.state = SnifferState::Head;
                }
                SnifferState::Head => {
                    if input.is_empty() {
                        return;
                    }
                    stream.buffer.extend_from_slice(input);
                    self.parse_buffered(side);
                    return;
                }
            }
        }
    }

    fn parse_buffered(&mut self, side: Side) {
        let parsed = match side {
            Side::Request => self.parse_request(),
            Side::Response => self.parse_response(),
        };
        let max_head_size = self.max_head_size;
        let stream = self.stream_mut(side);
        match parsed {
            Ok(Some(len)) => {
                let leftover = stream.buffer.split_off(len).freeze();
                stream.buffer.clear();
                self.push(side, &leftover);
            }
            Ok(None) if stream.buffer.len() > max_head_size => {
                tracing::debug!(
                    "HTTP/1 {:?} head exceeds {} bytes, no longer sniffing",
                    side,
                    max_head_size
                );
                stream.stop();
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!("Unparseable HTTP/1 {:?} head: {}", side, e);
                stream.stop();
            }
        }
    }

    /// Parse one request head from the buffer, returning its length when
    /// complete. The method and target are reported as `:method` and
    /// `:path` ahead of the regular fields.
    fn parse_request(&mut self) -> Result<Option<usize>, httparse::Error> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);
        let len = match request.parse(&self.requests.buffer)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Ok(None),
        };

        let method = request.method.unwrap_or("GET").to_string();
        let mut fields = vec![
            (":method".to_string(), method.clone()),
            (":path".to_string(), request.path.unwrap_or("/").to_string()),
        ];
        fields.extend(header_fields(&*request.headers));

        self.requested += 1;
        let exchange = self.requested;
        tracing::trace!("HTTP/1 request head {} ({})", exchange, method);
        self.listener.on_request_head(exchange, &fields);
        self.methods.push_back(method);

        self.requests.state = request_body_state(&fields);
        Ok(Some(len))
    }

    /// Parse one response head from the buffer, returning its length when
    /// complete.
    fn parse_response(&mut self) -> Result<Option<usize>, httparse::Error> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut headers);
        let len = match response.parse(&self.responses.buffer)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Ok(None),
        };

        let status = response.code.unwrap_or(0);
        let fields = header_fields(&*response.headers);

        let interim = (100..200).contains(&status) && status != 101;
        let exchange = self.exchanges + 1;
        let method = if interim {
            None
        } else {
            self.exchanges = exchange;
            self.methods.pop_front()
        };
        tracing::trace!("HTTP/1 response head {} (status {})", exchange, status);
        self.listener.on_response_head(exchange, Some(status), &fields);

        if status == 101 || is_tunnel(status, method.as_deref()) {
            // The connection no longer carries HTTP/1 in either direction
            self.requests.stop();
        }
        self.responses.state = response_body_state(status, method.as_deref(), &fields);
        Ok(Some(len))
    }
}

fn header_fields(headers: &[httparse::Header<'_>]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect()
}

fn header<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn is_tunnel(status: u16, method: Option<&str>) -> bool {
    method == Some("CONNECT") && (200..300).contains(&status)
}

/// Framing of a request body (RFC 9112 Section 6.3): without a length or
/// transfer coding the request has none.
fn request_body_state(fields: &[(String, String)]) -> SnifferState {
    if header(fields, "transfer-encoding").is_some() {
        tracing::debug!("Transfer-Encoding request, no longer sniffing requests");
        return SnifferState::Stopped;
    }
    match header(fields, "content-length").map(str::parse::<u64>) {
        None | Some(Ok(0)) => SnifferState::Head,
        Some(Ok(len)) => SnifferState::Body(len),
        Some(Err(_)) => SnifferState::Stopped,
    }
}

/// Framing of the message after a response head (RFC 9112 Section 6.3).
fn response_body_state(
    status: u16,
    method: Option<&str>,
    fields: &[(String, String)],
) -> SnifferState {
    if status == 101 || is_tunnel(status, method) {
        return SnifferState::Stopped;
    }
    if (100..200).contains(&status) || status == 204 || status == 304 || method == Some("HEAD") {
        return SnifferState::Head;
    }
    if header(fields, "transfer-encoding").is_some() {
        tracing::debug!("Transfer-Encoding response, no longer sniffing");
        return SnifferState::Stopped;
    }
    match header(fields, "content-length").map(str::parse::<u64>) {
        Some(Ok(0)) => SnifferState::Head,
        Some(Ok(len)) => SnifferState::Body(len),
        _ => SnifferState::Stopped,
    }
}
