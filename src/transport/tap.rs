//! Raw payload interception.
//!
//! [`TapStream`] wraps any byte stream and reports every byte it transfers
//! to a [`WireObserver`], without changing what the caller sees: return
//! values, errors and pending states of the inner stream pass through
//! untouched. Zero-length transfers and failed calls are not observed.
//!
//! Observers must not block. The provided ones hand payloads to a
//! [`WireEmitter`], whose channels are unbounded.

use std::io::{self, IoSlice, Read, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::config::InspectorConfig;
use crate::emitter::WireEmitter;
use crate::payload::{Direction, RawPayload};
use crate::session::HeadListener;
use crate::transport::h2::hpack::HeaderBlockEntry;
use crate::transport::h2::{FrameReader, FrameRenderer, Http2FrameEvent};
use crate::transport::http1::Http1Sniffer;

/// Receives copies of the bytes moving through a [`TapStream`].
pub trait WireObserver {
    /// Bytes returned by a successful read.
    fn on_read(&mut self, bytes: &[u8]);
    /// Bytes accepted by a successful write.
    fn on_write(&mut self, bytes: &[u8]);
    /// The inner stream was flushed.
    fn on_flush(&mut self) {}
    /// The stream was shut down or dropped. Called at most once.
    fn on_close(&mut self) {}
}

/// Stream wrapper that mirrors transferred bytes to an observer.
///
/// Implements the tokio I/O traits when the inner stream does, and the
/// blocking `std::io` traits likewise.
pub struct TapStream<S, O: WireObserver> {
    inner: S,
    observer: O,
    closed: bool,
}

impl<S, O: WireObserver> TapStream<S, O> {
    pub fn new(inner: S, observer: O) -> Self {
        Self {
            inner,
            observer,
            closed: false,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Report the close to the observer without touching the inner stream.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.observer.on_close();
        }
    }
}

impl<S, O: WireObserver> Drop for TapStream<S, O> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S, O> AsyncRead for TapStream<S, O>
where
    S: AsyncRead + Unpin,
    O: WireObserver + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            let read = &buf.filled()[before..];
            if !read.is_empty() {
                this.observer.on_read(read);
            }
        }
        poll
    }
}

impl<S, O> AsyncWrite for TapStream<S, O>
where
    S: AsyncWrite + Unpin,
    O: WireObserver + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = poll {
            if written > 0 {
                this.observer.on_write(&buf[..written]);
            }
        }
        poll
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        if let Poll::Ready(Ok(written)) = poll {
            let mut remaining = written;
            for buf in bufs {
                if remaining == 0 {
                    break;
                }
                let take = remaining.min(buf.len());
                if take > 0 {
                    this.observer.on_write(&buf[..take]);
                }
                remaining -= take;
            }
        }
        poll
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        if let Poll::Ready(Ok(())) = poll {
            this.observer.on_flush();
        }
        poll
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_shutdown(cx);
        if poll.is_ready() {
            this.close();
        }
        poll
    }
}

impl<S: Read, O: WireObserver> Read for TapStream<S, O> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read > 0 {
            self.observer.on_read(&buf[..read]);
        }
        Ok(read)
    }
}

impl<S: Write, O: WireObserver> Write for TapStream<S, O> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        if written > 0 {
            self.observer.on_write(&buf[..written]);
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()?;
        self.observer.on_flush();
        Ok(())
    }
}

/// Observer for HTTP/1 and WebSocket connections: bytes are emitted as they
/// are, one payload per read or write.
pub struct RawObserver {
    emitter: Arc<WireEmitter>,
    sniffer: Option<Http1Sniffer>,
}

impl RawObserver {
    pub fn new(emitter: Arc<WireEmitter>) -> Self {
        Self {
            emitter,
            sniffer: None,
        }
    }

    /// Also parse the traffic for request and response heads.
    pub fn with_sniffer(mut self, sniffer: Http1Sniffer) -> Self {
        self.sniffer = Some(sniffer);
        self
    }

    pub fn sniffer(&self) -> Option<&Http1Sniffer> {
        self.sniffer.as_ref()
    }
}

impl WireObserver for RawObserver {
    fn on_read(&mut self, bytes: &[u8]) {
        self.emitter
            .emit_inbound(RawPayload::http1(Bytes::copy_from_slice(bytes)));
        if let Some(sniffer) = self.sniffer.as_mut() {
            sniffer.push_response(bytes);
        }
    }

    fn on_write(&mut self, bytes: &[u8]) {
        self.emitter
            .enqueue(RawPayload::http1(Bytes::copy_from_slice(bytes)));
        self.emitter.flush();
        if let Some(sniffer) = self.sniffer.as_mut() {
            sniffer.push_request(bytes);
        }
    }

    fn on_close(&mut self) {
        self.emitter.close();
    }
}

/// Observer for HTTP/2 connections: bytes are rebuilt into frames and each
/// frame is emitted as rendered text.
///
/// Outbound frames are held until the transport flushes, so frames written
/// together share one instant. Codecs that expose frame hooks can skip the
/// byte path and call [`on_frame`](Self::on_frame) directly.
pub struct Http2Observer {
    emitter: Arc<WireEmitter>,
    renderer: FrameRenderer,
    outbound: FrameReader,
    inbound: FrameReader,
    listener: Option<Arc<dyn HeadListener>>,
}

impl Http2Observer {
    /// Observer for the client side of a connection.
    pub fn new(emitter: Arc<WireEmitter>, config: &InspectorConfig) -> Self {
        Self {
            emitter,
            renderer: FrameRenderer::new(config),
            outbound: FrameReader::client(config.surface_preface),
            inbound: FrameReader::server(),
            listener: None,
        }
    }

    /// Report request and response heads to `listener`.
    pub fn with_listener(mut self, listener: Arc<dyn HeadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn renderer(&self) -> &FrameRenderer {
        &self.renderer
    }

    /// Render and emit one frame seen in `direction`.
    pub fn on_frame(&mut self, direction: Direction, event: &Http2FrameEvent) {
        if let Some(listener) = &self.listener {
            report_head(listener.as_ref(), direction, event);
        }
        let payload = self.renderer.render(direction, event);
        self.emitter.emit(direction, payload);
    }
}

fn report_head(listener: &dyn HeadListener, direction: Direction, event: &Http2FrameEvent) {
    let (stream_id, entries) = match event {
        Http2FrameEvent::Headers {
            stream_id, entries, ..
        } => (*stream_id, entries),
        // The promise carries the request of the pushed stream
        Http2FrameEvent::PushPromise {
            promised_stream_id,
            entries,
            ..
        } => {
            let headers = header_pairs(entries);
            listener.on_request_head(*promised_stream_id, &headers);
            return;
        }
        _ => return,
    };
    let headers = header_pairs(entries);
    match direction {
        Direction::Outbound => listener.on_request_head(stream_id, &headers),
        Direction::Inbound => listener.on_response_head(stream_id, None, &headers),
    }
}

fn header_pairs(entries: &[HeaderBlockEntry]) -> Vec<(String, String)> {
    entries
        .iter()
        .filter_map(|entry| entry.field())
        .map(|field| (field.name.clone(), field.value.clone()))
        .collect()
}

impl WireObserver for Http2Observer {
    fn on_read(&mut self, bytes: &[u8]) {
        for event in self.inbound.push(bytes) {
            self.on_frame(Direction::Inbound, &event);
        }
    }

    fn on_write(&mut self, bytes: &[u8]) {
        for event in self.outbound.push(bytes) {
            self.on_frame(Direction::Outbound, &event);
        }
    }

    fn on_flush(&mut self) {
        self.emitter.flush();
    }

    fn on_close(&mut self) {
        if self.outbound.buffered() > 0 || self.inbound.buffered() > 0 {
            tracing::debug!(
                "Connection closed with partial frames ({} outbound, {} inbound bytes)",
                self.outbound.buffered(),
                self.inbound.buffered()
            );
        }
        self.emitter.close();
    }
}

/// Observer chosen once the protocol of a connection is known.
pub enum ProtocolObserver {
    Raw(RawObserver),
    Http2(Http2Observer),
}

impl ProtocolObserver {
    pub fn is_http2(&self) -> bool {
        matches!(self, Self::Http2(_))
    }
}

impl WireObserver for ProtocolObserver {
    fn on_read(&mut self, bytes: &[u8]) {
        match self {
            Self::Raw(observer) => observer.on_read(bytes),
            Self::Http2(observer) => observer.on_read(bytes),
        }
    }

    fn on_write(&mut self, bytes: &[u8]) {
        match self {
            Self::Raw(observer) => observer.on_write(bytes),
            Self::Http2(observer) => observer.on_write(bytes),
        }
    }

    fn on_flush(&mut self) {
        match self {
            Self::Raw(observer) => observer.on_flush(),
            Self::Http2(observer) => observer.on_flush(),
        }
    }

    fn on_close(&mut self) {
        match self {
            Self::Raw(observer) => observer.on_close(),
            Self::Http2(observer) => observer.on_close(),
        }
    }
}
