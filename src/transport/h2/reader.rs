//! Frame reconstruction from a tapped byte stream.
//!
//! A [`FrameReader`] sits on one direction of one connection. Bytes are fed in
//! whatever chunks the transport delivered; complete frames come out as
//! [`Http2FrameEvent`]s. Header blocks are reassembled across CONTINUATION
//! frames before HPACK decoding, and the per-direction HPACK decoder keeps
//! dynamic table state across blocks.

use bytes::{Bytes, BytesMut};

use super::event::Http2FrameEvent;
use super::frame::{
    self, FrameHeader, FrameType, HeaderFragment, CONNECTION_PREFACE, FRAME_HEADER_SIZE,
};
use super::hpack::Decoder;

/// Header block waiting for CONTINUATION frames.
#[derive(Debug)]
struct PendingBlock {
    frame_type: FrameType,
    fragment: HeaderFragment,
    block: BytesMut,
    continuation_frames: usize,
}

/// Incremental HTTP/2 frame parser for one direction.
#[derive(Debug)]
pub struct FrameReader {
    buffer: BytesMut,
    awaiting_preface: bool,
    surface_preface: bool,
    decoder: Decoder,
    pending: Option<PendingBlock>,
}

impl FrameReader {
    /// Reader for the client-to-server direction, which opens with the
    /// connection preface.
    pub fn client(surface_preface: bool) -> Self {
        Self::new(true, surface_preface)
    }

    /// Reader for the server-to-client direction.
    pub fn server() -> Self {
        Self::new(false, false)
    }

    pub fn new(expects_preface: bool, surface_preface: bool) -> Self {
        Self {
            buffer: BytesMut::new(),
            awaiting_preface: expects_preface,
            surface_preface,
            decoder: Decoder::new(),
            pending: None,
        }
    }

    /// Bytes received but not yet forming a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether a header block is waiting for CONTINUATION frames.
    pub fn has_pending_block(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed observed bytes, returning every frame they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Http2FrameEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        if self.awaiting_preface && !self.consume_preface(&mut events) {
            return events;
        }

        while let Some(header) = FrameHeader::parse(&self.buffer) {
            let total = FRAME_HEADER_SIZE + header.length as usize;
            if self.buffer.len() < total {
                break;
            }
            let mut frame_bytes = self.buffer.split_to(total);
            let payload = frame_bytes.split_off(FRAME_HEADER_SIZE).freeze();
            self.handle_frame(header, payload, &mut events);
        }

        events
    }

    /// Returns false while more bytes are needed to decide on the preface.
    fn consume_preface(&mut self, events: &mut Vec<Http2FrameEvent>) -> bool {
        let available = self.buffer.len().min(CONNECTION_PREFACE.len());
        if self.buffer[..available] != CONNECTION_PREFACE[..available] {
            tracing::debug!("Client stream does not open with the HTTP/2 preface");
            self.awaiting_preface = false;
            return true;
        }
        if available < CONNECTION_PREFACE.len() {
            return false;
        }
        let _ = self.buffer.split_to(CONNECTION_PREFACE.len());
        self.awaiting_preface = false;
        if self.surface_preface {
            events.push(Http2FrameEvent::Preface);
        }
        true
    }

    fn handle_frame(
        &mut self,
        header: FrameHeader,
        payload: Bytes,
        events: &mut Vec<Http2FrameEvent>,
    ) {
        tracing::trace!(
            "Observed {} frame on stream {} ({} bytes)",
            header.frame_type.name(),
            header.stream_id,
            header.length
        );

        if header.frame_type == FrameType::Continuation {
            self.handle_continuation(header, payload, events);
            return;
        }

        // RFC 9113 Section 6.10: nothing may interleave with a header block
        if let Some(pending) = self.pending.take() {
            events.push(Http2FrameEvent::Invalid {
                frame_type: pending.frame_type,
                stream_id: pending.fragment.stream_id,
                reason: format!(
                    "Header block interrupted by {} frame",
                    header.frame_type.name()
                ),
            });
        }

        let fragment = match header.frame_type {
            FrameType::Headers => frame::parse_headers(&header, payload),
            FrameType::PushPromise => frame::parse_push_promise(&header, payload),
            _ => {
                let event = frame::parse_simple(&header, payload).unwrap_or_else(|reason| {
                    invalid(header.frame_type, header.stream_id, reason)
                });
                events.push(event);
                return;
            }
        };

        match fragment {
            Ok(fragment) => {
                let block = BytesMut::from(&fragment.block[..]);
                let pending = PendingBlock {
                    frame_type: header.frame_type,
                    fragment,
                    block,
                    continuation_frames: 0,
                };
                if pending.fragment.end_headers() {
                    events.push(self.finish_block(pending));
                } else {
                    self.pending = Some(pending);
                }
            }
            Err(reason) => events.push(invalid(header.frame_type, header.stream_id, reason)),
        }
    }

    fn handle_continuation(
        &mut self,
        header: FrameHeader,
        payload: Bytes,
        events: &mut Vec<Http2FrameEvent>,
    ) {
        let Some(mut pending) = self.pending.take() else {
            events.push(invalid(
                FrameType::Continuation,
                header.stream_id,
                "CONTINUATION frame without a preceding HEADERS or PUSH_PROMISE".to_string(),
            ));
            return;
        };

        if header.stream_id != pending.fragment.stream_id {
            events.push(invalid(
                pending.frame_type,
                pending.fragment.stream_id,
                format!(
                    "CONTINUATION on stream {} while header block open on stream {}",
                    header.stream_id, pending.fragment.stream_id
                ),
            ));
            return;
        }

        pending.block.extend_from_slice(&payload);
        pending.continuation_frames += 1;
        if header.flags & frame::flags::END_HEADERS != 0 {
            events.push(self.finish_block(pending));
        } else {
            self.pending = Some(pending);
        }
    }

    fn finish_block(&mut self, pending: PendingBlock) -> Http2FrameEvent {
        let stream_id = pending.fragment.stream_id;
        let entries = match self.decoder.decode(&pending.block) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("HPACK decoding failed on stream {}: {}", stream_id, e);
                return invalid(pending.frame_type, stream_id, format!("HPACK: {}", e));
            }
        };
        match pending.fragment.promised_stream_id {
            Some(promised_stream_id) => Http2FrameEvent::PushPromise {
                stream_id,
                promised_stream_id,
                continuation_frames: pending.continuation_frames,
                entries,
            },
            None => Http2FrameEvent::Headers {
                stream_id,
                flags: pending.fragment.flags,
                priority: pending.fragment.priority,
                continuation_frames: pending.continuation_frames,
                entries,
            },
        }
    }
}

fn invalid(frame_type: FrameType, stream_id: u32, reason: String) -> Http2FrameEvent {
    Http2FrameEvent::Invalid {
        frame_type,
        stream_id,
        reason,
    }
}
