//! Text rendering of reconstructed HTTP/2 frames.
//!
//! Every frame becomes one deterministic block of text whose first line is
//! the frame name, for example:
//!
//! ```text
//! HEADERS
//! Flags: END_STREAM | END_HEADERS
//! [INDEXED (2)] :method: GET
//! [NAME INDEXED (1)] :authority: example.com
//! [SENSITIVE] authorization: Bearer abc
//! ```
//!
//! Rendering also drives the diagnostic credit ledgers: DATA consumes the
//! sender's windows, WINDOW_UPDATE and SETTINGS_INITIAL_WINDOW_SIZE adjust the
//! windows of the opposite sender, and DATA bodies draw on the per-direction
//! serialize budget so a long download cannot grow the timeline without bound.
//! A stream's windows are dropped once it closes: after END_STREAM in both
//! directions, or on RST_STREAM.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;

use super::credit::{SerializeCredit, StreamCredits};
use super::event::{Http2FrameEvent, PriorityData};
use super::frame::{
    error_code_name, flags, settings_name, CONNECTION_PREFACE, SETTINGS_INITIAL_WINDOW_SIZE,
};
use super::hpack::HeaderBlockEntry;
use crate::config::InspectorConfig;
use crate::payload::{Direction, RawPayload};

/// Credit ledgers for frames sent in one direction.
#[derive(Debug)]
struct DirectionCredits {
    windows: StreamCredits,
    serialize: SerializeCredit,
}

impl DirectionCredits {
    fn new(initial_window: u32, serialize_limit: usize) -> Self {
        Self {
            windows: StreamCredits::new(initial_window),
            serialize: SerializeCredit::new(serialize_limit),
        }
    }
}

/// Which sides of an open stream have sent END_STREAM.
#[derive(Debug, Default, Clone, Copy)]
struct StreamEnds {
    outbound: bool,
    inbound: bool,
}

impl StreamEnds {
    fn mark(&mut self, direction: Direction) {
        match direction {
            Direction::Outbound => self.outbound = true,
            Direction::Inbound => self.inbound = true,
        }
    }

    fn is_closed(&self) -> bool {
        self.outbound && self.inbound
    }
}

/// Renders frame events to [`RawPayload`]s for one connection.
#[derive(Debug)]
pub struct FrameRenderer {
    outbound: DirectionCredits,
    inbound: DirectionCredits,
    streams: Mutex<HashMap<u32, StreamEnds>>,
}

impl Default for FrameRenderer {
    fn default() -> Self {
        Self::new(&InspectorConfig::default())
    }
}

impl FrameRenderer {
    pub fn new(config: &InspectorConfig) -> Self {
        Self::with_limits(config.initial_window, config.serialize_limit)
    }

    pub fn with_limits(initial_window: u32, serialize_limit: usize) -> Self {
        Self {
            outbound: DirectionCredits::new(initial_window, serialize_limit),
            inbound: DirectionCredits::new(initial_window, serialize_limit),
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Number of streams seen open and not yet closed.
    pub fn open_streams(&self) -> usize {
        self.streams.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn open_stream(&self, stream_id: u32) {
        if stream_id == 0 {
            return;
        }
        self.outbound.windows.open(stream_id);
        self.inbound.windows.open(stream_id);
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(stream_id)
            .or_default();
    }

    /// Note END_STREAM from `direction`, closing the stream once both
    /// directions have ended.
    fn end_stream(&self, direction: Direction, stream_id: u32) {
        if stream_id == 0 {
            return;
        }
        let closed = {
            let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
            let ends = streams.entry(stream_id).or_default();
            ends.mark(direction);
            ends.is_closed()
        };
        if closed {
            self.close_stream(stream_id);
        }
    }

    fn close_stream(&self, stream_id: u32) {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&stream_id);
        self.outbound.windows.forget(stream_id);
        self.inbound.windows.forget(stream_id);
        tracing::trace!("Stream {} closed", stream_id);
    }

    /// Follow the stream lifecycle for frames that open or close streams.
    fn track_stream(&self, direction: Direction, event: &Http2FrameEvent) {
        match event {
            Http2FrameEvent::Headers {
                stream_id,
                flags: frame_flags,
                ..
            } => {
                self.open_stream(*stream_id);
                if frame_flags & flags::END_STREAM != 0 {
                    self.end_stream(direction, *stream_id);
                }
            }
            Http2FrameEvent::Data {
                stream_id,
                flags: frame_flags,
                ..
            } if frame_flags & flags::END_STREAM != 0 => self.end_stream(direction, *stream_id),
            // The receiver of a promise never sends on the promised stream
            Http2FrameEvent::PushPromise {
                promised_stream_id, ..
            } => {
                self.open_stream(*promised_stream_id);
                self.end_stream(direction.opposite(), *promised_stream_id);
            }
            Http2FrameEvent::RstStream { stream_id, .. } if *stream_id != 0 => {
                self.close_stream(*stream_id)
            }
            _ => {}
        }
    }

    fn credits(&self, direction: Direction) -> &DirectionCredits {
        match direction {
            Direction::Outbound => &self.outbound,
            Direction::Inbound => &self.inbound,
        }
    }

    /// Flow-control windows of frames sent in `direction`.
    pub fn windows(&self, direction: Direction) -> &StreamCredits {
        &self.credits(direction).windows
    }

    /// DATA rendering budget left for `direction`.
    pub fn serialize_remaining(&self, direction: Direction) -> usize {
        self.credits(direction).serialize.remaining()
    }

    /// Render a frame observed in `direction`.
    pub fn render(&self, direction: Direction, event: &Http2FrameEvent) -> RawPayload {
        let content = match event {
            Http2FrameEvent::Preface => format!(
                "PREFACE\n{}",
                String::from_utf8_lossy(CONNECTION_PREFACE).escape_debug()
            ),
            Http2FrameEvent::Headers {
                flags: frame_flags,
                priority,
                continuation_frames,
                entries,
                ..
            } => {
                let mut out = String::from("HEADERS");
                push_flags(&mut out, *frame_flags);
                if let Some(priority) = priority {
                    push_line(&mut out, &priority_line(priority));
                }
                if *continuation_frames > 0 {
                    push_line(&mut out, &format!("Continuation frames {}", continuation_frames));
                }
                push_entries(&mut out, entries);
                out
            }
            Http2FrameEvent::Data {
                stream_id,
                flags: frame_flags,
                data,
                flow_controlled_len,
            } => {
                let credits = self.credits(direction);
                let (stream_window, connection_window) =
                    credits.windows.consume(*stream_id, *flow_controlled_len);
                tracing::trace!(
                    "{:?} DATA on stream {}: {} bytes, window {} / connection {}",
                    direction,
                    stream_id,
                    flow_controlled_len,
                    stream_window,
                    connection_window
                );

                let mut out = String::from("DATA");
                push_flags(&mut out, *frame_flags);
                push_line(&mut out, &format!("Length {}", data.len()));
                push_budgeted(&mut out, &credits.serialize, data, data_body);
                out
            }
            Http2FrameEvent::Settings { ack: true, .. } => "SETTINGS ACK".to_string(),
            Http2FrameEvent::Settings {
                ack: false,
                settings,
            } => {
                let mut out = String::from("SETTINGS");
                for (id, value) in settings {
                    if *id == SETTINGS_INITIAL_WINDOW_SIZE {
                        // The receiver of these settings sends in the other direction
                        self.credits(direction.opposite())
                            .windows
                            .apply_initial_window(*value);
                    }
                    let line = match settings_name(*id) {
                        Some(name) => format!("{}: {}", name, value),
                        None => format!("0x{:x}: {}", id, value),
                    };
                    push_line(&mut out, &line);
                }
                out
            }
            Http2FrameEvent::WindowUpdate {
                stream_id,
                increment,
            } => {
                let window = self
                    .credits(direction.opposite())
                    .windows
                    .replenish(*stream_id, *increment);
                tracing::trace!(
                    "{:?} WINDOW_UPDATE on stream {}: window now {}",
                    direction,
                    stream_id,
                    window
                );
                format!("WINDOW_UPDATE\nIncrement {}", increment)
            }
            Http2FrameEvent::RstStream { error_code, .. } => {
                format!("RST_STREAM\nError {}", error_code_text(*error_code))
            }
            Http2FrameEvent::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                let mut out = format!(
                    "GOAWAY\nLast stream {}\nError {}",
                    last_stream_id,
                    error_code_text(*error_code)
                );
                if !debug_data.is_empty() {
                    push_line(
                        &mut out,
                        &format!("Debug data: {}", String::from_utf8_lossy(debug_data)),
                    );
                }
                out
            }
            Http2FrameEvent::Ping { ack, payload } => format!(
                "{}\nPayload {}",
                if *ack { "PING ACK" } else { "PING" },
                u64::from_be_bytes(*payload)
            ),
            Http2FrameEvent::PushPromise {
                promised_stream_id,
                continuation_frames,
                entries,
                ..
            } => {
                let mut out = format!("PUSH_PROMISE\nPromised stream {}", promised_stream_id);
                if *continuation_frames > 0 {
                    push_line(&mut out, &format!("Continuation frames {}", continuation_frames));
                }
                push_entries(&mut out, entries);
                out
            }
            Http2FrameEvent::Priority { priority, .. } => {
                format!("PRIORITY\n{}", priority_line(priority))
            }
            Http2FrameEvent::Unknown {
                frame_type,
                flags: frame_flags,
                payload,
                ..
            } => {
                let mut out = format!(
                    "UNKNOWN (0x{:02x})\nFlags: 0x{:02x}\nLength {}",
                    frame_type,
                    frame_flags,
                    payload.len()
                );
                push_budgeted(&mut out, &self.credits(direction).serialize, payload, hex);
                out
            }
            Http2FrameEvent::Invalid {
                frame_type, reason, ..
            } => format!("{}\nInvalid: {}", frame_type.name(), reason),
        };

        self.track_stream(direction, event);
        RawPayload::http2_frame(event.stream_id(), content)
    }
}

fn push_line(out: &mut String, line: &str) {
    out.push('\n');
    out.push_str(line);
}

fn push_flags(out: &mut String, frame_flags: u8) {
    let names: Vec<&str> = [
        (flags::END_STREAM, "END_STREAM"),
        (flags::END_HEADERS, "END_HEADERS"),
        (flags::PADDED, "PADDED"),
        (flags::PRIORITY, "PRIORITY"),
    ]
    .iter()
    .filter(|(bit, _)| frame_flags & bit != 0)
    .map(|(_, name)| *name)
    .collect();
    if !names.is_empty() {
        push_line(out, &format!("Flags: {}", names.join(" | ")));
    }
}

fn push_entries(out: &mut String, entries: &[HeaderBlockEntry]) {
    for entry in entries {
        let line = match entry {
            HeaderBlockEntry::Field(field) => format!(
                "[{}] {}: {}",
                field.representation.tag(),
                field.name,
                field.value
            ),
            HeaderBlockEntry::SizeUpdate(size) => {
                format!("Update dynamic table size to {}", size)
            }
        };
        push_line(out, &line);
    }
}

/// Render as much of `body` as the budget allows, noting any truncation.
fn push_budgeted(
    out: &mut String,
    budget: &SerializeCredit,
    body: &[u8],
    format_body: impl Fn(&[u8]) -> String,
) {
    if body.is_empty() {
        return;
    }
    let granted = budget.take(body.len());
    if granted > 0 {
        push_line(out, &format_body(&body[..granted]));
    }
    if granted < body.len() {
        push_line(out, &format!("... truncated, {} bytes total", body.len()));
    }
}

/// Text bodies render as they are; anything that is not UTF-8 (binary
/// payloads, or a character cut at the budget boundary) renders as hex.
fn data_body(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => format!("hex: {}", hex(bytes)),
    }
}

fn priority_line(priority: &PriorityData) -> String {
    format!(
        "Depends on {}, weight {}, exclusive {}",
        priority.stream_dependency,
        priority.weight as u16 + 1,
        priority.exclusive
    )
}

fn error_code_text(code: u32) -> String {
    match error_code_name(code) {
        Some(name) => name.to_string(),
        None => format!("0x{:x}", code),
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
