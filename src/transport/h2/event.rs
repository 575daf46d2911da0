//! Reconstructed HTTP/2 frame events.
//!
//! One variant per frame kind. Events come either from [`FrameReader`]
//! parsing tapped bytes or straight from a codec's frame hooks, and are
//! consumed by [`FrameRenderer`] with an exhaustive match.
//!
//! [`FrameReader`]: super::FrameReader
//! [`FrameRenderer`]: super::FrameRenderer

use bytes::Bytes;

use super::frame::{flags, FrameType};
use super::hpack::HeaderBlockEntry;

/// Priority data carried by HEADERS and PRIORITY frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityData {
    pub exclusive: bool,
    pub stream_dependency: u32,
    /// Weight as sent on the wire (0-255); the effective weight is one more.
    pub weight: u8,
}

/// A reconstructed HTTP/2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Http2FrameEvent {
    /// The client connection preface.
    Preface,
    /// HEADERS, with any CONTINUATION frames folded in.
    Headers {
        stream_id: u32,
        /// Flags of the HEADERS frame itself.
        flags: u8,
        priority: Option<PriorityData>,
        continuation_frames: usize,
        entries: Vec<HeaderBlockEntry>,
    },
    Data {
        stream_id: u32,
        flags: u8,
        /// Payload with padding removed.
        data: Bytes,
        /// Whole payload length, padding included, as counted by flow control.
        flow_controlled_len: u32,
    },
    Settings {
        ack: bool,
        settings: Vec<(u16, u32)>,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    RstStream {
        stream_id: u32,
        error_code: u32,
    },
    GoAway {
        last_stream_id: u32,
        error_code: u32,
        debug_data: Bytes,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        continuation_frames: usize,
        entries: Vec<HeaderBlockEntry>,
    },
    Priority {
        stream_id: u32,
        priority: PriorityData,
    },
    Unknown {
        frame_type: u8,
        flags: u8,
        stream_id: u32,
        payload: Bytes,
    },
    /// A frame that arrived but could not be reconstructed.
    Invalid {
        frame_type: FrameType,
        stream_id: u32,
        reason: String,
    },
}

impl Http2FrameEvent {
    /// Stream the frame belongs to; 0 for connection-level frames.
    pub fn stream_id(&self) -> u32 {
        match self {
            Self::Preface
            | Self::Settings { .. }
            | Self::GoAway { .. }
            | Self::Ping { .. } => 0,
            Self::Headers { stream_id, .. }
            | Self::Data { stream_id, .. }
            | Self::WindowUpdate { stream_id, .. }
            | Self::RstStream { stream_id, .. }
            | Self::PushPromise { stream_id, .. }
            | Self::Priority { stream_id, .. }
            | Self::Unknown { stream_id, .. }
            | Self::Invalid { stream_id, .. } => *stream_id,
        }
    }

    /// Whether this frame ends its stream in the sending direction.
    pub fn is_end_stream(&self) -> bool {
        match self {
            Self::Headers { flags: f, .. } | Self::Data { flags: f, .. } => {
                f & flags::END_STREAM != 0
            }
            _ => false,
        }
    }

    /// Header entries for HEADERS and PUSH_PROMISE events.
    pub fn header_entries(&self) -> Option<&[HeaderBlockEntry]> {
        match self {
            Self::Headers { entries, .. } | Self::PushPromise { entries, .. } => Some(entries),
            _ => None,
        }
    }
}
