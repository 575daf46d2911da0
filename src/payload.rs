//! Observed traffic units.

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Which side sent the bytes, relative to the local client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server.
    Outbound,
    /// Server to client.
    Inbound,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Self::Outbound => Self::Inbound,
            Self::Inbound => Self::Outbound,
        }
    }
}

/// One immutable record of observed traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawPayload {
    /// Bytes exactly as read or written on an HTTP/1 or WebSocket connection.
    Http1 {
        instant: DateTime<Utc>,
        payload: Bytes,
    },
    /// Human-readable rendering of one reconstructed HTTP/2 frame.
    Http2Frame {
        instant: DateTime<Utc>,
        /// 0 for connection-level frames.
        stream_id: u32,
        content: String,
    },
}

impl RawPayload {
    pub fn http1(payload: impl Into<Bytes>) -> Self {
        Self::Http1 {
            instant: Utc::now(),
            payload: payload.into(),
        }
    }

    pub fn http2_frame(stream_id: u32, content: String) -> Self {
        Self::Http2Frame {
            instant: Utc::now(),
            stream_id,
            content,
        }
    }

    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            Self::Http1 { instant, .. } | Self::Http2Frame { instant, .. } => *instant,
        }
    }

    /// Replace the timestamp, e.g. with the flush instant of a batch.
    pub fn with_instant(mut self, at: DateTime<Utc>) -> Self {
        match &mut self {
            Self::Http1 { instant, .. } | Self::Http2Frame { instant, .. } => *instant = at,
        }
        self
    }

    /// Stream id for HTTP/2 frames, `None` for raw HTTP/1 chunks.
    pub fn stream_id(&self) -> Option<u32> {
        match self {
            Self::Http1 { .. } => None,
            Self::Http2Frame { stream_id, .. } => Some(*stream_id),
        }
    }

    /// Rendered frame text, if this is an HTTP/2 frame.
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Http1 { .. } => None,
            Self::Http2Frame { content, .. } => Some(content),
        }
    }

    /// Raw bytes, if this is an HTTP/1 chunk.
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Http1 { payload, .. } => Some(payload),
            Self::Http2Frame { .. } => None,
        }
    }
}
