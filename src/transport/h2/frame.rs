//! HTTP/2 frame layout and payload parsing.
//!
//! Implements the RFC 9113 frame format for the inspection direction only:
//! frames are parsed from observed bytes, never serialized for transmission.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::event::{Http2FrameEvent, PriorityData};

/// Frame header size (9 bytes per RFC 9113).
pub const FRAME_HEADER_SIZE: usize = 9;

/// HTTP/2 connection preface (client must send this first).
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Frame type identifiers per RFC 9113.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl From<u8> for FrameType {
    fn from(v: u8) -> Self {
        match v {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        match ft {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(v) => v,
        }
    }
}

impl FrameType {
    /// Name as used in RFC 9113 and in rendered frames.
    pub fn name(&self) -> String {
        match self {
            Self::Data => "DATA".into(),
            Self::Headers => "HEADERS".into(),
            Self::Priority => "PRIORITY".into(),
            Self::RstStream => "RST_STREAM".into(),
            Self::Settings => "SETTINGS".into(),
            Self::PushPromise => "PUSH_PROMISE".into(),
            Self::Ping => "PING".into(),
            Self::GoAway => "GOAWAY".into(),
            Self::WindowUpdate => "WINDOW_UPDATE".into(),
            Self::Continuation => "CONTINUATION".into(),
            Self::Unknown(v) => format!("UNKNOWN (0x{:02x})", v),
        }
    }
}

/// Frame flags.
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1; // Same value, different context (SETTINGS/PING)
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// Symbolic name of a SETTINGS parameter, if it is one RFC 9113 (or RFC 8441
/// / RFC 9218) defines.
pub fn settings_name(id: u16) -> Option<&'static str> {
    Some(match id {
        0x1 => "HEADER_TABLE_SIZE",
        0x2 => "ENABLE_PUSH",
        0x3 => "MAX_CONCURRENT_STREAMS",
        0x4 => "INITIAL_WINDOW_SIZE",
        0x5 => "MAX_FRAME_SIZE",
        0x6 => "MAX_HEADER_LIST_SIZE",
        0x8 => "ENABLE_CONNECT_PROTOCOL",
        0x9 => "NO_RFC7540_PRIORITIES",
        _ => return None,
    })
}

/// SETTINGS_INITIAL_WINDOW_SIZE identifier.
pub const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;

/// Symbolic name of an HTTP/2 error code (RFC 9113 Section 7).
pub fn error_code_name(code: u32) -> Option<&'static str> {
    Some(match code {
        0x0 => "NO_ERROR",
        0x1 => "PROTOCOL_ERROR",
        0x2 => "INTERNAL_ERROR",
        0x3 => "FLOW_CONTROL_ERROR",
        0x4 => "SETTINGS_TIMEOUT",
        0x5 => "STREAM_CLOSED",
        0x6 => "FRAME_SIZE_ERROR",
        0x7 => "REFUSED_STREAM",
        0x8 => "CANCEL",
        0x9 => "COMPRESSION_ERROR",
        0xa => "CONNECT_ERROR",
        0xb => "ENHANCE_YOUR_CALM",
        0xc => "INADEQUATE_SECURITY",
        0xd => "HTTP_1_1_REQUIRED",
        _ => return None,
    })
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    /// Parse a frame header from the first 9 bytes of `buf`.
    ///
    /// The reserved bit of the stream identifier is ignored on receipt
    /// (RFC 9113 Section 4.1).
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }

        let length = ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | (buf[2] as u32);
        let stream_id = ((buf[5] as u32 & 0x7f) << 24)
            | ((buf[6] as u32) << 16)
            | ((buf[7] as u32) << 8)
            | (buf[8] as u32);

        Some(Self {
            length,
            frame_type: FrameType::from(buf[3]),
            flags: buf[4],
            stream_id,
        })
    }

    /// Serialize the header, e.g. to build fixtures or replay captured frames.
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u8((self.length >> 16) as u8);
        buf.put_u8((self.length >> 8) as u8);
        buf.put_u8(self.length as u8);
        buf.put_u8(self.frame_type.into());
        buf.put_u8(self.flags);
        buf.put_u32(self.stream_id & 0x7fffffff);
    }
}

/// Header-bearing frame fragment awaiting HPACK decoding.
#[derive(Debug, Clone)]
pub struct HeaderFragment {
    pub stream_id: u32,
    pub flags: u8,
    pub priority: Option<PriorityData>,
    /// Only set for PUSH_PROMISE.
    pub promised_stream_id: Option<u32>,
    pub block: Bytes,
}

impl HeaderFragment {
    pub fn end_headers(&self) -> bool {
        self.flags & flags::END_HEADERS != 0
    }
}

/// Strip padding from a PADDED payload, returning the content.
fn strip_padding(flags: u8, mut payload: Bytes, name: &str) -> Result<Bytes, String> {
    if flags & flags::PADDED == 0 {
        return Ok(payload);
    }
    if payload.remaining() < 1 {
        return Err(format!("PADDED {} frame missing padding length", name));
    }
    let pad_len = payload.get_u8() as usize;
    if pad_len > payload.remaining() {
        return Err("Padding length exceeds payload size".to_string());
    }
    payload.truncate(payload.len() - pad_len);
    Ok(payload)
}

fn parse_priority(payload: &mut Bytes) -> PriorityData {
    let dep_raw = payload.get_u32();
    PriorityData {
        exclusive: dep_raw & 0x80000000 != 0,
        stream_dependency: dep_raw & 0x7fffffff,
        weight: payload.get_u8(),
    }
}

/// Parse a HEADERS frame (with padding and priority handling).
pub fn parse_headers(header: &FrameHeader, payload: Bytes) -> Result<HeaderFragment, String> {
    if header.stream_id == 0 {
        return Err("HEADERS frame must have non-zero stream ID".to_string());
    }
    let mut payload = strip_padding(header.flags, payload, "HEADERS")?;
    let priority = if header.flags & flags::PRIORITY != 0 {
        if payload.remaining() < 5 {
            return Err("HEADERS frame with PRIORITY flag missing priority data".to_string());
        }
        Some(parse_priority(&mut payload))
    } else {
        None
    };

    Ok(HeaderFragment {
        stream_id: header.stream_id,
        flags: header.flags,
        priority,
        promised_stream_id: None,
        block: payload,
    })
}

/// Parse a PUSH_PROMISE frame (with padding handling).
pub fn parse_push_promise(header: &FrameHeader, payload: Bytes) -> Result<HeaderFragment, String> {
    if header.stream_id == 0 {
        return Err("PUSH_PROMISE frame must have non-zero stream ID".to_string());
    }
    let mut payload = strip_padding(header.flags, payload, "PUSH_PROMISE")?;
    if payload.remaining() < 4 {
        return Err("PUSH_PROMISE frame missing promised stream ID".to_string());
    }
    let promised_stream_id = payload.get_u32() & 0x7fffffff;

    Ok(HeaderFragment {
        stream_id: header.stream_id,
        flags: header.flags,
        priority: None,
        promised_stream_id: Some(promised_stream_id),
        block: payload,
    })
}

/// Parse every frame type that does not carry a header block.
///
/// HEADERS, PUSH_PROMISE and CONTINUATION go through the reader's header
/// assembly instead.
pub fn parse_simple(header: &FrameHeader, mut payload: Bytes) -> Result<Http2FrameEvent, String> {
    let stream_id = header.stream_id;
    let len = payload.len();

    match header.frame_type {
        FrameType::Data => {
            if stream_id == 0 {
                return Err("DATA frame must have non-zero stream ID".to_string());
            }
            let data = strip_padding(header.flags, payload, "DATA")?;
            Ok(Http2FrameEvent::Data {
                stream_id,
                flags: header.flags,
                data,
                flow_controlled_len: header.length,
            })
        }
        FrameType::Priority => {
            if stream_id == 0 {
                return Err("PRIORITY frame must have non-zero stream ID".to_string());
            }
            if len != 5 {
                return Err(format!("PRIORITY frame length {} (expected 5)", len));
            }
            let priority = parse_priority(&mut payload);
            if priority.stream_dependency == stream_id {
                return Err("PRIORITY frame stream cannot depend on itself".to_string());
            }
            Ok(Http2FrameEvent::Priority { stream_id, priority })
        }
        FrameType::RstStream => {
            if stream_id == 0 {
                return Err("RST_STREAM frame must have non-zero stream ID".to_string());
            }
            if len != 4 {
                return Err(format!("RST_STREAM frame length {} (expected 4)", len));
            }
            Ok(Http2FrameEvent::RstStream {
                stream_id,
                error_code: payload.get_u32(),
            })
        }
        FrameType::Settings => {
            if stream_id != 0 {
                return Err("SETTINGS frame must be on stream 0".to_string());
            }
            let ack = header.flags & flags::ACK != 0;
            if ack && len != 0 {
                return Err("SETTINGS ACK frame must be empty".to_string());
            }
            if len % 6 != 0 {
                return Err(format!("SETTINGS frame length {} is not a multiple of 6", len));
            }
            let mut settings = Vec::with_capacity(len / 6);
            while payload.remaining() >= 6 {
                settings.push((payload.get_u16(), payload.get_u32()));
            }
            Ok(Http2FrameEvent::Settings { ack, settings })
        }
        FrameType::Ping => {
            if stream_id != 0 {
                return Err("PING frame must be on stream 0".to_string());
            }
            if len != 8 {
                return Err(format!("PING frame length {} (expected 8)", len));
            }
            let mut data = [0u8; 8];
            payload.copy_to_slice(&mut data);
            Ok(Http2FrameEvent::Ping {
                ack: header.flags & flags::ACK != 0,
                payload: data,
            })
        }
        FrameType::GoAway => {
            if stream_id != 0 {
                return Err("GOAWAY frame must be on stream 0".to_string());
            }
            if len < 8 {
                return Err(format!("GOAWAY frame length {} (expected at least 8)", len));
            }
            let last_stream_id = payload.get_u32() & 0x7fffffff;
            let error_code = payload.get_u32();
            Ok(Http2FrameEvent::GoAway {
                last_stream_id,
                error_code,
                debug_data: payload,
            })
        }
        FrameType::WindowUpdate => {
            if len != 4 {
                return Err(format!("WINDOW_UPDATE frame length {} (expected 4)", len));
            }
            let increment = payload.get_u32() & 0x7fffffff;
            // RFC 9113 Section 6.9.1: an increment of 0 is an error
            if increment == 0 {
                return Err("WINDOW_UPDATE increment must be non-zero".to_string());
            }
            Ok(Http2FrameEvent::WindowUpdate {
                stream_id,
                increment,
            })
        }
        FrameType::Unknown(frame_type) => Ok(Http2FrameEvent::Unknown {
            frame_type,
            flags: header.flags,
            stream_id,
            payload,
        }),
        FrameType::Headers | FrameType::PushPromise | FrameType::Continuation => Err(format!(
            "{} frame requires header block assembly",
            header.frame_type.name()
        )),
    }
}
