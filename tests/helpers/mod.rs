//! Shared fixtures for the integration tests.
//!
//! Frames are built by hand so tests control every byte the inspector sees.

#![allow(dead_code)]

use wiretrace::transport::h2::CONNECTION_PREFACE;

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("wiretrace=trace")
        .with_test_writer()
        .try_init();
}

/// Build a raw frame.
pub fn frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let length = payload.len() as u32;
    let mut frame = Vec::with_capacity(9 + payload.len());

    // 24-bit length
    frame.extend_from_slice(&[
        ((length >> 16) & 0xFF) as u8,
        ((length >> 8) & 0xFF) as u8,
        (length & 0xFF) as u8,
    ]);
    frame.push(frame_type);
    frame.push(flags);
    frame.extend_from_slice(&(stream_id & 0x7FFFFFFF).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub fn settings(settings: &[(u16, u32)]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (id, value) in settings {
        payload.extend_from_slice(&id.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
    }
    frame(0x04, 0x00, 0, &payload)
}

pub fn settings_ack() -> Vec<u8> {
    frame(0x04, 0x01, 0, &[])
}

pub fn window_update(stream_id: u32, increment: u32) -> Vec<u8> {
    frame(0x08, 0x00, stream_id, &(increment & 0x7FFFFFFF).to_be_bytes())
}

pub fn headers(stream_id: u32, block: &[u8], end_stream: bool, end_headers: bool) -> Vec<u8> {
    let mut flags = 0u8;
    if end_stream {
        flags |= 0x01;
    }
    if end_headers {
        flags |= 0x04;
    }
    frame(0x01, flags, stream_id, block)
}

pub fn continuation(stream_id: u32, block: &[u8], end_headers: bool) -> Vec<u8> {
    frame(0x09, if end_headers { 0x04 } else { 0x00 }, stream_id, block)
}

pub fn data(stream_id: u32, data: &[u8], end_stream: bool) -> Vec<u8> {
    frame(0x00, if end_stream { 0x01 } else { 0x00 }, stream_id, data)
}

/// Client preface followed by an empty SETTINGS frame.
pub fn client_opening() -> Vec<u8> {
    let mut bytes = CONNECTION_PREFACE.to_vec();
    bytes.extend(settings(&[]));
    bytes
}

/// Header block with one field of each representation:
/// `:method: GET` indexed, `:authority: example.com` with an indexed name,
/// `x-id: 7` added to the dynamic table and `authorization: abc` never indexed.
pub fn request_block() -> Vec<u8> {
    let mut block = vec![0x82];
    block.push(0x41);
    block.push(11);
    block.extend_from_slice(b"example.com");
    block.extend_from_slice(&[0x40, 4]);
    block.extend_from_slice(b"x-id");
    block.extend_from_slice(&[1, b'7']);
    block.extend_from_slice(&[0x10, 13]);
    block.extend_from_slice(b"authorization");
    block.extend_from_slice(&[3]);
    block.extend_from_slice(b"abc");
    block
}

pub fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
