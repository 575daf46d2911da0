//! RFC 9113 Frame Reconstruction Tests
//!
//! https://www.rfc-editor.org/rfc/rfc9113
//!
//! Bytes go through a `FrameReader` exactly as the tap would see them and
//! the resulting events are rendered with a `FrameRenderer`.

use wiretrace::transport::h2::{FrameReader, FrameRenderer, FrameType, Http2FrameEvent};
use wiretrace::Direction;

mod helpers;
use helpers::*;

fn render_all(
    renderer: &FrameRenderer,
    direction: Direction,
    events: &[Http2FrameEvent],
) -> Vec<String> {
    events
        .iter()
        .map(|event| {
            renderer
                .render(direction, event)
                .content()
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

#[test]
fn test_header_block_tags_in_wire_order_rfc7541_section_6() {
    init_tracing();
    let mut reader = FrameReader::client(true);
    let renderer = FrameRenderer::default();

    let mut bytes = client_opening();
    bytes.extend(headers(1, &request_block(), true, true));
    let events = reader.push(&bytes);
    assert_eq!(events.len(), 3);

    let rendered = render_all(&renderer, Direction::Outbound, &events);
    assert_eq!(rendered[0], "PREFACE\nPRI * HTTP/2.0\\r\\n\\r\\nSM\\r\\n\\r\\n");
    assert_eq!(rendered[1], "SETTINGS");
    assert_eq!(
        rendered[2],
        "HEADERS\n\
         Flags: END_STREAM | END_HEADERS\n\
         [INDEXED (2)] :method: GET\n\
         [NAME INDEXED (1)] :authority: example.com\n\
         [+ NEW INDEX] x-id: 7\n\
         [SENSITIVE] authorization: abc"
    );
    assert_eq!(events[2].stream_id(), 1);
}

#[test]
fn test_each_tag_once_in_order_rfc7541_section_6() {
    let mut block = vec![0x85];
    block.extend_from_slice(&[0x40, 6]);
    block.extend_from_slice(b"x-mode");
    block.extend_from_slice(&[4]);
    block.extend_from_slice(b"fast");
    block.extend_from_slice(&[0x10, 6]);
    block.extend_from_slice(b"cookie");
    block.extend_from_slice(&[5]);
    block.extend_from_slice(b"sid=1");

    let mut reader = FrameReader::client(false);
    let mut bytes = client_opening();
    bytes.extend(headers(1, &block, true, true));
    let events = reader.push(&bytes);
    let rendered = FrameRenderer::default().render(Direction::Outbound, &events[1]);
    let content = rendered.content().unwrap();

    let tags = ["[INDEXED (5)]", "[+ NEW INDEX]", "[SENSITIVE]"];
    let mut last = 0;
    for tag in tags {
        assert_eq!(content.matches(tag).count(), 1, "{} in {}", tag, content);
        let at = content.find(tag).unwrap();
        assert!(at > last, "{} out of order", tag);
        last = at;
    }
    assert!(content.contains("[INDEXED (5)] :path: /index.html"));
    assert!(content.contains("[SENSITIVE] cookie: sid=1"));
}

#[test]
fn test_dynamic_table_spans_header_blocks_rfc7541_section_2_3() {
    let mut reader = FrameReader::client(false);
    let renderer = FrameRenderer::default();

    let mut bytes = client_opening();
    bytes.extend(headers(1, &request_block(), true, true));
    // 0xbe: the field added last (x-id: 7), 0xbf: the one before it
    bytes.extend(headers(3, &[0x82, 0xbe, 0xbf], true, true));
    let events = reader.push(&bytes);

    let rendered = render_all(&renderer, Direction::Outbound, &events);
    assert_eq!(rendered.len(), 3, "preface is not surfaced");
    assert_eq!(
        rendered[2],
        "HEADERS\n\
         Flags: END_STREAM | END_HEADERS\n\
         [INDEXED (2)] :method: GET\n\
         [INDEXED (62)] x-id: 7\n\
         [INDEXED (63)] :authority: example.com"
    );
}

#[test]
fn test_continuation_frames_fold_into_headers_rfc9113_section_6_10() {
    let mut reader = FrameReader::client(false);
    let renderer = FrameRenderer::default();
    let block = request_block();
    let (first, rest) = block.split_at(5);
    let (second, third) = rest.split_at(10);

    let mut bytes = client_opening();
    bytes.extend(headers(5, first, false, false));
    bytes.extend(continuation(5, second, false));
    bytes.extend(continuation(5, third, true));
    let events = reader.push(&bytes);

    assert_eq!(events.len(), 2);
    assert!(!reader.has_pending_block());
    let rendered = renderer.render(Direction::Outbound, &events[1]);
    let content = rendered.content().unwrap();
    assert!(content.starts_with("HEADERS\nContinuation frames 2\n[INDEXED (2)] :method: GET"));
    assert!(content.ends_with("[SENSITIVE] authorization: abc"));
}

#[test]
fn test_interleaved_frame_aborts_header_block_rfc9113_section_6_10() {
    let mut reader = FrameReader::server();
    let mut bytes = headers(1, &[0x88], false, false);
    bytes.extend(frame(0x06, 0x00, 0, &[0; 8]));
    bytes.extend(continuation(1, &[], true));
    let events = reader.push(&bytes);

    assert_eq!(events.len(), 3);
    assert_eq!(
        events[0],
        Http2FrameEvent::Invalid {
            frame_type: FrameType::Headers,
            stream_id: 1,
            reason: "Header block interrupted by PING frame".to_string(),
        }
    );
    assert!(matches!(events[1], Http2FrameEvent::Ping { ack: false, .. }));
    assert!(matches!(
        events[2],
        Http2FrameEvent::Invalid {
            frame_type: FrameType::Continuation,
            ..
        }
    ));
}

#[test]
fn test_frames_split_across_reads() {
    let mut reader = FrameReader::client(true);
    let mut bytes = client_opening();
    bytes.extend(headers(1, &request_block(), false, true));
    bytes.extend(data(1, b"hello world", true));

    let mut events = Vec::new();
    for chunk in bytes.chunks(3) {
        events.extend(reader.push(chunk));
    }
    assert_eq!(reader.buffered(), 0);

    assert_eq!(events.len(), 4);
    assert_eq!(events[0], Http2FrameEvent::Preface);
    assert!(matches!(events[2], Http2FrameEvent::Headers { stream_id: 1, .. }));
    match &events[3] {
        Http2FrameEvent::Data { data, .. } => assert_eq!(&data[..], b"hello world"),
        other => panic!("expected DATA, got {:?}", other),
    }
}

#[test]
fn test_malformed_lengths_become_invalid_rfc9113_section_4_2() {
    let mut reader = FrameReader::server();
    let mut bytes = frame(0x08, 0x00, 1, &[0, 0, 1]);
    bytes.extend(frame(0x04, 0x00, 0, &[0, 1, 0, 0]));
    bytes.extend(frame(0x03, 0x00, 0, &[0, 0, 0, 8]));
    bytes.extend(frame(0x06, 0x00, 0, &[0; 7]));
    let events = reader.push(&bytes);

    let renderer = FrameRenderer::default();
    let rendered = render_all(&renderer, Direction::Inbound, &events);
    assert_eq!(
        rendered,
        vec![
            "WINDOW_UPDATE\nInvalid: WINDOW_UPDATE frame length 3 (expected 4)",
            "SETTINGS\nInvalid: SETTINGS frame length 4 is not a multiple of 6",
            "RST_STREAM\nInvalid: RST_STREAM frame must have non-zero stream ID",
            "PING\nInvalid: PING frame length 7 (expected 8)",
        ]
    );
}

#[test]
fn test_bad_hpack_index_is_reported_rfc7541_section_2_3_3() {
    let mut reader = FrameReader::server();
    let events = reader.push(&headers(1, &[0xff, 0x00], true, true));
    assert_eq!(events.len(), 1);
    match &events[0] {
        Http2FrameEvent::Invalid {
            frame_type, reason, ..
        } => {
            assert_eq!(*frame_type, FrameType::Headers);
            assert!(reason.starts_with("HPACK: "), "{}", reason);
        }
        other => panic!("expected Invalid, got {:?}", other),
    }
}

#[test]
fn test_data_rendering_draws_on_serialize_budget() {
    let renderer = FrameRenderer::with_limits(65535, 10);
    let mut reader = FrameReader::server();
    let events = reader.push(&data(1, &[b'a'; 100], false));

    let first = renderer.render(Direction::Inbound, &events[0]);
    assert_eq!(
        first.content().unwrap(),
        "DATA\nLength 100\naaaaaaaaaa\n... truncated, 100 bytes total"
    );
    assert_eq!(renderer.serialize_remaining(Direction::Inbound), 0);

    let events = reader.push(&data(1, b"more", true));
    let second = renderer.render(Direction::Inbound, &events[0]);
    assert_eq!(
        second.content().unwrap(),
        "DATA\nFlags: END_STREAM\nLength 4\n... truncated, 4 bytes total"
    );

    // The outbound budget is separate
    assert_eq!(renderer.serialize_remaining(Direction::Outbound), 10);
}

#[test]
fn test_window_credits_follow_flow_control_rfc9113_section_6_9() {
    let renderer = FrameRenderer::default();
    let mut client = FrameReader::client(false);
    let mut server = FrameReader::server();

    // Server shrinks the window the client may use on new streams
    for event in server.push(&settings(&[(0x4, 1000)])) {
        renderer.render(Direction::Inbound, &event);
    }
    let mut bytes = client_opening();
    bytes.extend(data(1, &[0; 600], false));
    for event in client.push(&bytes) {
        renderer.render(Direction::Outbound, &event);
    }

    let outbound = renderer.windows(Direction::Outbound);
    assert_eq!(outbound.remaining(1), 400);
    assert_eq!(outbound.remaining(0), 65535 - 600);

    // WINDOW_UPDATE from the server returns credit to the client
    for event in server.push(&[window_update(1, 600), window_update(0, 600)].concat()) {
        let rendered = renderer.render(Direction::Inbound, &event);
        assert_eq!(rendered.content().unwrap(), "WINDOW_UPDATE\nIncrement 600");
    }
    assert_eq!(outbound.remaining(1), 1000);
    assert_eq!(outbound.remaining(0), 65535);

    // Nothing was charged to the server's own sending windows
    assert_eq!(renderer.windows(Direction::Inbound).remaining(1), 65535);
}

#[test]
fn test_control_frames_render() {
    let renderer = FrameRenderer::default();
    let mut reader = FrameReader::server();

    let mut goaway = Vec::new();
    goaway.extend_from_slice(&7u32.to_be_bytes());
    goaway.extend_from_slice(&0xbu32.to_be_bytes());
    goaway.extend_from_slice(b"slow down");

    let mut bytes = settings(&[(0x3, 100), (0x4, 65535), (0xf0, 1)]);
    bytes.extend(settings_ack());
    bytes.extend(frame(0x06, 0x01, 0, &42u64.to_be_bytes()));
    bytes.extend(frame(0x03, 0x00, 3, &0x8u32.to_be_bytes()));
    bytes.extend(frame(0x07, 0x00, 0, &goaway));
    bytes.extend(frame(0xfa, 0x03, 0, &[0xde, 0xad]));

    let rendered = render_all(&renderer, Direction::Inbound, &reader.push(&bytes));
    assert_eq!(
        rendered,
        vec![
            "SETTINGS\nMAX_CONCURRENT_STREAMS: 100\nINITIAL_WINDOW_SIZE: 65535\n0xf0: 1",
            "SETTINGS ACK",
            "PING ACK\nPayload 42",
            "RST_STREAM\nError CANCEL",
            "GOAWAY\nLast stream 7\nError ENHANCE_YOUR_CALM\nDebug data: slow down",
            "UNKNOWN (0xfa)\nFlags: 0x03\nLength 2\ndead",
        ]
    );
}

#[test]
fn test_push_promise_rfc9113_section_6_6() {
    let renderer = FrameRenderer::default();
    let mut reader = FrameReader::server();

    let mut payload = 2u32.to_be_bytes().to_vec();
    payload.extend_from_slice(&[0x82, 0x84]);
    let events = reader.push(&frame(0x05, 0x04, 1, &payload));

    let rendered = renderer.render(Direction::Inbound, &events[0]);
    assert_eq!(rendered.stream_id(), Some(1));
    assert_eq!(
        rendered.content().unwrap(),
        "PUSH_PROMISE\nPromised stream 2\n[INDEXED (2)] :method: GET\n[INDEXED (4)] :path: /"
    );
}
