use super::{SseDecoder, SseEvent};

fn data(event: Option<&str>, data: &str) -> SseEvent {
    SseEvent::Data {
        event: event.map(str::to_string),
        data: data.to_string(),
    }
}

#[test]
fn test_decodes_data_lines_and_done_sentinel() {
    let mut decoder = SseDecoder::new();

    let events = decoder.push(b"data: {\"a\":1}\n\ndata: {\"a\":2}\n\ndata: [DONE]\n\n");

    assert_eq!(
        events,
        vec![
            data(None, "{\"a\":1}"),
            data(None, "{\"a\":2}"),
            SseEvent::Done
        ]
    );
}

#[test]
fn test_tracks_event_names_until_blank_line() {
    let mut decoder = SseDecoder::new();

    let events = decoder.push(
        b"event: content_block_delta\r\ndata: {\"x\":1}\r\n\r\ndata: {\"y\":2}\n\n",
    );

    assert_eq!(
        events,
        vec![
            data(Some("content_block_delta"), "{\"x\":1}"),
            data(None, "{\"y\":2}")
        ]
    );
}

#[test]
fn test_multi_line_data_is_joined_at_blank_line() {
    let mut decoder = SseDecoder::new();

    assert!(decoder.push(b"event: note\ndata: first\ndata: second\n").is_empty());
    assert_eq!(
        decoder.push(b"data:third\n\n"),
        vec![data(Some("note"), "first\nsecond\nthird")]
    );
}

#[test]
fn test_blank_line_without_data_dispatches_nothing() {
    let mut decoder = SseDecoder::new();

    assert!(decoder.push(b"event: ping\n\n\n").is_empty());
    assert_eq!(decoder.push(b"data: ok\n\n"), vec![data(None, "ok")]);
}

#[test]
fn test_buffers_partial_lines_across_chunks() {
    let mut decoder = SseDecoder::new();

    assert!(decoder.push(b"data: {\"te").is_empty());
    assert!(decoder.push(b"xt\":\"hi\"").is_empty());
    assert!(decoder.push(b"}\n").is_empty());
    assert_eq!(decoder.push(b"\n"), vec![data(None, "{\"text\":\"hi\"}")]);
}

#[test]
fn test_split_utf8_sequence_is_reassembled() {
    let mut decoder = SseDecoder::new();
    let line = "data: héllo\n\n".as_bytes();
    let split = line.iter().position(|byte| *byte == 0xC3).expect("multibyte") + 1;

    assert!(decoder.push(&line[..split]).is_empty());
    assert_eq!(decoder.push(&line[split..]), vec![data(None, "héllo")]);
}

#[test]
fn test_skips_comments_and_unknown_fields() {
    let mut decoder = SseDecoder::new();

    let events = decoder.push(b": keep-alive\nid: 7\nretry: 100\ngarbage line\ndata: ok\n\n");

    assert_eq!(events, vec![data(None, "ok")]);
}

#[test]
fn test_finish_flushes_trailing_line_without_newline() {
    let mut decoder = SseDecoder::new();

    assert!(decoder.push(b"data: tail").is_empty());
    assert_eq!(decoder.finish(), vec![data(None, "tail")]);
    assert!(decoder.finish().is_empty());
}

#[test]
fn test_finish_dispatches_event_missing_its_blank_line() {
    let mut decoder = SseDecoder::new();

    assert!(decoder.push(b"data: [DONE]\n").is_empty());
    assert_eq!(decoder.finish(), vec![SseEvent::Done]);
}
