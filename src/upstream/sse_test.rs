use super::*;

#[test]
fn test_parser_single_event() {
    let mut parser = SseParser::new();
    let events = parser.feed(b"event: endpoint\ndata: /messages?sessionId=abc\n\n");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "endpoint");
    assert_eq!(events[0].data, "/messages?sessionId=abc");
}

#[test]
fn test_parser_split_across_chunks() {
    let mut parser = SseParser::new();
    assert!(parser.feed(b"event: mess").is_empty());
    assert!(parser.feed(b"age\ndata: {\"jsonrpc\"").is_empty());
    let events = parser.feed(b":\"2.0\"}\n\n");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "message");
    assert_eq!(events[0].data, "{\"jsonrpc\":\"2.0\"}");
}

#[test]
fn test_parser_multiline_data() {
    let mut parser = SseParser::new();
    let events = parser.feed(b"data: line1\ndata: line2\n\n");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "");
    assert_eq!(events[0].data, "line1\nline2");
}

#[test]
fn test_parser_skips_comments() {
    let mut parser = SseParser::new();
    let events = parser.feed(b": keepalive\n\ndata: x\n\n");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].data, "x");
}

#[test]
fn test_parser_crlf_lines() {
    let mut parser = SseParser::new();
    let events = parser.feed(b"event: message\r\ndata: hi\r\n\r\n");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "message");
    assert_eq!(events[0].data, "hi");
}

#[test]
fn test_parser_multiple_events_one_chunk() {
    let mut parser = SseParser::new();
    let events = parser.feed(b"data: a\n\ndata: b\n\n");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].data, "a");
    assert_eq!(events[1].data, "b");
}
