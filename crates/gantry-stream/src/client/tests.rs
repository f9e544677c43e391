use super::*;
use gantry_core::{ActualInstance, ActualState, DesiredSpec, Transition};

fn chunks(parts: &[&str]) -> impl Stream<Item = reqwest::Result<Vec<u8>>> + Unpin {
    let parts: Vec<reqwest::Result<Vec<u8>>> =
        parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
    futures::stream::iter(parts)
}

fn record(tag: &str, id: u64, payload: &str) -> String {
    format!("id: {id}\nevent: {tag}\ndata: {payload}\n\n")
}

#[test]
fn test_parser_splits_records() {
    let mut parser = SseParser::new();
    let frames = parser.push(b"event: a\ndata: 1\n\nevent: b\ndata: 2\n\n").unwrap();

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].event.as_deref(), Some("a"));
    assert_eq!(frames[0].data, "1");
    assert_eq!(frames[1].event.as_deref(), Some("b"));
}

#[test]
fn test_parser_handles_split_chunks_and_crlf() {
    let mut parser = SseParser::new();

    assert!(parser.push(b"id: 4\r\nev").unwrap().is_empty());
    assert!(parser.push(b"ent: x\r\ndata: {\"a\"").unwrap().is_empty());
    let frames = parser.push(b":1}\r\n\r\n").unwrap();

    assert_eq!(
        frames,
        vec![SseFrame {
            event: Some("x".to_string()),
            data: "{\"a\":1}".to_string(),
            id: Some("4".to_string()),
        }]
    );
}

#[test]
fn test_parser_joins_data_lines_and_skips_comments() {
    let mut parser = SseParser::new();
    let frames = parser
        .push(b": keep-alive\n\ndata: one\ndata:two\nretry: 10\n\n")
        .unwrap();

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data, "one\ntwo");
    assert_eq!(frames[0].event, None);
}

#[test]
fn test_parser_discards_record_without_data() {
    let mut parser = SseParser::new();

    assert!(parser.push(b"event: lonely\n\n").unwrap().is_empty());
    let frames = parser.push(b"data: x\n\n").unwrap();
    assert_eq!(frames[0].event, None);
}

#[test]
fn test_parser_rejects_unterminated_long_line() {
    let mut parser = SseParser::with_max_line(16);

    assert!(parser.push(b"data: 0123456789").unwrap().is_empty());
    assert!(matches!(
        parser.push(b"abcdef"),
        Err(StreamError::LineTooLong { limit: 16 })
    ));

    // The oversized line is discarded; later records parse normally.
    let frames = parser.push(b"\ndata: ok\n\n").unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data, "ok");
}

#[test]
fn test_parser_rejects_long_line_in_one_chunk() {
    let mut parser = SseParser::with_max_line(8);

    assert!(matches!(
        parser.push(b"data: far too long\n\n"),
        Err(StreamError::LineTooLong { limit: 8 })
    ));
}

#[test]
fn test_parser_accepts_line_at_limit() {
    let mut parser = SseParser::with_max_line(8);

    let frames = parser.push(b"data: ab\n\n").unwrap();
    assert_eq!(frames[0].data, "ab");
}

#[tokio::test]
async fn test_reader_ends_on_endless_line() {
    let filler = "x".repeat(64);
    let parts: Vec<&str> = std::iter::once("data: ")
        .chain(std::iter::repeat(filler.as_str()).take(8))
        .collect();
    let mut reader = EventStreamReader::with_parser(chunks(&parts), SseParser::with_max_line(256));

    assert!(matches!(
        reader.next().await,
        Err(StreamError::LineTooLong { limit: 256 })
    ));
    assert!(reader.is_closed());
    assert!(matches!(reader.next().await, Err(StreamError::Closed)));
}

#[tokio::test]
async fn test_reader_decodes_events() {
    let spec = DesiredSpec::new("web", "apps", 3);
    let before = ActualInstance::new("web", 0, "apps");
    let mut after = before.clone();
    after.state = ActualState::Running;
    let changed = Event::ActualInstanceChanged(Transition { before, after });

    let first = record(
        "desired_spec_created",
        0,
        &serde_json::to_string(&spec).unwrap(),
    );
    let second = record(
        "actual_instance_changed",
        1,
        &changed.payload_json().unwrap(),
    );
    let (head, tail) = second.split_at(10);
    let mut reader = EventStreamReader::new(chunks(&[&first, head, tail]));

    assert_eq!(reader.next().await.unwrap(), Event::DesiredSpecCreated(spec));
    assert_eq!(reader.next().await.unwrap(), changed);
    assert!(matches!(reader.next().await, Err(StreamError::Closed)));
    assert!(reader.is_closed());
}

#[tokio::test]
async fn test_reader_reports_decode_errors_and_continues() {
    let good = record(
        "desired_spec_removed",
        2,
        &serde_json::to_string(&DesiredSpec::new("web", "apps", 1)).unwrap(),
    );
    let body = [
        record("task_exploded", 0, "{}"),
        record("desired_spec_created", 1, "{not json"),
        good,
    ];
    let parts: Vec<&str> = body.iter().map(String::as_str).collect();
    let mut reader = EventStreamReader::new(chunks(&parts));

    assert!(matches!(
        reader.next().await,
        Err(StreamError::UnknownEventType(tag)) if tag == "task_exploded"
    ));
    assert!(matches!(
        reader.next().await,
        Err(StreamError::InvalidPayload { .. })
    ));
    assert!(matches!(
        reader.next().await,
        Ok(Event::DesiredSpecRemoved(_))
    ));
}

#[tokio::test]
async fn test_close_discards_buffered_records() {
    let payload = serde_json::to_string(&DesiredSpec::new("web", "apps", 1)).unwrap();
    let both = format!(
        "{}{}",
        record("desired_spec_created", 0, &payload),
        record("desired_spec_created", 1, &payload)
    );
    let mut reader = EventStreamReader::new(chunks(&[&both]));

    assert!(reader.next().await.is_ok());
    reader.close();

    assert!(matches!(reader.next().await, Err(StreamError::Closed)));
}
