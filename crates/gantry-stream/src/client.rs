//! Event stream client
//!
//! [`SseParser`] turns arbitrary byte chunks into SSE frames;
//! [`EventStreamReader`] pulls chunks from an HTTP body and decodes frames
//! into hub events.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use gantry_core::Event;
use reqwest::header::ACCEPT;
use tracing::debug;

use crate::error::{Result, StreamError};

/// Longest line accepted before the stream is treated as malformed.
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// One dispatched SSE record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field, if present
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
    /// `id:` field, if present
    pub id: Option<String>,
}

/// Incremental SSE line parser.
///
/// Accepts `\n` and `\r\n` line endings. Comment lines and unknown fields
/// are skipped; a record without data is discarded.
#[derive(Debug)]
pub struct SseParser {
    buffer: Vec<u8>,
    pending: SseFrame,
    has_data: bool,
    max_line: usize,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_LEN)
    }
}

impl SseParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser rejecting lines longer than `max_line` bytes.
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            pending: SseFrame::default(),
            has_data: false,
            max_line,
        }
    }

    /// Feed a chunk, returning every record it completes.
    ///
    /// Fails with [`StreamError::LineTooLong`] once a line grows past the
    /// limit, whether or not its end has arrived.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            if end > self.max_line {
                return Err(self.overflow());
            }
            let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.line(&line) {
                frames.push(frame);
            }
        }
        if self.buffer.len() > self.max_line {
            return Err(self.overflow());
        }
        Ok(frames)
    }

    fn overflow(&mut self) -> StreamError {
        self.buffer.clear();
        self.pending = SseFrame::default();
        self.has_data = false;
        StreamError::LineTooLong {
            limit: self.max_line,
        }
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.pending.event = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.pending.data.push('\n');
                }
                self.pending.data.push_str(value);
                self.has_data = true;
            }
            "id" => self.pending.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let frame = std::mem::take(&mut self.pending);
        std::mem::replace(&mut self.has_data, false).then_some(frame)
    }
}

/// Boxed HTTP body as returned by [`connect`].
pub type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Decodes hub events from an SSE byte stream.
pub struct EventStreamReader<S> {
    body: Option<S>,
    parser: SseParser,
    ready: VecDeque<SseFrame>,
}

impl<S, B> EventStreamReader<S>
where
    S: Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    /// Read events from `body`.
    pub fn new(body: S) -> Self {
        Self::with_parser(body, SseParser::new())
    }

    /// Read events from `body` through a configured parser.
    pub fn with_parser(body: S, parser: SseParser) -> Self {
        Self {
            body: Some(body),
            parser,
            ready: VecDeque::new(),
        }
    }

    /// Wait for the next raw record.
    pub async fn next_frame(&mut self) -> Result<SseFrame> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(frame);
            }
            let Some(body) = self.body.as_mut() else {
                return Err(StreamError::Closed);
            };
            match body.next().await {
                Some(Ok(chunk)) => match self.parser.push(chunk.as_ref()) {
                    Ok(frames) => self.ready.extend(frames),
                    Err(e) => {
                        self.body = None;
                        return Err(e);
                    }
                },
                Some(Err(e)) => {
                    self.body = None;
                    return Err(StreamError::Transport(e));
                }
                None => {
                    self.body = None;
                    return Err(StreamError::Closed);
                }
            }
        }
    }

    /// Wait for the next event.
    ///
    /// A record that fails to decode is reported but does not end the
    /// stream. Transport failures, oversized lines and end of body do.
    pub async fn next(&mut self) -> Result<Event> {
        let frame = self.next_frame().await?;
        let tag = frame.event.as_deref().unwrap_or("message");
        Ok(Event::decode(tag, &frame.data)?)
    }

    /// Drop the underlying body. Later reads report [`StreamError::Closed`].
    pub fn close(&mut self) {
        self.body = None;
        self.ready.clear();
    }

    /// Whether the body has ended or been closed.
    pub fn is_closed(&self) -> bool {
        self.body.is_none() && self.ready.is_empty()
    }
}

/// Open the event stream at `url`.
pub async fn connect(
    client: &reqwest::Client,
    url: &str,
) -> Result<EventStreamReader<ByteStream>> {
    let response = client
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(StreamError::Status(status.as_u16()));
    }
    debug!(url, "Event stream connected");

    let body: ByteStream = Box::pin(response.bytes_stream());
    Ok(EventStreamReader::new(body))
}

#[cfg(test)]
mod tests;
