//! Incremental decoders for the chat reply stream.
//!
//! DESIGN
//! ======
//! The chat endpoint answers either with raw text chunks or with a
//! server-sent-events body. Both decoders consume arbitrary byte chunks
//! and never assume a chunk boundary lines up with a character or a line:
//!
//! - `Utf8Decoder` holds back an incomplete multi-byte sequence until the
//!   next chunk completes it.
//! - `SseDecoder` buffers bytes until `\n`, then classifies the line.
//!   `data:` lines carry a fragment, `data: [DONE]` ends the stream, and
//!   everything else (comments, `event:`, `id:`, blank separators) is
//!   skipped.

#[cfg(test)]
#[path = "sse_test.rs"]
mod sse_test;

use super::api::StreamFormat;
use super::error::ApiError;

/// Payload value that marks the end of an event stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_FIELD: &[u8] = b"data:";

/// Longest event line buffered before the stream is rejected.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Decoded unit of a reply stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// Assistant text to append.
    Text(String),
    /// Terminal sentinel; nothing after it is read.
    Done,
}

// =============================================================================
// UTF-8
// =============================================================================

/// Streaming UTF-8 decoder. Invalid bytes become U+FFFD.
#[derive(Clone, Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + chunk` as forms complete characters.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut input = buf.as_slice();
        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, rest) = input.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        None => {
                            self.pending = rest.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush a dangling partial sequence at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

// =============================================================================
// SERVER-SENT EVENTS
// =============================================================================

/// Line-buffering SSE decoder.
#[derive(Clone, Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one chunk.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` once a line grows past
    /// [`MAX_LINE_BYTES`] without a terminator.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, ApiError> {
        let mut events = Vec::new();
        for &byte in chunk {
            if self.done {
                break;
            }
            if byte == b'\n' {
                let line = std::mem::take(&mut self.line);
                self.emit(&line, &mut events);
            } else if self.line.len() >= MAX_LINE_BYTES {
                self.line.clear();
                return Err(ApiError::malformed("/chat", format!("event line exceeds {MAX_LINE_BYTES} bytes")));
            } else {
                self.line.push(byte);
            }
        }
        Ok(events)
    }

    /// Classify an unterminated final line.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let line = std::mem::take(&mut self.line);
        if !self.done && !line.is_empty() {
            self.emit(&line, &mut events);
        }
        events
    }

    fn emit(&mut self, line: &[u8], events: &mut Vec<StreamEvent>) {
        match classify_line(line) {
            Some(StreamEvent::Done) => {
                self.done = true;
                events.push(StreamEvent::Done);
            }
            Some(event) => events.push(event),
            None => {}
        }
    }
}

fn classify_line(raw: &[u8]) -> Option<StreamEvent> {
    let line = raw.strip_suffix(b"\r").unwrap_or(raw);
    let payload = line.strip_prefix(DATA_FIELD)?;
    let payload = payload.strip_prefix(b" ").unwrap_or(payload);
    if payload.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(payload);
    if text == DONE_SENTINEL {
        return Some(StreamEvent::Done);
    }
    Some(StreamEvent::Text(text.into_owned()))
}

// =============================================================================
// FORMAT DISPATCH
// =============================================================================

/// Decoder selected by the response content type.
#[derive(Clone, Debug)]
pub enum StreamDecoder {
    Plain(Utf8Decoder),
    EventStream(SseDecoder),
}

impl StreamDecoder {
    #[must_use]
    pub fn new(format: StreamFormat) -> Self {
        match format {
            StreamFormat::Plain => Self::Plain(Utf8Decoder::new()),
            StreamFormat::EventStream => Self::EventStream(SseDecoder::new()),
        }
    }

    /// # Errors
    ///
    /// Propagates the event-stream line limit; plain text never fails.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, ApiError> {
        match self {
            Self::Plain(decoder) => Ok(text_event(decoder.decode(chunk))),
            Self::EventStream(decoder) => decoder.push(chunk),
        }
    }

    pub fn finish(&mut self) -> Vec<StreamEvent> {
        match self {
            Self::Plain(decoder) => text_event(decoder.finish()),
            Self::EventStream(decoder) => decoder.finish(),
        }
    }
}

fn text_event(text: String) -> Vec<StreamEvent> {
    if text.is_empty() { Vec::new() } else { vec![StreamEvent::Text(text)] }
}
