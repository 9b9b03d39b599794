//! Incremental parser for the chat endpoint's streamed response.
//!
//! The server streams a single JSON array whose elements arrive one by one:
//!
//! ```text
//! [{
//!   "timestamp": "...",
//!   "systemMessage": { "text": { "parts": ["..."] } }
//! }
//! ,
//! {
//!   ...
//! }
//! ]
//! ```
//!
//! Elements are cut out of the byte buffer by brace matching (string and
//! escape aware), so chunk boundaries may fall anywhere, including inside a
//! multi-byte UTF-8 sequence.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};

use crate::error::{BunsekiError, Result};
use crate::types::ChatMessage;

/// Byte buffer that yields complete top-level array elements.
#[derive(Debug, Default)]
pub struct JsonArrayBuffer {
    buffer: Vec<u8>,
    scan: ObjectScan,
}

/// Progress through the object at the front of the buffer, kept between
/// pushes so each byte is examined once.
#[derive(Debug, Default)]
struct ObjectScan {
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl JsonArrayBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// True when only array punctuation / whitespace remains.
    pub fn is_drained(&self) -> bool {
        self.buffer
            .iter()
            .all(|b| b.is_ascii_whitespace() || matches!(b, b'[' | b']' | b','))
    }

    /// Extract the next complete element, if one is fully buffered.
    pub fn next_element(&mut self) -> Option<Result<Vec<u8>>> {
        if self.scan.pos == 0 {
            let start = self
                .buffer
                .iter()
                .position(|b| !(b.is_ascii_whitespace() || matches!(b, b'[' | b']' | b',')))?;
            self.buffer.drain(..start);

            if self.buffer[0] != b'{' {
                let preview =
                    String::from_utf8_lossy(&self.buffer[..self.buffer.len().min(40)]).into_owned();
                self.buffer.clear();
                return Some(Err(BunsekiError::Parse(format!(
                    "unexpected data in chat stream: {}",
                    preview
                ))));
            }
        }

        let end = self.find_object_end()?;
        let element: Vec<u8> = self.buffer.drain(..=end).collect();
        self.scan = ObjectScan::default();
        Some(Ok(element))
    }

    /// Index of the brace closing the object that starts at `buffer[0]`,
    /// resuming where the previous call stopped.
    fn find_object_end(&mut self) -> Option<usize> {
        let scan = &mut self.scan;
        while scan.pos < self.buffer.len() {
            let i = scan.pos;
            let b = self.buffer[i];
            scan.pos += 1;

            if scan.in_string {
                if scan.escaped {
                    scan.escaped = false;
                } else if b == b'\\' {
                    scan.escaped = true;
                } else if b == b'"' {
                    scan.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => scan.in_string = true,
                b'{' | b'[' => scan.depth += 1,
                b'}' | b']' => {
                    scan.depth = scan.depth.saturating_sub(1);
                    if scan.depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Adapts a byte stream into a stream of decoded [`ChatMessage`]s.
pub struct ChatMessageStream<S> {
    inner: S,
    buffer: JsonArrayBuffer,
    finished: bool,
}

impl<S> ChatMessageStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: JsonArrayBuffer::new(),
            finished: false,
        }
    }

    fn try_decode(&mut self) -> Option<Result<ChatMessage>> {
        match self.buffer.next_element()? {
            Ok(bytes) => Some(serde_json::from_slice::<ChatMessage>(&bytes).map_err(|e| {
                tracing::debug!(error = %e, "failed to decode chat stream element");
                BunsekiError::Parse(e.to_string())
            })),
            Err(e) => Some(Err(e)),
        }
    }
}

impl<S, E> Stream for ChatMessageStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: Into<BunsekiError>,
{
    type Item = Result<ChatMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.try_decode() {
                return Poll::Ready(Some(item));
            }
            if self.finished {
                if self.buffer.is_drained() {
                    return Poll::Ready(None);
                }
                self.buffer = JsonArrayBuffer::new();
                return Poll::Ready(Some(Err(BunsekiError::Parse(
                    "chat stream ended mid-element".to_string(),
                ))));
            }

            match self.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.buffer.push(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(e.into())));
                }
                Poll::Ready(None) => self.finished = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
