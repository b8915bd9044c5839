//! Server-Sent Events wire parser.
//!
//! A stream adapter that assembles `text/event-stream` bytes into events.
//! Hand-rolled rather than pulled from a crate: the protocol only consumes
//! the `event` and `data` fields, reconnection is handled a level above, and
//! direct control keeps quirks easy to deal with.
//!
//! Handles `\n` and `\r\n` line endings, lines split across chunks,
//! multi-line `data:` accumulation, and comment / unknown-field skipping.
//! `id:` and `retry:` lines are skipped with the unknown fields. A final
//! event left unterminated at end of stream is still delivered.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

/// One assembled event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// The `event:` field, when the server named the event.
    pub event: Option<String>,
    /// All `data:` lines of the event, joined with `\n`.
    pub data: String,
}

/// Assembles [`SseEvent`]s from a stream of body bytes.
pub struct SseEventStream<S> {
    inner: S,
    buffer: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<String>,
    eof: bool,
    saw_bytes: bool,
}

impl<S> SseEventStream<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            event: None,
            data_lines: Vec::new(),
            eof: false,
            saw_bytes: false,
        }
    }

    /// Whether the underlying stream has delivered any bytes yet.
    ///
    /// Distinguishes a body that closed without a single byte from one that
    /// carried data but no complete event.
    #[must_use]
    pub fn saw_bytes(&self) -> bool {
        self.saw_bytes
    }

    fn has_pending(&self) -> bool {
        self.event.is_some() || !self.data_lines.is_empty()
    }

    fn take_event(&mut self) -> SseEvent {
        SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data_lines).join("\n"),
        }
    }

    /// Feed one decoded line; a blank line completes the pending event.
    fn accept_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.has_pending() {
                return Some(self.take_event());
            }
            return None;
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            _ => {}
        }
        None
    }

    /// Pop the next complete line out of the byte buffer.
    fn next_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

impl<S, E> Stream for SseEventStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<SseEvent, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            while let Some(line) = this.next_line() {
                if let Some(event) = this.accept_line(&line) {
                    return Poll::Ready(Some(Ok(event)));
                }
            }

            if this.eof {
                if !this.buffer.is_empty() {
                    // Trailing line without a newline.
                    let rest = std::mem::take(&mut this.buffer);
                    let line = String::from_utf8_lossy(&rest).into_owned();
                    if let Some(event) = this.accept_line(&line) {
                        return Poll::Ready(Some(Ok(event)));
                    }
                }
                if this.has_pending() {
                    return Poll::Ready(Some(Ok(this.take_event())));
                }
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    if !bytes.is_empty() {
                        this.saw_bytes = true;
                    }
                    this.buffer.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => this.eof = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
