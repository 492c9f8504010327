//! Completion Stream Framing
//!
//! The upstream answers with server-sent events: one `data: <json>` line per
//! delta and a final `data: [DONE]`. Network reads split lines at arbitrary
//! byte offsets (including inside a multi-byte character), so the decoder
//! keeps the partial line as raw bytes and only decodes complete lines.
//!
//! Lines that are not `data:` lines, or whose payload does not parse, are
//! skipped.

use std::fmt;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::traits::{BackendCapabilities, StreamEvent};
use crate::error::ConductorError;
use crate::sanitize::sanitize;

/// Payload that marks the end of a completion stream
const DONE_MARKER: &str = "[DONE]";

/// One decoded stream line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// JSON payload of a `data:` line
    Data(String),
    /// `data: [DONE]`
    Done,
}

/// Splits a byte stream into [`Frame`]s
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline
    scanned: usize,
}

impl FrameDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read; returns every frame completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = self.pending[search_from..].iter().position(|b| *b == b'\n') {
            let end = search_from + offset;
            if let Some(frame) = parse_line(&self.pending[start..end]) {
                frames.push(frame);
            }
            start = end + 1;
            search_from = start;
        }

        self.pending.drain(..start);
        self.scanned = self.pending.len();
        frames
    }

    /// Decode a trailing line that arrived without a newline
    pub fn finish(&mut self) -> Option<Frame> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        self.scanned = 0;
        parse_line(&line)
    }

    /// Bytes held back waiting for a newline
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

fn parse_line(raw: &[u8]) -> Option<Frame> {
    let line = String::from_utf8_lossy(raw);
    let data = line.trim_end_matches('\r').strip_prefix("data:")?.trim();

    if data.is_empty() {
        None
    } else if data == DONE_MARKER {
        Some(Frame::Done)
    } else {
        Some(Frame::Data(data.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

/// Raw (unsanitized) text carried by one frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delta {
    /// Reasoning sub-stream
    Reasoning(String),
    /// Answer text
    Content(String),
}

/// Extract the delta from a `data:` payload
///
/// A non-empty `reasoning_content` wins over `content` within the same
/// frame. Returns `None` for malformed JSON or frames without text.
#[must_use]
pub fn parse_delta(data: &str) -> Option<Delta> {
    let payload: ChunkPayload = match serde_json::from_str(data) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::trace!(error = %e, "Skipping malformed stream frame");
            return None;
        }
    };

    let delta = payload.choices.into_iter().next()?.delta?;
    match (delta.reasoning_content, delta.content) {
        (Some(reasoning), _) if !reasoning.is_empty() => Some(Delta::Reasoning(reasoning)),
        (_, Some(content)) if !content.is_empty() => Some(Delta::Content(content)),
        _ => None,
    }
}

/// Turns frames into sanitized [`StreamEvent`]s and keeps the running totals
#[derive(Debug)]
pub struct DeltaAccumulator {
    capabilities: BackendCapabilities,
    reasoning: String,
    content: String,
}

impl DeltaAccumulator {
    /// Create an accumulator for a backend with the given capabilities
    #[must_use]
    pub fn new(capabilities: BackendCapabilities) -> Self {
        Self {
            capabilities,
            reasoning: String::new(),
            content: String::new(),
        }
    }

    /// Apply one `data:` payload
    pub fn apply(&mut self, data: &str) -> Option<StreamEvent> {
        match parse_delta(data)? {
            Delta::Reasoning(raw) => {
                if !self.capabilities.supports_reasoning {
                    tracing::debug!("Dropping reasoning delta from backend without reasoning");
                    return None;
                }
                let text = sanitize(&raw);
                if text.is_empty() {
                    return None;
                }
                self.reasoning.push_str(&text);
                Some(StreamEvent::Reasoning(text))
            }
            Delta::Content(raw) => {
                let text = sanitize(&raw);
                if text.is_empty() {
                    return None;
                }
                self.content.push_str(&text);
                Some(StreamEvent::Content(text))
            }
        }
    }

    /// Answer text so far
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Final event carrying both totals
    #[must_use]
    pub fn into_done(self) -> StreamEvent {
        StreamEvent::Done {
            reasoning: self.reasoning,
            content: self.content,
        }
    }
}

/// Read a byte stream to completion, forwarding events to `tx`
///
/// Ends with exactly one `Done` (at `[DONE]` or end of stream) or one
/// `Error`. When `idle_timeout` is set, a gap between reads longer than the
/// limit ends the stream with [`ConductorError::StreamTimeout`]. Stops early
/// if the receiver is dropped.
pub async fn pump_stream<S, B, E>(
    mut stream: S,
    mut accumulator: DeltaAccumulator,
    idle_timeout: Option<Duration>,
    tx: mpsc::Sender<StreamEvent>,
) where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let mut decoder = FrameDecoder::new();

    loop {
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!(timeout = ?limit, "Completion stream stalled");
                    let _ = tx
                        .send(StreamEvent::Error(ConductorError::StreamTimeout(limit)))
                        .await;
                    return;
                }
            },
            None => stream.next().await,
        };

        let (frames, at_end) = match next {
            Some(Ok(chunk)) => (decoder.feed(chunk.as_ref()), false),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Completion stream read failed");
                let _ = tx
                    .send(StreamEvent::Error(ConductorError::Transport(e.to_string())))
                    .await;
                return;
            }
            None => (decoder.finish().into_iter().collect(), true),
        };

        for frame in frames {
            match frame {
                Frame::Done => {
                    let _ = tx.send(accumulator.into_done()).await;
                    return;
                }
                Frame::Data(data) => {
                    if let Some(event) = accumulator.apply(&data) {
                        if tx.send(event).await.is_err() {
                            tracing::debug!("Stream receiver dropped");
                            return;
                        }
                    }
                }
            }
        }

        if at_end {
            tracing::debug!(
                content_len = accumulator.content().len(),
                "Completion stream ended without completion marker"
            );
            let _ = tx.send(accumulator.into_done()).await;
            return;
        }
    }
}
