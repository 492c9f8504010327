//! Speech Pacing
//!
//! The conductor accumulates sanitized deltas in a [`SpeechBuffer`] and drains
//! the unspoken suffix on a timer. Each drain becomes one [`SpeechSegment`]
//! carrying the start/end framing the avatar driver needs:
//!
//! - `is_start` is set on the first segment of a turn only
//! - `is_end` is set on the final segment only, produced by [`SpeechBuffer::finish`]
//!
//! Text is never spoken twice and never skipped: concatenating every segment
//! of a turn yields exactly the text that was pushed.

use serde::{Deserialize, Serialize};

/// What to do at stream end when every byte has already been spoken
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndOfSpeechPolicy {
    /// Send an empty segment with `is_end = true` so the driver always sees
    /// an explicit end-of-speech marker
    #[default]
    ExplicitMarker,
    /// Send nothing; the following `interactive_idle` ends the speech
    StateTransitionOnly,
}

/// A chunk of text handed to the avatar driver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeechSegment {
    /// Text to speak (may be empty for a bare end marker)
    pub text: String,
    /// First segment of the turn
    pub is_start: bool,
    /// Last segment of the turn
    pub is_end: bool,
}

/// Per-turn accumulator of response text
#[derive(Clone, Debug)]
pub struct SpeechBuffer {
    /// Everything received so far this turn
    full_text: String,
    /// Byte offset of the first unspoken character
    flushed_len: usize,
    /// No segment has been emitted yet
    is_first_segment: bool,
    /// Final segment already emitted
    finished: bool,
}

impl Default for SpeechBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechBuffer {
    /// Create an empty buffer for a new turn
    #[must_use]
    pub fn new() -> Self {
        Self {
            full_text: String::new(),
            flushed_len: 0,
            is_first_segment: true,
            finished: false,
        }
    }

    /// Append a sanitized delta
    pub fn push(&mut self, delta: &str) {
        if self.finished {
            tracing::debug!(len = delta.len(), "Ignoring delta after final segment");
            return;
        }
        self.full_text.push_str(delta);
    }

    /// Full text received this turn
    #[must_use]
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// Text received but not yet spoken
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.full_text[self.flushed_len..]
    }

    /// Whether any segment has been emitted this turn
    #[must_use]
    pub fn has_started(&self) -> bool {
        !self.is_first_segment
    }

    /// Whether the final segment has been emitted
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drain the unspoken suffix as a mid-stream segment (`is_end = false`)
    ///
    /// Returns `None` when nothing new arrived since the last drain.
    pub fn take_pending(&mut self) -> Option<SpeechSegment> {
        if self.finished || self.flushed_len == self.full_text.len() {
            return None;
        }
        Some(self.drain(false))
    }

    /// Drain whatever remains as the final segment (`is_end = true`)
    ///
    /// When the remainder is empty the outcome depends on `policy`; a turn
    /// that never produced any text yields no segment at all.
    pub fn finish(&mut self, policy: EndOfSpeechPolicy) -> Option<SpeechSegment> {
        if self.finished {
            return None;
        }

        if self.flushed_len < self.full_text.len() {
            return Some(self.drain(true));
        }

        if !self.has_started() {
            self.finished = true;
            return None;
        }

        match policy {
            EndOfSpeechPolicy::ExplicitMarker => Some(self.drain(true)),
            EndOfSpeechPolicy::StateTransitionOnly => {
                self.finished = true;
                None
            }
        }
    }

    fn drain(&mut self, is_end: bool) -> SpeechSegment {
        let text = self.full_text[self.flushed_len..].to_string();
        let segment = SpeechSegment {
            text,
            is_start: self.is_first_segment,
            is_end,
        };
        self.flushed_len = self.full_text.len();
        self.is_first_segment = false;
        self.finished = is_end;
        segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn concat(segments: &[SpeechSegment]) -> String {
        segments.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn test_first_drain_is_start() {
        let mut buffer = SpeechBuffer::new();
        buffer.push("一加");
        let segment = buffer.take_pending().unwrap();
        assert_eq!(segment.text, "一加");
        assert!(segment.is_start);
        assert!(!segment.is_end);

        buffer.push("一");
        let segment = buffer.take_pending().unwrap();
        assert_eq!(segment.text, "一");
        assert!(!segment.is_start);
    }

    #[test]
    fn test_nothing_pending() {
        let mut buffer = SpeechBuffer::new();
        assert!(buffer.take_pending().is_none());
        buffer.push("好");
        buffer.take_pending();
        assert!(buffer.take_pending().is_none());
        assert_eq!(buffer.pending(), "");
    }

    #[test]
    fn test_finish_flushes_remainder_with_end() {
        let mut buffer = SpeechBuffer::new();
        buffer.push("一加一");
        let first = buffer.take_pending().unwrap();
        buffer.push("等于二");
        let last = buffer.finish(EndOfSpeechPolicy::ExplicitMarker).unwrap();

        assert_eq!(last.text, "等于二");
        assert!(!last.is_start);
        assert!(last.is_end);
        assert_eq!(concat(&[first, last]), "一加一等于二");
        assert!(buffer.is_finished());
    }

    #[test]
    fn test_single_segment_turn_is_start_and_end() {
        let mut buffer = SpeechBuffer::new();
        buffer.push("好的");
        let only = buffer.finish(EndOfSpeechPolicy::ExplicitMarker).unwrap();
        assert!(only.is_start);
        assert!(only.is_end);
        assert_eq!(only.text, "好的");
    }

    #[test]
    fn test_empty_remainder_explicit_marker() {
        let mut buffer = SpeechBuffer::new();
        buffer.push("全部");
        buffer.take_pending();
        let marker = buffer.finish(EndOfSpeechPolicy::ExplicitMarker).unwrap();
        assert_eq!(marker.text, "");
        assert!(!marker.is_start);
        assert!(marker.is_end);
    }

    #[test]
    fn test_empty_remainder_state_transition_only() {
        let mut buffer = SpeechBuffer::new();
        buffer.push("全部");
        buffer.take_pending();
        assert!(buffer.finish(EndOfSpeechPolicy::StateTransitionOnly).is_none());
        assert!(buffer.is_finished());
    }

    #[test]
    fn test_empty_turn_yields_nothing() {
        let mut buffer = SpeechBuffer::new();
        assert!(buffer.finish(EndOfSpeechPolicy::ExplicitMarker).is_none());
        assert!(!buffer.has_started());
    }

    #[test]
    fn test_finish_is_terminal() {
        let mut buffer = SpeechBuffer::new();
        buffer.push("完");
        buffer.finish(EndOfSpeechPolicy::ExplicitMarker);
        buffer.push("迟到");
        assert!(buffer.take_pending().is_none());
        assert!(buffer.finish(EndOfSpeechPolicy::ExplicitMarker).is_none());
        assert_eq!(buffer.full_text(), "完");
    }

    #[test]
    fn test_interleaved_drains_preserve_text() {
        let deltas = ["一", "加", "一", "等于二", "。"];
        let mut buffer = SpeechBuffer::new();
        let mut segments = Vec::new();

        for (i, delta) in deltas.iter().enumerate() {
            buffer.push(delta);
            if i % 2 == 0 {
                segments.extend(buffer.take_pending());
            }
        }
        segments.extend(buffer.finish(EndOfSpeechPolicy::ExplicitMarker));

        assert_eq!(concat(&segments), "一加一等于二。");
        assert_eq!(segments.iter().filter(|s| s.is_start).count(), 1);
        assert_eq!(segments.iter().filter(|s| s.is_end).count(), 1);
        assert!(segments.last().unwrap().is_end);
        assert!(segments.first().unwrap().is_start);
    }
}
