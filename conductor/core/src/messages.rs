//! Conductor Messages
//!
//! Types that cross the conductor boundary: what callers hand in
//! ([`UserInput`], [`KnowledgePoint`], [`Widget`]) and what the conductor
//! reports back ([`TurnEvent`] on the event channel, [`TurnOutcome`] as the
//! return value of a turn).
//!
//! Every event carries the [`TurnId`] of the turn that produced it, so a
//! consumer can tell a late event of a cancelled turn from the current one.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConductorError;

/// Identifier of one dialogue turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub Uuid);

impl TurnId {
    /// Generate a new unique turn ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn_{}", self.0.simple())
    }
}

/// Where the conductor is within a turn
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    /// No turn in flight
    #[default]
    Idle,
    /// Avatar told to listen
    Listening,
    /// Avatar told to think; stream opening
    Thinking,
    /// Stream open, speech being paced out
    Responding,
    /// Stream done, final segment and bookkeeping
    Finalizing,
}

/// Progress reports for one turn
#[derive(Clone, Debug)]
pub enum TurnEvent {
    /// Avatar entered the listening state
    Listening {
        /// Turn that produced this event
        turn_id: TurnId,
    },
    /// Avatar entered the thinking state
    Thinking {
        /// Turn that produced this event
        turn_id: TurnId,
    },
    /// Reasoning fragment (never spoken)
    Reasoning {
        /// Turn that produced this event
        turn_id: TurnId,
        /// Sanitized fragment
        delta: String,
    },
    /// Answer fragment
    Responding {
        /// Turn that produced this event
        turn_id: TurnId,
        /// Sanitized fragment
        delta: String,
    },
    /// Turn completed
    Done {
        /// Turn that produced this event
        turn_id: TurnId,
        /// Full sanitized answer
        content: String,
        /// Full sanitized reasoning (empty for backends without it)
        reasoning: String,
    },
    /// Turn failed; reported once
    Error {
        /// Turn that produced this event
        turn_id: TurnId,
        /// What went wrong
        error: ConductorError,
    },
}

impl TurnEvent {
    /// Turn that produced this event
    #[must_use]
    pub fn turn_id(&self) -> TurnId {
        match self {
            Self::Listening { turn_id }
            | Self::Thinking { turn_id }
            | Self::Reasoning { turn_id, .. }
            | Self::Responding { turn_id, .. }
            | Self::Done { turn_id, .. }
            | Self::Error { turn_id, .. } => *turn_id,
        }
    }

    /// Whether this is the last event of its turn
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// How a call to `handle_user_input` ended
#[derive(Clone, Debug)]
pub enum TurnOutcome {
    /// The answer was spoken and recorded
    Completed {
        /// Turn identifier
        turn_id: TurnId,
        /// Full sanitized answer
        content: String,
    },
    /// Another turn was in flight; nothing happened
    Busy,
    /// The turn was cancelled before it finished
    Cancelled {
        /// Turn identifier
        turn_id: TurnId,
    },
    /// The turn failed after it started; an `Error` event was emitted
    Failed {
        /// Turn identifier
        turn_id: TurnId,
        /// What went wrong
        error: ConductorError,
    },
}

impl TurnOutcome {
    /// Answer text if the turn completed
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Completed { content, .. } => Some(content),
            _ => None,
        }
    }

    /// Whether the turn completed
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// A learner's question
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInput {
    /// Question text
    pub text: String,
    /// Optional image (URL or data URI); forces the vision backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl UserInput {
    /// Text-only input
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image_url: None,
        }
    }

    /// Attach an image
    #[must_use]
    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }
}

/// A curriculum entry the avatar can be asked to explain
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgePoint {
    /// Name of the concept
    pub name: String,
    /// Definition
    #[serde(default)]
    pub definition: Option<String>,
    /// Formula
    #[serde(default)]
    pub formula: Option<String>,
    /// Extra explanation
    #[serde(default)]
    pub explanation: Option<String>,
}

impl KnowledgePoint {
    /// Question asked on the learner's behalf
    #[must_use]
    pub fn question(&self) -> String {
        let mut question = format!("请帮我讲解一下{}", self.name);

        if let Some(definition) = non_empty(self.definition.as_deref()) {
            question.push_str("，定义是：");
            question.push_str(definition);
        }
        if let Some(formula) = non_empty(self.formula.as_deref()) {
            question.push_str("，公式是：");
            question.push_str(formula);
        }
        if let Some(explanation) = non_empty(self.explanation.as_deref()) {
            question.push('，');
            question.push_str(explanation);
        }

        question
    }
}

fn non_empty(field: Option<&str>) -> Option<&str> {
    field.filter(|s| !s.trim().is_empty())
}

/// Widget shown alongside speech
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    /// Widget type understood by the renderer
    #[serde(rename = "type")]
    pub widget_type: String,
    /// Widget payload
    pub data: serde_json::Value,
}

impl Widget {
    /// Create a widget
    pub fn new(widget_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            widget_type: widget_type.into(),
            data,
        }
    }
}
