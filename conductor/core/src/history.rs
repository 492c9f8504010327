//! Conversation History
//!
//! A bounded trailing window of prior turns that is replayed into every new
//! completion request. The conductor appends exactly one user/assistant pair
//! when a turn completes; nothing else mutates the window except [`clear`].
//!
//! [`clear`]: ConversationHistory::clear

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of entries kept in the window
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Who produced a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// The learner
    User,
    /// The avatar's model
    Assistant,
}

impl TurnRole {
    /// Role name used on the wire
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry in the history window
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    role: TurnRole,
    text: String,
    created_at: DateTime<Utc>,
}

impl ConversationTurn {
    /// Create a turn
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    /// Create a user turn
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, text)
    }

    /// Create an assistant turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, text)
    }

    /// Who produced this turn
    #[must_use]
    pub fn role(&self) -> TurnRole {
        self.role
    }

    /// Plain text of the turn (images are never stored)
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// When the turn was recorded
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// FIFO window of conversation turns
#[derive(Clone, Debug)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl ConversationHistory {
    /// Create an empty window holding at most `max_turns` entries (0 = unlimited)
    #[must_use]
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns,
        }
    }

    /// Append a single turn, evicting from the front if over capacity
    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        self.prune_if_needed();
    }

    /// Append a completed user/assistant exchange
    pub fn append_exchange(&mut self, user_text: impl Into<String>, assistant_text: impl Into<String>) {
        self.turns.push_back(ConversationTurn::user(user_text));
        self.turns.push_back(ConversationTurn::assistant(assistant_text));
        self.prune_if_needed();
    }

    /// Drop every turn
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Ordered copy of the window, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    /// Number of stored turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the window is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Configured capacity (0 = unlimited)
    #[must_use]
    pub fn limit(&self) -> usize {
        self.max_turns
    }

    fn prune_if_needed(&mut self) {
        if self.max_turns == 0 || self.turns.len() <= self.max_turns {
            return;
        }

        let to_remove = self.turns.len() - self.max_turns;
        self.turns.drain(..to_remove);

        tracing::debug!(
            removed = to_remove,
            remaining = self.turns.len(),
            "Pruned conversation history"
        );
    }
}
