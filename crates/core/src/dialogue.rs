//! Dialogue history
//!
//! Bounded list of conversation turns shared between the state machine
//! and the LLM client. Oldest turns are evicted on overflow.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::System => "system",
        }
    }
}

/// Ordered, bounded conversation history.
#[derive(Debug, Clone)]
pub struct DialogueContext {
    turns: VecDeque<(TurnRole, String)>,
    max_history: usize,
}

impl DialogueContext {
    pub fn new(max_history: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_history),
            max_history: max_history.max(1),
        }
    }

    /// Append a turn, evicting the oldest when full.
    pub fn push(&mut self, role: TurnRole, text: impl Into<String>) {
        if self.turns.len() >= self.max_history {
            self.turns.pop_front();
        }
        self.turns.push_back((role, text.into()));
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn turns(&self) -> impl Iterator<Item = &(TurnRole, String)> {
        self.turns.iter()
    }

    /// Most recent user turn, if any.
    pub fn last_user_turn(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|(role, _)| *role == TurnRole::User)
            .map(|(_, text)| text.as_str())
    }
}
