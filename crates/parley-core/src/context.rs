use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, SessionId};
use crate::messages::{ChatMessage, PromptEntry};

/// Exactly what one turn sends to the language model. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptContext {
    pub session_id: SessionId,
    /// The message this turn answers.
    pub anchor_id: MessageId,
    pub base_prompt: String,
    pub entries: Vec<PromptEntry>,
    /// Whether the answered message already appears in `entries`.
    pub includes_anchor: bool,
}

impl PromptContext {
    /// Entries for the outbound request. The answered message is appended
    /// with its live text when history did not already carry it.
    pub fn outbound(&self, candidate: &ChatMessage) -> Vec<PromptEntry> {
        let mut entries = self.entries.clone();
        if !self.includes_anchor {
            entries.push(PromptEntry::new(candidate.role, candidate.message.clone()));
        }
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
