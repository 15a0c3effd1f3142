//! Turn-lifecycle notifications and the publish-only channel that carries them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::NotifyError;
use crate::ids::{MessageId, SessionId};
use crate::messages::{MessageKind, MessageMeta, Progress};

/// Notification channel key. Derived only from the session id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    pub fn for_session(session_id: &SessionId) -> Self {
        Self(format!("im/{session_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content update for one assistant message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub message_id: MessageId,
    pub session_id: SessionId,
    /// Increment for `generating`, full replacement for `intercepted`,
    /// otherwise terminal text (possibly empty).
    pub message: String,
    /// Characters already delivered before `message`.
    pub start_at: usize,
    pub progress: Progress,
    pub kind: MessageKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum TurnEvent {
    AssistantInit(MessageMeta),
    AssistantContinue(StreamMessage),
    AssistantDone(StreamMessage),
    AssistantFailed(StreamMessage),
}

impl TurnEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AssistantInit(_) => "assistant_init",
            Self::AssistantContinue(_) => "assistant_continue",
            Self::AssistantDone(_) => "assistant_done",
            Self::AssistantFailed(_) => "assistant_failed",
        }
    }

    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::AssistantInit(meta) => &meta.message_id,
            Self::AssistantContinue(m) | Self::AssistantDone(m) | Self::AssistantFailed(m) => {
                &m.message_id
            }
        }
    }

    pub fn progress(&self) -> Progress {
        match self {
            Self::AssistantInit(meta) => meta.progress,
            Self::AssistantContinue(m) | Self::AssistantDone(m) | Self::AssistantFailed(m) => {
                m.progress
            }
        }
    }
}

/// Publish-only broadcast to live clients. Delivery is at-least-once and
/// nobody listening is not an error.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: &Topic, event: &TurnEvent) -> Result<(), NotifyError>;
}
