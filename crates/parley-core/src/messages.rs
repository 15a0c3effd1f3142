use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ids::{ExtId, MessageId, SessionId, SpaceId, SummaryId, UserId};

/// Closed enums below are stored as their snake_case names; `FromStr` is the
/// inverse used when reading rows back.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

text_enum!(Role {
    User => "user",
    Assistant => "assistant",
    System => "system",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
}

text_enum!(MessageKind {
    Text => "text",
});

/// Lifecycle of a message's content.
///
/// `Uncomplete → Generating → {Complete | Intercepted | Failed | Canceled}`.
/// `Intercepted` is reported to clients as a finished state but the row may
/// still be rewritten or completed afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    Uncomplete,
    Generating,
    Complete,
    Intercepted,
    Failed,
    Canceled,
    RequestTimeout,
}

text_enum!(Progress {
    Uncomplete => "uncomplete",
    Generating => "generating",
    Complete => "complete",
    Intercepted => "intercepted",
    Failed => "failed",
    Canceled => "canceled",
    RequestTimeout => "request_timeout",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evaluate {
    #[default]
    None,
    Like,
    Dislike,
}

text_enum!(Evaluate {
    None => "none",
    Like => "like",
    Dislike => "dislike",
});

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub space_id: SpaceId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub role: Role,
    pub message: String,
    pub kind: MessageKind,
    pub progress: Progress,
    pub sequence: i64,
    /// Groups a user message with the assistant answer(s) it produced.
    pub block: i64,
    pub created_at: String,
}

impl ChatMessage {
    /// A completed user message, as the caller persists it before a turn runs.
    pub fn user_text(
        id: MessageId,
        space_id: SpaceId,
        session_id: SessionId,
        user_id: UserId,
        sequence: i64,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id,
            space_id,
            session_id,
            user_id,
            role: Role::User,
            message: text.into(),
            kind: MessageKind::Text,
            progress: Progress::Complete,
            sequence,
            block: sequence,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    /// Empty assistant message created before any content has streamed.
    pub fn assistant_placeholder(question: &ChatMessage, id: MessageId, sequence: i64) -> Self {
        Self {
            id,
            space_id: question.space_id.clone(),
            session_id: question.session_id.clone(),
            user_id: question.user_id.clone(),
            role: Role::Assistant,
            message: String::new(),
            kind: MessageKind::Text,
            progress: Progress::Uncomplete,
            sequence,
            block: question.block,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn meta(&self) -> MessageMeta {
        MessageMeta {
            message_id: self.id.clone(),
            sequence: self.sequence,
            created_at: self.created_at.clone(),
            role: self.role,
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            space_id: self.space_id.clone(),
            progress: self.progress,
            kind: self.kind,
        }
    }
}

/// Message metadata without content, as published when a turn starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub message_id: MessageId,
    pub sequence: i64,
    pub created_at: String,
    pub role: Role,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub space_id: SpaceId,
    pub progress: Progress,
    pub kind: MessageKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: SummaryId,
    pub session_id: SessionId,
    /// Newest message this summary accounts for.
    pub anchor_id: MessageId,
    pub content: String,
    pub created_at: String,
}

impl ChatSummary {
    pub fn new(session_id: SessionId, anchor_id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id: SummaryId::new(),
            session_id,
            anchor_id,
            content: content.into(),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Side record stored alongside an assistant answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageExt {
    pub id: ExtId,
    /// Filled in when the owning message is created.
    pub message_id: Option<MessageId>,
    pub session_id: SessionId,
    pub space_id: SpaceId,
    pub rel_docs: Vec<String>,
    pub evaluate: Evaluate,
    pub evaluate_enabled: bool,
    pub created_at: String,
}

impl MessageExt {
    pub fn new(session_id: SessionId, space_id: SpaceId) -> Self {
        Self {
            id: ExtId::new(),
            message_id: None,
            session_id,
            space_id,
            rel_docs: Vec::new(),
            evaluate: Evaluate::None,
            evaluate_enabled: true,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_rel_docs(mut self, docs: Vec<String>) -> Self {
        self.rel_docs = docs;
        self
    }
}

/// One role-tagged entry of the prompt sent to the language model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptEntry {
    pub role: Role,
    pub content: String,
}

impl PromptEntry {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}
