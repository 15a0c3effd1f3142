//! Contracts for the durable store and the sequencer.
//!
//! Implementations must keep per-session sequence numbers strictly
//! increasing and never hand the same number out twice, even when the turn
//! that took it later fails.

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::ids::{MessageId, SessionId, SpaceId};
use crate::messages::{ChatMessage, ChatSummary, MessageExt, Progress};

/// Page selection for history reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Paging {
    #[default]
    All,
    /// 1-based page number.
    Page { page: u32, size: u32 },
}

impl Paging {
    /// `(limit, offset)` for SQL-style stores; `None` means unbounded.
    pub fn limit_offset(&self) -> Option<(u32, u32)> {
        match self {
            Self::All => None,
            Self::Page { page, size } => Some((*size, page.saturating_sub(1) * size)),
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// Insert `message` and its ext record atomically: both rows are written
    /// or neither is.
    async fn create_with_ext(
        &self,
        message: &ChatMessage,
        ext: &MessageExt,
    ) -> Result<(), StoreError>;

    /// Append `text` to the stored content and set `progress`.
    async fn append(
        &self,
        id: &MessageId,
        text: &str,
        progress: Progress,
    ) -> Result<(), StoreError>;

    /// Replace the stored content with `text` and set `progress`.
    async fn rewrite(
        &self,
        id: &MessageId,
        text: &str,
        progress: Progress,
    ) -> Result<(), StoreError>;

    async fn update_progress(&self, id: &MessageId, progress: Progress) -> Result<(), StoreError>;

    async fn delete(&self, id: &MessageId) -> Result<(), StoreError>;

    async fn get(&self, id: &MessageId) -> Result<Option<ChatMessage>, StoreError>;

    /// Messages of a session with id strictly greater than `after`, ascending
    /// by id.
    async fn list_session_messages(
        &self,
        session_id: &SessionId,
        after: Option<&MessageId>,
        paging: Paging,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    async fn latest_message(&self, session_id: &SessionId)
        -> Result<Option<ChatMessage>, StoreError>;
}

#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn create_summary(&self, summary: &ChatSummary) -> Result<(), StoreError>;

    /// The newest summary of a session, if any. Older ones are kept but never
    /// read for context building.
    async fn latest_summary(&self, session_id: &SessionId)
        -> Result<Option<ChatSummary>, StoreError>;
}

#[async_trait]
pub trait Sequencer: Send + Sync {
    /// Globally unique, approximately time-ordered message id.
    fn next_message_id(&self) -> MessageId;

    /// Next per-session sequence number. Allocated atomically.
    async fn next_sequence(
        &self,
        space_id: &SpaceId,
        session_id: &SessionId,
    ) -> Result<i64, StoreError>;
}
