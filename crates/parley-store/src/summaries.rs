use async_trait::async_trait;
use rusqlite::params;
use tracing::instrument;

use parley_core::errors::StoreError;
use parley_core::ids::{MessageId, SessionId, SummaryId};
use parley_core::messages::ChatSummary;
use parley_core::store::SummaryStore;

use crate::database::Database;
use crate::error::DbResultExt;
use crate::row_helpers;

/// Append-only summary rows. Nothing here updates or deletes.
pub struct SummaryRepo {
    db: Database,
}

impl SummaryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Every summary of a session, oldest first.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list(&self, session_id: &SessionId) -> Result<Vec<ChatSummary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, session_id, anchor_id, content, created_at
                     FROM chat_summary WHERE session_id = ?1 ORDER BY id ASC",
                )
                .db()?;
            let mut rows = stmt.query([session_id.as_str()]).db()?;
            let mut results = Vec::new();
            while let Some(row) = rows.next().db()? {
                results.push(row_to_summary(row)?);
            }
            Ok(results)
        })
    }
}

#[async_trait]
impl SummaryStore for SummaryRepo {
    #[instrument(skip(self, summary), fields(session_id = %summary.session_id, anchor_id = %summary.anchor_id))]
    async fn create_summary(&self, summary: &ChatSummary) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_summary (id, session_id, anchor_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    summary.id.as_str(),
                    summary.session_id.as_str(),
                    summary.anchor_id.as_str(),
                    summary.content,
                    summary.created_at,
                ],
            )
            .db()?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    async fn latest_summary(&self, session_id: &SessionId) -> Result<Option<ChatSummary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, session_id, anchor_id, content, created_at
                     FROM chat_summary WHERE session_id = ?1 ORDER BY id DESC LIMIT 1",
                )
                .db()?;
            let mut rows = stmt.query([session_id.as_str()]).db()?;
            match rows.next().db()? {
                Some(row) => row_to_summary(row).map(Some),
                None => Ok(None),
            }
        })
    }
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> Result<ChatSummary, StoreError> {
    const T: &str = "chat_summary";
    Ok(ChatSummary {
        id: SummaryId::from_raw(row_helpers::get::<String>(row, 0, T, "id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 1, T, "session_id")?),
        anchor_id: MessageId::from_raw(row_helpers::get::<String>(row, 2, T, "anchor_id")?),
        content: row_helpers::get(row, 3, T, "content")?,
        created_at: row_helpers::get(row, 4, T, "created_at")?,
    })
}
