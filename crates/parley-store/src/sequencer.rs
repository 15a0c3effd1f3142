use async_trait::async_trait;
use rusqlite::params;
use tracing::instrument;

use parley_core::errors::StoreError;
use parley_core::ids::{MessageId, SessionId, SpaceId};
use parley_core::store::Sequencer;

use crate::database::Database;
use crate::error::DbResultExt;

/// Per-session counters in `session_sequence`. Each allocation is a single
/// upsert, so concurrent callers never observe the same value.
pub struct SequenceRepo {
    db: Database,
}

impl SequenceRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Sequencer for SequenceRepo {
    fn next_message_id(&self) -> MessageId {
        MessageId::new()
    }

    #[instrument(skip(self), fields(space_id = %space_id, session_id = %session_id))]
    async fn next_sequence(&self, space_id: &SpaceId, session_id: &SessionId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "INSERT INTO session_sequence (space_id, session_id, value) VALUES (?1, ?2, 1)
                 ON CONFLICT (space_id, session_id) DO UPDATE SET value = value + 1
                 RETURNING value",
                params![space_id.as_str(), session_id.as_str()],
                |row| row.get(0),
            )
            .db()
        })
    }
}
