use async_trait::async_trait;
use rusqlite::params;
use tracing::instrument;

use parley_core::errors::StoreError;
use parley_core::ids::{ExtId, MessageId, SessionId, SpaceId, UserId};
use parley_core::messages::{ChatMessage, MessageExt, Progress};
use parley_core::store::{MessageStore, Paging};

use crate::database::Database;
use crate::error::DbResultExt;
use crate::row_helpers;

const MESSAGE_COLUMNS: &str = "id, space_id, session_id, user_id, role, message, kind, progress,
     sequence, block, created_at";

const INSERT_MESSAGE: &str = "INSERT INTO chat_message
     (id, space_id, session_id, user_id, role, message, kind, progress, sequence, block, created_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The ext record attached to `message_id`, if any.
    #[instrument(skip(self), fields(msg_id = %message_id))]
    pub fn get_ext(&self, message_id: &MessageId) -> Result<Option<MessageExt>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, message_id, session_id, space_id, rel_docs, evaluate,
                            evaluate_enabled, created_at
                     FROM chat_message_ext WHERE message_id = ?1",
                )
                .db()?;
            let mut rows = stmt.query([message_id.as_str()]).db()?;
            match rows.next().db()? {
                Some(row) => row_to_ext(row).map(Some),
                None => Ok(None),
            }
        })
    }

    fn update(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
        id: &MessageId,
    ) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| conn.execute(sql, params).db())?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("message {id}")));
        }
        Ok(())
    }
}

fn insert_message(conn: &rusqlite::Connection, m: &ChatMessage) -> Result<(), StoreError> {
    conn.execute(
        INSERT_MESSAGE,
        params![
            m.id.as_str(),
            m.space_id.as_str(),
            m.session_id.as_str(),
            m.user_id.as_str(),
            m.role.as_str(),
            m.message,
            m.kind.as_str(),
            m.progress.as_str(),
            m.sequence,
            m.block,
            m.created_at,
        ],
    )
    .db()?;
    Ok(())
}

#[async_trait]
impl MessageStore for MessageRepo {
    #[instrument(skip(self, message), fields(msg_id = %message.id, session_id = %message.session_id))]
    async fn create(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.db.with_conn(|conn| insert_message(conn, message))
    }

    #[instrument(skip(self, message, ext), fields(msg_id = %message.id, session_id = %message.session_id))]
    async fn create_with_ext(&self, message: &ChatMessage, ext: &MessageExt) -> Result<(), StoreError> {
        let rel_docs = serde_json::to_string(&ext.rel_docs)?;
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction().db()?;
            insert_message(&tx, message)?;
            tx.execute(
                "INSERT INTO chat_message_ext
                 (id, message_id, session_id, space_id, rel_docs, evaluate, evaluate_enabled, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    ext.id.as_str(),
                    message.id.as_str(),
                    ext.session_id.as_str(),
                    ext.space_id.as_str(),
                    rel_docs,
                    ext.evaluate.as_str(),
                    ext.evaluate_enabled,
                    ext.created_at,
                ],
            )
            .db()?;
            tx.commit().db()
        })
    }

    #[instrument(skip(self, text), fields(msg_id = %id, progress = %progress, len = text.len()))]
    async fn append(&self, id: &MessageId, text: &str, progress: Progress) -> Result<(), StoreError> {
        self.update(
            "UPDATE chat_message SET message = message || ?1, progress = ?2 WHERE id = ?3",
            &[&text, &progress.as_str(), &id.as_str()],
            id,
        )
    }

    #[instrument(skip(self, text), fields(msg_id = %id, progress = %progress))]
    async fn rewrite(&self, id: &MessageId, text: &str, progress: Progress) -> Result<(), StoreError> {
        self.update(
            "UPDATE chat_message SET message = ?1, progress = ?2 WHERE id = ?3",
            &[&text, &progress.as_str(), &id.as_str()],
            id,
        )
    }

    #[instrument(skip(self), fields(msg_id = %id, progress = %progress))]
    async fn update_progress(&self, id: &MessageId, progress: Progress) -> Result<(), StoreError> {
        self.update(
            "UPDATE chat_message SET progress = ?1 WHERE id = ?2",
            &[&progress.as_str(), &id.as_str()],
            id,
        )
    }

    #[instrument(skip(self), fields(msg_id = %id))]
    async fn delete(&self, id: &MessageId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM chat_message WHERE id = ?1", [id.as_str()]).db()?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(msg_id = %id))]
    async fn get(&self, id: &MessageId) -> Result<Option<ChatMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM chat_message WHERE id = ?1");
            let mut stmt = conn.prepare(&sql).db()?;
            let mut rows = stmt.query([id.as_str()]).db()?;
            match rows.next().db()? {
                Some(row) => row_to_message(row).map(Some),
                None => Ok(None),
            }
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id, after = ?after.map(MessageId::as_str)))]
    async fn list_session_messages(
        &self,
        session_id: &SessionId,
        after: Option<&MessageId>,
        paging: Paging,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        // LIMIT -1 is unbounded in SQLite.
        let (limit, offset) = match paging.limit_offset() {
            Some((limit, offset)) => (i64::from(limit), i64::from(offset)),
            None => (-1, 0),
        };
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM chat_message
                 WHERE session_id = ?1 AND (?2 IS NULL OR id > ?2)
                 ORDER BY id ASC LIMIT ?3 OFFSET ?4"
            );
            let mut stmt = conn.prepare(&sql).db()?;
            let mut rows = stmt
                .query(params![session_id.as_str(), after.map(MessageId::as_str), limit, offset])
                .db()?;
            let mut results = Vec::new();
            while let Some(row) = rows.next().db()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    async fn latest_message(&self, session_id: &SessionId) -> Result<Option<ChatMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM chat_message
                 WHERE session_id = ?1 ORDER BY id DESC LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql).db()?;
            let mut rows = stmt.query([session_id.as_str()]).db()?;
            match rows.next().db()? {
                Some(row) => row_to_message(row).map(Some),
                None => Ok(None),
            }
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<ChatMessage, StoreError> {
    const T: &str = "chat_message";
    let role: String = row_helpers::get(row, 4, T, "role")?;
    let kind: String = row_helpers::get(row, 6, T, "kind")?;
    let progress: String = row_helpers::get(row, 7, T, "progress")?;

    Ok(ChatMessage {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, T, "id")?),
        space_id: SpaceId::from_raw(row_helpers::get::<String>(row, 1, T, "space_id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 2, T, "session_id")?),
        user_id: UserId::from_raw(row_helpers::get::<String>(row, 3, T, "user_id")?),
        role: row_helpers::parse_enum(&role, T, "role")?,
        message: row_helpers::get(row, 5, T, "message")?,
        kind: row_helpers::parse_enum(&kind, T, "kind")?,
        progress: row_helpers::parse_enum(&progress, T, "progress")?,
        sequence: row_helpers::get(row, 8, T, "sequence")?,
        block: row_helpers::get(row, 9, T, "block")?,
        created_at: row_helpers::get(row, 10, T, "created_at")?,
    })
}

fn row_to_ext(row: &rusqlite::Row<'_>) -> Result<MessageExt, StoreError> {
    const T: &str = "chat_message_ext";
    let rel_docs: String = row_helpers::get(row, 4, T, "rel_docs")?;
    let evaluate: String = row_helpers::get(row, 5, T, "evaluate")?;

    Ok(MessageExt {
        id: ExtId::from_raw(row_helpers::get::<String>(row, 0, T, "id")?),
        message_id: Some(MessageId::from_raw(row_helpers::get::<String>(row, 1, T, "message_id")?)),
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 2, T, "session_id")?),
        space_id: SpaceId::from_raw(row_helpers::get::<String>(row, 3, T, "space_id")?),
        rel_docs: row_helpers::parse_json(&rel_docs, T, "rel_docs")?,
        evaluate: row_helpers::parse_enum(&evaluate, T, "evaluate")?,
        evaluate_enabled: row_helpers::get(row, 6, T, "evaluate_enabled")?,
        created_at: row_helpers::get(row, 7, T, "created_at")?,
    })
}
