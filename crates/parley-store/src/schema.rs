/// SQL DDL for the parley store.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS chat_message (
    id TEXT PRIMARY KEY,
    space_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    kind TEXT NOT NULL DEFAULT 'text',
    progress TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    block INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (session_id, sequence)
);

CREATE TABLE IF NOT EXISTS chat_message_ext (
    id TEXT PRIMARY KEY,
    message_id TEXT NOT NULL UNIQUE REFERENCES chat_message(id) ON DELETE CASCADE,
    session_id TEXT NOT NULL,
    space_id TEXT NOT NULL,
    rel_docs TEXT NOT NULL DEFAULT '[]',
    evaluate TEXT NOT NULL DEFAULT 'none',
    evaluate_enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_summary (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    anchor_id TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session_sequence (
    space_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    value INTEGER NOT NULL,
    PRIMARY KEY (space_id, session_id)
);

CREATE INDEX IF NOT EXISTS idx_message_session_id ON chat_message(session_id, id);
CREATE INDEX IF NOT EXISTS idx_summary_session_id ON chat_summary(session_id, id);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
