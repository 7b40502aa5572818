/// Job buckets of the deferred sync queue. Every statement is idempotent so
/// the schema can be applied on every open.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pendingForms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    timestamp TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_pendingForms_timestamp ON pendingForms(timestamp);

CREATE TABLE IF NOT EXISTS pendingChatMessages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    timestamp TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_pendingChatMessages_timestamp ON pendingChatMessages(timestamp);

-- Jobs that reached the configured attempt limit
CREATE TABLE IF NOT EXISTS deadLetters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    timestamp TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_deadLetters_timestamp ON deadLetters(timestamp);
"#;
