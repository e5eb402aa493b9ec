//! SQL schema for the SQLite knowledge store.

/// Idempotent DDL run on every open. Deleting a document removes its facts
/// and tag links; deleting a tag removes only its links.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS documents (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    checksum    TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tags (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS document_tags (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id  INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    tag_id       INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    UNIQUE (document_id, tag_id)
);

-- embedding: little-endian f32; embedding_q: u8 codes, value = code * q_scale + q_offset
CREATE TABLE IF NOT EXISTS document_information_chunks (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id  INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    chunk        TEXT NOT NULL,
    embedding    BLOB NOT NULL,
    embedding_q  BLOB NOT NULL,
    q_scale      REAL NOT NULL,
    q_offset     REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS index_meta (
    key    TEXT PRIMARY KEY,
    value  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS chunks_document_idx   ON document_information_chunks(document_id);
CREATE INDEX IF NOT EXISTS documents_checksum_idx ON documents(checksum);
CREATE INDEX IF NOT EXISTS document_tags_tag_idx  ON document_tags(tag_id);

PRAGMA user_version = 1;
";
