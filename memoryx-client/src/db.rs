//! Embedded SQLite schema for the client-side outbox.
//!
//! One file per install (spec.md §6, "Client persistent state"). Three
//! queue tables plus a small key-value `config` table used to persist the
//! active conversation segment id across process restarts.

use rusqlite::Connection;

use crate::errors::Result;

/// Opens (creating if absent) the outbox database and ensures its schema exists.
pub fn open(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Opens an in-memory database, used by tests and by callers that want a
/// purely ephemeral outbox (rare, since it defeats the point of C1).
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS config (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memory_queue (
            local_id        INTEGER PRIMARY KEY AUTOINCREMENT,
            payload         TEXT NOT NULL,
            retry_count     INTEGER NOT NULL DEFAULT 0,
            first_queued_at INTEGER NOT NULL,
            last_attempt_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS conversation_queue (
            local_id        INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT NOT NULL,
            role            TEXT NOT NULL,
            content         TEXT NOT NULL,
            timestamp       INTEGER NOT NULL,
            tokens          INTEGER NOT NULL,
            sealed          INTEGER NOT NULL DEFAULT 0,
            retry_count     INTEGER NOT NULL DEFAULT 0,
            first_queued_at INTEGER NOT NULL,
            last_attempt_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_conversation_queue_conv
            ON conversation_queue(conversation_id, local_id);

        CREATE TABLE IF NOT EXISTS dead_letter_queue (
            local_id         INTEGER PRIMARY KEY AUTOINCREMENT,
            kind             TEXT NOT NULL,
            original_payload TEXT NOT NULL,
            retry_count      INTEGER NOT NULL,
            last_error       TEXT NOT NULL,
            first_queued_at  INTEGER NOT NULL,
            dead_lettered_at INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}
