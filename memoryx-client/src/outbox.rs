//! The durable outbox: three SQLite-backed queues plus the bookkeeping
//! needed to compute `QueueStats` and drive the flush triggers.

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::{ClientError, Result};
use crate::types::{ConversationMessage, MemoryPayload, QueueStats, Role};

const ACTIVE_CONVERSATION_KEY: &str = "active_conversation_id";

/// A single queued memory write, as read back from `memory_queue`.
#[derive(Debug, Clone)]
pub struct QueuedMemory {
    /// Row id within `memory_queue`.
    pub local_id: i64,
    /// The memory payload to send.
    pub payload: MemoryPayload,
    /// Number of prior failed delivery attempts.
    pub retry_count: u32,
}

/// A single queued conversation message, as read back from `conversation_queue`.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Row id within `conversation_queue`.
    pub local_id: i64,
    /// Message content.
    pub message: ConversationMessage,
}

/// A conversation segment ready (or eligible) to be flushed: all rows
/// sharing one `conversation_id`, in insertion order.
#[derive(Debug, Clone)]
pub struct QueuedSegment {
    /// Client-assigned conversation segment id.
    pub conversation_id: String,
    /// Messages in insertion order.
    pub messages: Vec<QueuedMessage>,
    /// Highest retry count among the segment's rows.
    pub retry_count: u32,
}

fn now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// The embedded outbox store. Wraps a single SQLite connection behind a
/// mutex, mirroring the teacher's `Mutex<Connection>` manager pattern —
/// the outbox is low-contention (one client process, one flusher loop)
/// so a single connection is sufficient.
pub struct Outbox {
    conn: Mutex<Connection>,
}

impl Outbox {
    /// Opens (or creates) the outbox database at `path`.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(crate::db::open(path)?),
        })
    }

    /// Opens a purely in-memory outbox, for tests.
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(crate::db::open_in_memory()?),
        })
    }

    /// Enqueues a single memory write and returns its local id.
    pub fn enqueue_memory(&self, payload: &MemoryPayload) -> Result<i64> {
        let conn = self.conn.lock();
        let json = serde_json::to_string(payload)?;
        conn.execute(
            "INSERT INTO memory_queue (payload, retry_count, first_queued_at) VALUES (?1, 0, ?2)",
            params![json, now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Appends a message to the active conversation segment, returning its local id.
    pub fn enqueue_message(&self, conversation_id: &str, message: &ConversationMessage) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO conversation_queue
                (conversation_id, role, content, timestamp, tokens, sealed, retry_count, first_queued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6)",
            params![
                conversation_id,
                message.role.tag(),
                message.content,
                message.timestamp,
                message.tokens as i64,
                now()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Returns the currently active conversation segment id, creating one
    /// (a fresh UUID) if none has been set yet.
    pub fn active_conversation_id(&self) -> Result<String> {
        let conn = self.conn.lock();
        let existing: Option<String> = conn
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![ACTIVE_CONVERSATION_KEY],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)",
            params![ACTIVE_CONVERSATION_KEY, id],
        )?;
        Ok(id)
    }

    /// Seals the current conversation segment (its rows remain queued,
    /// untouched) and generates a fresh segment id to become active.
    pub fn start_new_conversation(&self) -> Result<String> {
        let current = self.active_conversation_id()?;
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE conversation_queue SET sealed = 1 WHERE conversation_id = ?1",
            params![current],
        )?;
        let new_id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "UPDATE config SET value = ?1 WHERE key = ?2",
            params![new_id, ACTIVE_CONVERSATION_KEY],
        )?;
        Ok(new_id)
    }

    /// Computes `QueueStats` over the active (unsealed) conversation segment.
    ///
    /// Round counting rule (spec.md §4.1): a round completes when an
    /// `assistant` message immediately follows a `user` message in
    /// insertion order; repeated same-role messages do not advance it.
    pub fn stats(&self) -> Result<QueueStats> {
        let conversation_id = self.active_conversation_id()?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT role, tokens, timestamp FROM conversation_queue
             WHERE conversation_id = ?1 AND sealed = 0 ORDER BY local_id ASC",
        )?;
        let rows = stmt
            .query_map(params![conversation_id], |row| {
                let role: String = row.get(0)?;
                let tokens: i64 = row.get(1)?;
                let timestamp: i64 = row.get(2)?;
                Ok((role, tokens as usize, timestamp))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let message_count = rows.len();
        let total_tokens: usize = rows.iter().map(|(_, t, _)| t).sum();
        let oldest_message_age = rows
            .first()
            .map(|(_, _, ts)| (now() - ts).max(0))
            .unwrap_or(0);

        let mut rounds = 0usize;
        for window in rows.windows(2) {
            if window[0].0 == "user" && window[1].0 == "assistant" {
                rounds += 1;
            }
        }

        Ok(QueueStats {
            message_count,
            rounds,
            total_tokens,
            oldest_message_age,
            conversation_id,
        })
    }

    /// Returns up to `limit` queued memory writes, oldest first.
    pub fn pending_memories(&self, limit: usize) -> Result<Vec<QueuedMemory>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT local_id, payload, retry_count FROM memory_queue ORDER BY local_id ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let local_id: i64 = row.get(0)?;
                let payload: String = row.get(1)?;
                let retry_count: i64 = row.get(2)?;
                Ok((local_id, payload, retry_count))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(local_id, payload, retry_count)| {
                Ok(QueuedMemory {
                    local_id,
                    payload: serde_json::from_str(&payload)?,
                    retry_count: retry_count as u32,
                })
            })
            .collect()
    }

    /// Returns every distinct conversation segment currently queued
    /// (sealed or active), in insertion order within each segment.
    pub fn pending_segments(&self) -> Result<Vec<QueuedSegment>> {
        let conn = self.conn.lock();
        let mut conv_stmt = conn.prepare(
            "SELECT DISTINCT conversation_id FROM conversation_queue ORDER BY conversation_id",
        )?;
        let conversation_ids = conv_stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(conv_stmt);

        let mut segments = Vec::with_capacity(conversation_ids.len());
        for conversation_id in conversation_ids {
            let mut stmt = conn.prepare(
                "SELECT local_id, role, content, timestamp, tokens, retry_count
                 FROM conversation_queue WHERE conversation_id = ?1 ORDER BY local_id ASC",
            )?;
            let mut retry_count = 0u32;
            let messages = stmt
                .query_map(params![conversation_id], |row| {
                    let local_id: i64 = row.get(0)?;
                    let role: String = row.get(1)?;
                    let content: String = row.get(2)?;
                    let timestamp: i64 = row.get(3)?;
                    let tokens: i64 = row.get(4)?;
                    let row_retry: i64 = row.get(5)?;
                    Ok((local_id, role, content, timestamp, tokens, row_retry))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?
                .into_iter()
                .map(|(local_id, role, content, timestamp, tokens, row_retry)| {
                    retry_count = retry_count.max(row_retry as u32);
                    QueuedMessage {
                        local_id,
                        message: ConversationMessage {
                            role: if role == "user" { Role::User } else { Role::Assistant },
                            content,
                            timestamp,
                            tokens: tokens as usize,
                        },
                    }
                })
                .collect();
            segments.push(QueuedSegment {
                conversation_id,
                messages,
                retry_count,
            });
        }
        Ok(segments)
    }

    /// Atomically removes the given memory rows after a successful flush.
    pub fn remove_memories(&self, ids: &[i64]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute("DELETE FROM memory_queue WHERE local_id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Atomically removes every row of a conversation segment after a
    /// successful flush.
    pub fn remove_segment(&self, conversation_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM conversation_queue WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        Ok(())
    }

    /// Records a failed delivery attempt for the given memory rows,
    /// moving any that now exceed `max_retry` into the dead letter.
    pub fn record_memory_failures(&self, ids: &[i64], max_retry: u32, error: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for id in ids {
            let row: Option<(String, i64, i64)> = tx
                .query_row(
                    "SELECT payload, retry_count, first_queued_at FROM memory_queue WHERE local_id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let Some((payload, retry_count, first_queued_at)) = row else {
                continue;
            };
            let new_retry = retry_count + 1;
            if new_retry as u32 > max_retry {
                tx.execute(
                    "INSERT INTO dead_letter_queue
                        (kind, original_payload, retry_count, last_error, first_queued_at, dead_lettered_at)
                     VALUES ('memory', ?1, ?2, ?3, ?4, ?5)",
                    params![payload, new_retry, error, first_queued_at, now()],
                )?;
                tx.execute("DELETE FROM memory_queue WHERE local_id = ?1", params![id])?;
            } else {
                tx.execute(
                    "UPDATE memory_queue SET retry_count = ?1, last_attempt_at = ?2 WHERE local_id = ?3",
                    params![new_retry, now(), id],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Records a failed delivery attempt for an entire conversation
    /// segment, dead-lettering it once its retry count exceeds `max_retry`.
    pub fn record_segment_failure(
        &self,
        conversation_id: &str,
        retry_count: u32,
        max_retry: u32,
        error: &str,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let new_retry = retry_count + 1;
        if new_retry > max_retry {
            let segment: Vec<(String, String, i64, i64, i64)> = {
                let mut stmt = tx.prepare(
                    "SELECT role, content, timestamp, tokens, first_queued_at
                     FROM conversation_queue WHERE conversation_id = ?1 ORDER BY local_id ASC",
                )?;
                stmt.query_map(params![conversation_id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?
            };
            let first_queued_at = segment.first().map(|(_, _, _, _, f)| *f).unwrap_or(now());
            let messages: Vec<ConversationMessage> = segment
                .into_iter()
                .map(|(role, content, timestamp, tokens, _)| ConversationMessage {
                    role: if role == "user" { Role::User } else { Role::Assistant },
                    content,
                    timestamp,
                    tokens: tokens as usize,
                })
                .collect();
            let payload = serde_json::to_string(&crate::types::ConversationFlushRequest {
                conversation_id: conversation_id.to_string(),
                messages,
            })?;
            tx.execute(
                "INSERT INTO dead_letter_queue
                    (kind, original_payload, retry_count, last_error, first_queued_at, dead_lettered_at)
                 VALUES ('conversation', ?1, ?2, ?3, ?4, ?5)",
                params![payload, new_retry, error, first_queued_at, now()],
            )?;
            tx.execute(
                "DELETE FROM conversation_queue WHERE conversation_id = ?1",
                params![conversation_id],
            )?;
        } else {
            tx.execute(
                "UPDATE conversation_queue SET retry_count = ?1, last_attempt_at = ?2 WHERE conversation_id = ?3",
                params![new_retry, now(), conversation_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Deletes dead-letter rows older than `max_age_days`.
    pub fn sweep_dead_letters(&self, max_age_days: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let cutoff = now() - max_age_days * 86_400;
        let affected = conn.execute(
            "DELETE FROM dead_letter_queue WHERE dead_lettered_at < ?1",
            params![cutoff],
        )?;
        Ok(affected)
    }

    /// Returns the number of rows currently in the dead letter queue.
    pub fn dead_letter_count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT count(*) FROM dead_letter_queue", [], |row| row.get(0))
            .map_err(ClientError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn msg(role: Role, tokens: usize) -> ConversationMessage {
        ConversationMessage {
            role,
            content: "hi".into(),
            timestamp: now(),
            tokens,
        }
    }

    #[test]
    fn round_counting_ignores_repeated_roles() {
        let outbox = Outbox::in_memory().unwrap();
        let conv = outbox.active_conversation_id().unwrap();
        outbox.enqueue_message(&conv, &msg(Role::User, 1)).unwrap();
        outbox.enqueue_message(&conv, &msg(Role::User, 1)).unwrap();
        outbox.enqueue_message(&conv, &msg(Role::Assistant, 1)).unwrap();
        let stats = outbox.stats().unwrap();
        assert_eq!(stats.message_count, 3);
        assert_eq!(stats.rounds, 1);
    }

    #[test]
    fn dead_letter_on_retry_after_max() {
        let outbox = Outbox::in_memory().unwrap();
        let id = outbox
            .enqueue_memory(&MemoryPayload {
                content: "x".into(),
                project_id: None,
                metadata: None,
            })
            .unwrap();
        // five failures at max_retry=5 keep it queued; the sixth dead-letters it.
        for _ in 0..5 {
            outbox.record_memory_failures(&[id], 5, "boom").unwrap();
        }
        assert_eq!(outbox.pending_memories(10).unwrap().len(), 1);
        outbox.record_memory_failures(&[id], 5, "boom").unwrap();
        assert_eq!(outbox.pending_memories(10).unwrap().len(), 0);
        assert_eq!(outbox.dead_letter_count().unwrap(), 1);
    }

    #[test]
    fn start_new_conversation_seals_without_deleting() {
        let outbox = Outbox::in_memory().unwrap();
        let first = outbox.active_conversation_id().unwrap();
        outbox.enqueue_message(&first, &msg(Role::User, 1)).unwrap();
        let second = outbox.start_new_conversation().unwrap();
        assert_ne!(first, second);
        let segments = outbox.pending_segments().unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].conversation_id, first);
    }

    /// Queued writes survive a process restart: reopening the same
    /// on-disk database must see exactly what was queued before exit,
    /// with retry counters untouched.
    #[test]
    fn queued_memories_survive_reopening_the_same_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.sqlite3");

        {
            let outbox = Outbox::open(&path).unwrap();
            for i in 0..3 {
                outbox
                    .enqueue_memory(&MemoryPayload {
                        content: format!("fact {i}"),
                        project_id: None,
                        metadata: None,
                    })
                    .unwrap();
            }
            assert_eq!(outbox.pending_memories(10).unwrap().len(), 3);
        }
        // `outbox` is dropped here, simulating the process exiting.

        let reopened = Outbox::open(&path).unwrap();
        let pending = reopened.pending_memories(10).unwrap();
        assert_eq!(pending.len(), 3);
        assert!(pending.iter().all(|m| m.retry_count == 0));

        let ids: Vec<i64> = pending.iter().map(|m| m.local_id).collect();
        reopened.remove_memories(&ids).unwrap();
        assert_eq!(reopened.pending_memories(10).unwrap().len(), 0);
    }
}
