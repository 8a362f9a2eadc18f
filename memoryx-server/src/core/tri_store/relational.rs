//! SQLite-backed [`RelationalStore`], the authoritative store for
//! memories, ingestion tasks and API keys.
//!
//! Grounded on the same embedded-store idiom as the client's outbox
//! (`memoryx-client/src/db.rs` / `outbox.rs`): a single connection behind
//! a `parking_lot::Mutex`, WAL journaling, schema created on open.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use super::traits::RelationalStore;
use crate::core::auth::{AgentRegistration, ApiKeyVerifier};
use crate::models::memory::{IngestionTask, Memory, TaskStatus};
use crate::models::owner::Owner;

pub struct SqliteRelationalStore {
    conn: Mutex<Connection>,
}

impl SqliteRelationalStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                content TEXT NOT NULL,
                category TEXT,
                source_conversation_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                version INTEGER NOT NULL,
                deleted_at TEXT,
                metadata TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memories_owner ON memories(user_id, project_id);

            CREATE TABLE IF NOT EXISTS ingestion_tasks (
                task_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                segment_id TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                extracted_count INTEGER NOT NULL DEFAULT 0,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_ingestion_tasks_segment
                ON ingestion_tasks(user_id, project_id, segment_id);

            CREATE TABLE IF NOT EXISTS api_keys (
                api_key TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                project_id TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS daily_search_counts (
                user_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                day TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, project_id, day)
            );

            CREATE TABLE IF NOT EXISTS agents (
                agent_id TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL UNIQUE,
                agent_type TEXT NOT NULL,
                agent_name TEXT NOT NULL,
                platform TEXT NOT NULL,
                platform_version TEXT NOT NULL,
                user_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                api_key TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
        let id: String = row.get("id")?;
        let user_id: String = row.get("user_id")?;
        let project_id: String = row.get("project_id")?;
        let source: Option<String> = row.get("source_conversation_id")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        let deleted_at: Option<String> = row.get("deleted_at")?;
        let metadata: String = row.get("metadata")?;

        Ok(Memory {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            owner: Owner::new(user_id, project_id),
            content: row.get("content")?,
            category: row.get("category")?,
            embedding: None,
            source_conversation_id: source.and_then(|s| Uuid::parse_str(&s).ok()),
            created_at: parse_rfc3339(&created_at),
            updated_at: parse_rfc3339(&updated_at),
            version: row.get::<_, i64>("version")? as u32,
            deleted_at: deleted_at.map(|d| parse_rfc3339(&d)),
            metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        })
    }
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

#[async_trait]
impl RelationalStore for SqliteRelationalStore {
    async fn insert_memory(&self, memory: &Memory) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO memories
                (id, user_id, project_id, content, category, source_conversation_id, created_at, updated_at, version, deleted_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                memory.id.to_string(),
                memory.owner.user_id,
                memory.owner.project_id,
                memory.content,
                memory.category,
                memory.source_conversation_id.map(|u| u.to_string()),
                memory.created_at.to_rfc3339(),
                memory.updated_at.to_rfc3339(),
                memory.version,
                memory.deleted_at.map(|d| d.to_rfc3339()),
                serde_json::to_string(&memory.metadata)?,
            ],
        )?;
        Ok(())
    }

    async fn update_memory(&self, memory: &Memory) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE memories
             SET content = ?1, category = ?2, updated_at = ?3, version = ?4, deleted_at = ?5, metadata = ?6
             WHERE id = ?7 AND user_id = ?8 AND project_id = ?9",
            params![
                memory.content,
                memory.category,
                memory.updated_at.to_rfc3339(),
                memory.version,
                memory.deleted_at.map(|d| d.to_rfc3339()),
                serde_json::to_string(&memory.metadata)?,
                memory.id.to_string(),
                memory.owner.user_id,
                memory.owner.project_id,
            ],
        )?;
        Ok(())
    }

    async fn get_memory(&self, owner: &Owner, id: Uuid) -> Result<Option<Memory>> {
        let conn = self.conn.lock();
        let memory = conn
            .query_row(
                "SELECT * FROM memories WHERE id = ?1 AND user_id = ?2 AND project_id = ?3 AND deleted_at IS NULL",
                params![id.to_string(), owner.user_id, owner.project_id],
                Self::row_to_memory,
            )
            .optional()?;
        Ok(memory)
    }

    /// Tombstones the row rather than deleting it (spec.md §4.3 DELETE
    /// step 1), so the drift sweep and audit trails still see it.
    async fn delete_memory(&self, owner: &Owner, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE memories SET deleted_at = ?1
             WHERE id = ?2 AND user_id = ?3 AND project_id = ?4 AND deleted_at IS NULL",
            params![Utc::now().to_rfc3339(), id.to_string(), owner.user_id, owner.project_id],
        )?;
        Ok(affected > 0)
    }

    async fn list_memories(&self, owner: &Owner, limit: usize, offset: usize) -> Result<Vec<Memory>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM memories WHERE user_id = ?1 AND project_id = ?2 AND deleted_at IS NULL
             ORDER BY updated_at DESC LIMIT ?3 OFFSET ?4",
        )?;
        let rows = stmt.query_map(
            params![owner.user_id, owner.project_id, limit as i64, offset as i64],
            Self::row_to_memory,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn count_memories(&self, owner: &Owner) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE user_id = ?1 AND project_id = ?2 AND deleted_at IS NULL",
            params![owner.user_id, owner.project_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    async fn insert_task(&self, task: &IngestionTask) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ingestion_tasks
                (task_id, user_id, project_id, segment_id, status, created_at, updated_at, extracted_count, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                task.task_id.to_string(),
                task.owner.user_id,
                task.owner.project_id,
                task.segment_id,
                status_str(task.status),
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
                task.extracted_count as i64,
                task.error,
            ],
        )?;
        Ok(())
    }

    async fn update_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        extracted_count: usize,
        error: Option<String>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE ingestion_tasks
             SET status = ?1, extracted_count = ?2, error = ?3, updated_at = ?4
             WHERE task_id = ?5",
            params![
                status_str(status),
                extracted_count as i64,
                error,
                Utc::now().to_rfc3339(),
                task_id.to_string(),
            ],
        )?;
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<IngestionTask>> {
        let conn = self.conn.lock();
        let task = conn
            .query_row(
                "SELECT * FROM ingestion_tasks WHERE task_id = ?1",
                params![task_id.to_string()],
                |row| {
                    let status: String = row.get("status")?;
                    let created_at: String = row.get("created_at")?;
                    let updated_at: String = row.get("updated_at")?;
                    Ok(IngestionTask {
                        task_id,
                        owner: Owner::new(
                            row.get::<_, String>("user_id")?,
                            row.get::<_, String>("project_id")?,
                        ),
                        segment_id: row.get("segment_id")?,
                        status: parse_status(&status),
                        created_at: parse_rfc3339(&created_at),
                        updated_at: parse_rfc3339(&updated_at),
                        extracted_count: row.get::<_, i64>("extracted_count")? as usize,
                        error: row.get("error")?,
                    })
                },
            )
            .optional()?;
        Ok(task)
    }

    async fn find_recent_task_by_segment(&self, owner: &Owner, segment_id: &str) -> Result<Option<IngestionTask>> {
        let conn = self.conn.lock();
        let task = conn
            .query_row(
                "SELECT * FROM ingestion_tasks
                 WHERE user_id = ?1 AND project_id = ?2 AND segment_id = ?3
                 ORDER BY created_at DESC LIMIT 1",
                params![owner.user_id, owner.project_id, segment_id],
                |row| {
                    let task_id: String = row.get("task_id")?;
                    let status: String = row.get("status")?;
                    let created_at: String = row.get("created_at")?;
                    let updated_at: String = row.get("updated_at")?;
                    Ok(IngestionTask {
                        task_id: Uuid::parse_str(&task_id).unwrap_or_default(),
                        owner: Owner::new(
                            row.get::<_, String>("user_id")?,
                            row.get::<_, String>("project_id")?,
                        ),
                        segment_id: row.get("segment_id")?,
                        status: parse_status(&status),
                        created_at: parse_rfc3339(&created_at),
                        updated_at: parse_rfc3339(&updated_at),
                        extracted_count: row.get::<_, i64>("extracted_count")? as usize,
                        error: row.get("error")?,
                    })
                },
            )
            .optional()?;

        Ok(task.filter(|t| Utc::now().signed_duration_since(t.created_at) < chrono::Duration::hours(24)))
    }

    async fn resolve_api_key(&self, api_key: &str) -> Result<Option<Owner>> {
        let conn = self.conn.lock();
        let owner = conn
            .query_row(
                "SELECT user_id, project_id FROM api_keys WHERE api_key = ?1",
                params![api_key],
                |row| Ok(Owner::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(owner)
    }

    async fn register_agent(
        &self,
        fingerprint: &str,
        agent_type: &str,
        agent_name: &str,
        platform: &str,
        platform_version: &str,
    ) -> Result<AgentRegistration> {
        let conn = self.conn.lock();

        let existing = conn
            .query_row(
                "SELECT agent_id, api_key, user_id, project_id FROM agents WHERE fingerprint = ?1",
                params![fingerprint],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        if let Some((agent_id, api_key, user_id, project_id)) = existing {
            return Ok(AgentRegistration {
                agent_id: Uuid::parse_str(&agent_id).unwrap_or_default(),
                api_key,
                owner: Owner::new(user_id, project_id),
            });
        }

        let agent_id = Uuid::new_v4();
        let api_key = Uuid::new_v4().to_string();
        let owner = Owner::new(fingerprint.to_string(), agent_type.to_string());

        conn.execute(
            "INSERT INTO agents
                (agent_id, fingerprint, agent_type, agent_name, platform, platform_version, user_id, project_id, api_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                agent_id.to_string(),
                fingerprint,
                agent_type,
                agent_name,
                platform,
                platform_version,
                owner.user_id,
                owner.project_id,
                api_key,
                Utc::now().to_rfc3339(),
            ],
        )?;
        conn.execute(
            "INSERT INTO api_keys (api_key, user_id, project_id) VALUES (?1, ?2, ?3)",
            params![api_key, owner.user_id, owner.project_id],
        )?;

        Ok(AgentRegistration { agent_id, api_key, owner })
    }

    async fn increment_and_get_daily_searches(&self, owner: &Owner) -> Result<u32> {
        let conn = self.conn.lock();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        conn.execute(
            "INSERT INTO daily_search_counts (user_id, project_id, day, count)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(user_id, project_id, day) DO UPDATE SET count = count + 1",
            params![owner.user_id, owner.project_id, today],
        )?;
        let count: i64 = conn.query_row(
            "SELECT count FROM daily_search_counts WHERE user_id = ?1 AND project_id = ?2 AND day = ?3",
            params![owner.user_id, owner.project_id, today],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    async fn decrement_daily_searches(&self, owner: &Owner) -> Result<()> {
        let conn = self.conn.lock();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        conn.execute(
            "UPDATE daily_search_counts SET count = MAX(count - 1, 0)
             WHERE user_id = ?1 AND project_id = ?2 AND day = ?3",
            params![owner.user_id, owner.project_id, today],
        )?;
        Ok(())
    }

    async fn get_daily_searches(&self, owner: &Owner) -> Result<u32> {
        let conn = self.conn.lock();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let count: Option<i64> = conn
            .query_row(
                "SELECT count FROM daily_search_counts WHERE user_id = ?1 AND project_id = ?2 AND day = ?3",
                params![owner.user_id, owner.project_id, today],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0) as u32)
    }

    async fn list_owners(&self) -> Result<Vec<Owner>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT user_id, project_id FROM memories")?;
        let owners = stmt
            .query_map([], |row| {
                Ok(Owner::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(owners)
    }
}

#[async_trait]
impl ApiKeyVerifier for SqliteRelationalStore {
    async fn resolve(&self, api_key: &str) -> Option<Owner> {
        RelationalStore::resolve_api_key(self, api_key).await.ok().flatten()
    }
}

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Processing => "processing",
        TaskStatus::Completed => "completed",
        TaskStatus::PartiallyCompleted => "partially_completed",
        TaskStatus::Failed => "failed",
    }
}

fn parse_status(s: &str) -> TaskStatus {
    match s {
        "processing" => TaskStatus::Processing,
        "completed" => TaskStatus::Completed,
        "partially_completed" => TaskStatus::PartiallyCompleted,
        "failed" => TaskStatus::Failed,
        _ => TaskStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_memory(owner: &Owner) -> Memory {
        Memory {
            id: Uuid::new_v4(),
            owner: owner.clone(),
            content: "likes dark roast coffee".into(),
            category: None,
            embedding: None,
            source_conversation_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
            deleted_at: None,
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = SqliteRelationalStore::open_in_memory().unwrap();
        let owner = Owner::new("u1", "p1");
        let memory = sample_memory(&owner);
        store.insert_memory(&memory).await.unwrap();

        let fetched = store.get_memory(&owner, memory.id).await.unwrap().unwrap();
        assert_eq!(fetched.content, memory.content);
        assert_eq!(fetched.version, 1);
    }

    #[tokio::test]
    async fn delete_is_scoped_to_owner() {
        let store = SqliteRelationalStore::open_in_memory().unwrap();
        let owner_a = Owner::new("u1", "p1");
        let owner_b = Owner::new("u2", "p1");
        let memory = sample_memory(&owner_a);
        store.insert_memory(&memory).await.unwrap();

        let deleted = store.delete_memory(&owner_b, memory.id).await.unwrap();
        assert!(!deleted);
        assert!(store.get_memory(&owner_a, memory.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_tombstones_rather_than_removing_the_row() {
        let store = SqliteRelationalStore::open_in_memory().unwrap();
        let owner = Owner::new("u1", "p1");
        let memory = sample_memory(&owner);
        store.insert_memory(&memory).await.unwrap();

        assert!(store.delete_memory(&owner, memory.id).await.unwrap());
        assert!(store.get_memory(&owner, memory.id).await.unwrap().is_none());

        let count: i64 = store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM memories WHERE id = ?1", params![memory.id.to_string()], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1, "tombstoned row must still exist for drift-sweep/audit purposes");

        assert!(!store.delete_memory(&owner, memory.id).await.unwrap(), "deleting an already-tombstoned row is a no-op");
    }

    #[tokio::test]
    async fn daily_search_counter_increments_per_owner() {
        let store = SqliteRelationalStore::open_in_memory().unwrap();
        let owner = Owner::new("u1", "p1");
        assert_eq!(store.increment_and_get_daily_searches(&owner).await.unwrap(), 1);
        assert_eq!(store.increment_and_get_daily_searches(&owner).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn resubmitted_segment_id_resolves_to_the_original_task() {
        let store = SqliteRelationalStore::open_in_memory().unwrap();
        let owner = Owner::new("u1", "p1");
        let task = IngestionTask {
            task_id: Uuid::new_v4(),
            owner: owner.clone(),
            segment_id: Some("seg-1".into()),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            extracted_count: 0,
            error: None,
        };
        store.insert_task(&task).await.unwrap();

        let found = store.find_recent_task_by_segment(&owner, "seg-1").await.unwrap().unwrap();
        assert_eq!(found.task_id, task.task_id);

        let other_owner = Owner::new("u2", "p1");
        assert!(store.find_recent_task_by_segment(&other_owner, "seg-1").await.unwrap().is_none());
        assert!(store.find_recent_task_by_segment(&owner, "seg-unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn registering_the_same_fingerprint_twice_replays_the_same_key() {
        let store = SqliteRelationalStore::open_in_memory().unwrap();

        let first = store
            .register_agent("fp-1", "cli", "my-agent", "linux", "6.1")
            .await
            .unwrap();
        let second = store
            .register_agent("fp-1", "cli", "my-agent", "linux", "6.1")
            .await
            .unwrap();

        assert_eq!(first.agent_id, second.agent_id);
        assert_eq!(first.api_key, second.api_key);
        assert_eq!(first.owner, second.owner);

        let resolved = store.resolve_api_key(&first.api_key).await.unwrap().unwrap();
        assert_eq!(resolved, first.owner);
    }

    #[tokio::test]
    async fn get_daily_searches_does_not_mutate_the_counter() {
        let store = SqliteRelationalStore::open_in_memory().unwrap();
        let owner = Owner::new("u1", "p1");

        assert_eq!(store.get_daily_searches(&owner).await.unwrap(), 0);
        store.increment_and_get_daily_searches(&owner).await.unwrap();
        assert_eq!(store.get_daily_searches(&owner).await.unwrap(), 1);
        assert_eq!(store.get_daily_searches(&owner).await.unwrap(), 1);
    }
}
