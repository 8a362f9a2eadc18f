//! The public client surface: `addMemory`, `addMessage`,
//! `startNewConversation`, `flush`, `getQueueStats`, plus the background
//! flush loop.
//!
//! Grounded on the teacher's `core/process_pool.rs` background-loop idiom
//! (a `tokio::spawn`ed periodic task alongside trigger-driven immediate
//! work) and `core/retry.rs`'s backoff/retry policy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::config::MemoryXConfig;
use crate::errors::Result;
use crate::outbox::Outbox;
use crate::retry::backoff_delay;
use crate::tokenizer::{ApproximateTokenizer, Tokenizer};
use crate::transport::Transport;
use crate::types::{ConversationFlushRequest, ConversationMessage, MemoryPayload, Metadata, QueueStats, Role};

/// Durable client-side outbox and flusher. One instance per device/process.
pub struct MemoryXClient {
    config: MemoryXConfig,
    outbox: Outbox,
    transport: Transport,
    tokenizer: Box<dyn Tokenizer>,
    flushing: AtomicBool,
}

impl MemoryXClient {
    /// Builds a client from configuration, opening (or creating) its
    /// embedded outbox database.
    pub fn new(config: MemoryXConfig) -> Result<Self> {
        let db_path = config.resolve_db_path()?;
        let outbox = Outbox::open(&db_path)?;
        let transport = Transport::new(&config)?;
        Ok(Self {
            config,
            outbox,
            transport,
            tokenizer: Box::new(ApproximateTokenizer),
            flushing: AtomicBool::new(false),
        })
    }

    /// Builds a client backed by an in-memory outbox, for tests and
    /// short-lived processes that accept losing queued state on exit.
    pub fn new_in_memory(config: MemoryXConfig) -> Result<Self> {
        let transport = Transport::new(&config)?;
        Ok(Self {
            config,
            outbox: Outbox::in_memory()?,
            transport,
            tokenizer: Box::new(ApproximateTokenizer),
            flushing: AtomicBool::new(false),
        })
    }

    /// Enqueues a single memory write. May trigger an immediate
    /// background flush if the batch threshold is already met for the
    /// active conversation segment (memory writes share the same flush
    /// triggers as conversation turns, per spec.md §4.1's unified queue
    /// model).
    pub async fn add_memory(
        &self,
        content: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> Result<i64> {
        let payload = MemoryPayload {
            content: content.into(),
            project_id: self.config.project_id.clone(),
            metadata,
        };
        let id = self.outbox.enqueue_memory(&payload)?;
        info!(local_id = id, "queued memory write");
        self.maybe_flush().await?;
        Ok(id)
    }

    /// Appends a message to the active conversation segment and updates
    /// the activity timestamp used by the idle-timeout trigger.
    pub async fn add_message(&self, role: Role, content: impl Into<String>) -> Result<i64> {
        let conversation_id = self.outbox.active_conversation_id()?;
        let content = content.into();
        let tokens = self.tokenizer.count(&content);
        let message = ConversationMessage {
            role,
            content,
            timestamp: now(),
            tokens,
        };
        let id = self.outbox.enqueue_message(&conversation_id, &message)?;
        self.maybe_flush().await?;
        Ok(id)
    }

    /// Seals the current conversation segment and starts a new one.
    pub fn start_new_conversation(&self) -> Result<String> {
        self.outbox.start_new_conversation()
    }

    /// Returns current queue diagnostics for the active conversation segment.
    pub fn get_queue_stats(&self) -> Result<QueueStats> {
        self.outbox.stats()
    }

    /// Forces a single flush pass. Idempotent while a flush is already
    /// in progress: a concurrent caller simply returns without
    /// re-entering (spec.md §4.1, "concurrent flushes are prevented by a
    /// single in-flight flag").
    pub async fn flush(&self) -> Result<()> {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        let result = self.flush_once().await;
        self.flushing.store(false, Ordering::Release);
        result
    }

    async fn maybe_flush(&self) -> Result<()> {
        let stats = self.outbox.stats()?;
        if self.config.flush.should_flush(&stats) {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush_once(&self) -> Result<()> {
        self.flush_memories().await?;
        self.flush_segments().await?;
        Ok(())
    }

    async fn flush_memories(&self) -> Result<()> {
        let pending = self.outbox.pending_memories(500)?;
        if pending.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = pending.iter().map(|m| m.local_id).collect();
        let payloads: Vec<MemoryPayload> = pending.iter().map(|m| m.payload.clone()).collect();

        let result = if payloads.len() == 1 {
            self.transport.post_memory(&payloads[0]).await
        } else {
            self.transport.post_memory_batch(&payloads).await
        };

        match result {
            Ok(accepted) => {
                info!(task_id = %accepted.task_id, count = ids.len(), "flushed memory batch");
                self.outbox.remove_memories(&ids)?;
            }
            Err(err) => {
                warn!(error = %err, "memory flush failed, scheduling retry");
                self.outbox
                    .record_memory_failures(&ids, self.config.max_retry, &err.to_string())?;
            }
        }
        Ok(())
    }

    async fn flush_segments(&self) -> Result<()> {
        for segment in self.outbox.pending_segments()? {
            if segment.messages.is_empty() {
                continue;
            }
            let request = ConversationFlushRequest {
                conversation_id: segment.conversation_id.clone(),
                messages: segment.messages.iter().map(|m| m.message.clone()).collect(),
            };
            match self.transport.post_conversation_flush(&request).await {
                Ok(accepted) => {
                    info!(
                        task_id = %accepted.task_id,
                        conversation_id = %segment.conversation_id,
                        "flushed conversation segment"
                    );
                    self.outbox.remove_segment(&segment.conversation_id)?;
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        conversation_id = %segment.conversation_id,
                        "conversation flush failed, scheduling retry"
                    );
                    self.outbox.record_segment_failure(
                        &segment.conversation_id,
                        segment.retry_count,
                        self.config.max_retry,
                        &err.to_string(),
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Sweeps dead-letter rows older than 30 days (spec.md §4.1).
    pub fn sweep_dead_letters(&self) -> Result<usize> {
        self.outbox.sweep_dead_letters(30)
    }
}

/// Spawns the background tick loop: periodically re-evaluates flush
/// triggers and sweeps the dead letter, independent of the caller's own
/// request traffic. Mirrors `core/process_pool.rs`'s `cleanup_loop`.
pub fn spawn_background_flusher(client: Arc<MemoryXClient>) -> tokio::task::JoinHandle<()> {
    let tick = client.config.flush.tick_interval;
    tokio::spawn(async move {
        let mut sweep_counter = 0u64;
        loop {
            tokio::time::sleep(tick).await;
            if let Err(err) = client.maybe_flush().await {
                warn!(error = %err, "background flush tick failed");
            }
            sweep_counter += 1;
            if sweep_counter % 360 == 0 {
                if let Err(err) = client.sweep_dead_letters() {
                    warn!(error = %err, "dead letter sweep failed");
                }
            }
        }
    })
}

/// Computes the next retry delay for a given retry count, using the
/// client's configured backoff parameters.
pub fn next_retry_delay(config: &MemoryXConfig, retry_count: u32) -> std::time::Duration {
    backoff_delay(config.retry_base, config.retry_max, retry_count)
}

fn now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(server_url: String) -> MemoryXConfig {
        MemoryXConfig::default()
            .with_server_url(server_url)
            .with_api_key("test-key")
            .with_flush_config(crate::config::FlushConfig::realtime().with_batch_size(1000))
    }

    #[tokio::test]
    async fn add_memory_without_flush_keeps_item_queued() {
        let client =
            MemoryXClient::new_in_memory(test_config("http://127.0.0.1:9".into())).unwrap();
        client.add_memory("hello", None).await.unwrap();
        let pending = client.outbox.pending_memories(10).unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn start_new_conversation_returns_fresh_id() {
        let client =
            MemoryXClient::new_in_memory(test_config("http://127.0.0.1:9".into())).unwrap();
        let first = client.get_queue_stats().unwrap().conversation_id;
        let second = client.start_new_conversation().unwrap();
        assert_ne!(first, second);
    }

    /// A conversation preset client (30,000 tokens / 5 minutes idle) must
    /// not auto-flush a 10-turn, ~12,000-token segment: none of its
    /// triggers have fired yet.
    #[tokio::test]
    async fn large_conversation_segment_does_not_auto_flush_on_size() {
        let config = MemoryXConfig::default()
            .with_server_url("http://127.0.0.1:9".into())
            .with_api_key("test-key")
            .with_flush_config(crate::config::FlushConfig::conversation());
        let client = MemoryXClient::new_in_memory(config).unwrap();

        let word = "w ".repeat(1200);
        for i in 0..10 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            client.add_message(role, word.clone()).await.unwrap();
        }

        let stats = client.get_queue_stats().unwrap();
        assert_eq!(stats.message_count, 10);
        assert!(stats.total_tokens >= 10_000 && stats.total_tokens < 30_000);
        let pending = client.outbox.pending_segments().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].messages.len(), 10);

        // An explicit flush is required; it attempts delivery (and fails
        // against the unreachable server), leaving the segment queued for
        // retry rather than silently dropped.
        client.flush().await.unwrap();
        let still_pending = client.outbox.pending_segments().unwrap();
        assert_eq!(still_pending.len(), 1);
        assert_eq!(still_pending[0].messages.len(), 10);
    }
}
