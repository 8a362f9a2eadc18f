//! Client configuration: server connection, outbox location, and flush triggers.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level client configuration.
#[derive(Debug, Clone)]
pub struct MemoryXConfig {
    /// Base URL of the MemoryX server, e.g. `https://api.memoryx.dev`.
    pub server_url: String,
    /// Per-device API key, sent as `X-API-Key`.
    pub api_key: String,
    /// Optional project partition applied to every write from this client.
    pub project_id: Option<String>,
    /// Path to the embedded outbox database file. Defaults to a file under
    /// the user's data directory.
    pub db_path: Option<PathBuf>,
    /// Flush trigger configuration.
    pub flush: FlushConfig,
    /// Maximum retry attempts before an item is moved to the dead letter.
    pub max_retry: u32,
    /// Base backoff duration; actual delay is `base * 2^retry`, clamped
    /// and jittered per spec.
    pub retry_base: Duration,
    /// Backoff ceiling.
    pub retry_max: Duration,
}

impl Default for MemoryXConfig {
    fn default() -> Self {
        Self {
            server_url: std::env::var("MEMORYX_SERVER_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            api_key: std::env::var("MEMORYX_API_KEY").unwrap_or_default(),
            project_id: std::env::var("MEMORYX_PROJECT_ID").ok(),
            db_path: None,
            flush: FlushConfig::conversation(),
            max_retry: 5,
            retry_base: Duration::from_secs(1),
            retry_max: Duration::from_secs(60),
        }
    }
}

impl MemoryXConfig {
    /// Sets the server base URL.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Sets the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    /// Sets the default project id for writes.
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Overrides the embedded outbox database path.
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Overrides the flush trigger configuration.
    pub fn with_flush_config(mut self, flush: FlushConfig) -> Self {
        self.flush = flush;
        self
    }

    /// Resolves the effective outbox database path, creating parent
    /// directories as needed.
    pub fn resolve_db_path(&self) -> crate::errors::Result<PathBuf> {
        if let Some(path) = &self.db_path {
            return Ok(path.clone());
        }
        let dir = dirs::data_dir()
            .ok_or_else(|| crate::errors::ClientError::Storage("no data directory".into()))?
            .join("memoryx");
        std::fs::create_dir_all(&dir)
            .map_err(|e| crate::errors::ClientError::Storage(e.to_string()))?;
        Ok(dir.join("outbox.sqlite3"))
    }
}

/// An injectable predicate over the current queue stats; returning `true`
/// forces an immediate flush (spec.md §4.1 trigger 5, "custom predicate").
pub type CustomTrigger = std::sync::Arc<dyn Fn(&crate::types::QueueStats) -> bool + Send + Sync>;

/// Flush trigger thresholds. Any one firing forces a flush pass.
#[derive(Clone)]
pub struct FlushConfig {
    /// Completed user→assistant round threshold.
    pub round_threshold: Option<usize>,
    /// Message count threshold.
    pub batch_size: Option<usize>,
    /// Cumulative token budget threshold.
    pub max_tokens: Option<usize>,
    /// Idle duration after which a non-empty queue is flushed regardless
    /// of size.
    pub idle_timeout: Option<Duration>,
    /// Interval the background flusher wakes up to re-evaluate triggers,
    /// independent of the idle timeout.
    pub tick_interval: Duration,
    /// Optional caller-supplied predicate, evaluated every tick and on
    /// every enqueue.
    pub custom_trigger: Option<CustomTrigger>,
}

impl std::fmt::Debug for FlushConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushConfig")
            .field("round_threshold", &self.round_threshold)
            .field("batch_size", &self.batch_size)
            .field("max_tokens", &self.max_tokens)
            .field("idle_timeout", &self.idle_timeout)
            .field("tick_interval", &self.tick_interval)
            .field("custom_trigger", &self.custom_trigger.is_some())
            .finish()
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self::conversation()
    }
}

impl FlushConfig {
    /// `realtime` preset: flush after every single message.
    pub fn realtime() -> Self {
        Self {
            round_threshold: None,
            batch_size: Some(1),
            max_tokens: None,
            idle_timeout: None,
            tick_interval: Duration::from_secs(1),
            custom_trigger: None,
        }
    }

    /// `batch` preset: flush at 50 messages or every 5 seconds.
    pub fn batch() -> Self {
        Self {
            round_threshold: None,
            batch_size: Some(50),
            max_tokens: None,
            idle_timeout: Some(Duration::from_secs(5)),
            tick_interval: Duration::from_secs(1),
            custom_trigger: None,
        }
    }

    /// `conversation` preset: flush at 30,000 tokens or after 5 minutes idle.
    pub fn conversation() -> Self {
        Self {
            round_threshold: None,
            batch_size: None,
            max_tokens: Some(30_000),
            idle_timeout: Some(Duration::from_secs(5 * 60)),
            tick_interval: Duration::from_secs(10),
            custom_trigger: None,
        }
    }

    /// Sets the round-count threshold.
    pub fn with_round_threshold(mut self, rounds: usize) -> Self {
        self.round_threshold = Some(rounds);
        self
    }

    /// Sets the batch-size threshold.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Sets the token-budget threshold.
    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Installs a custom trigger predicate.
    pub fn with_custom_trigger(mut self, trigger: CustomTrigger) -> Self {
        self.custom_trigger = Some(trigger);
        self
    }

    /// Evaluates all configured triggers against a stats snapshot.
    pub fn should_flush(&self, stats: &crate::types::QueueStats) -> bool {
        if let Some(rounds) = self.round_threshold {
            if stats.rounds >= rounds {
                return true;
            }
        }
        if let Some(size) = self.batch_size {
            if stats.message_count >= size {
                return true;
            }
        }
        if let Some(tokens) = self.max_tokens {
            if stats.total_tokens >= tokens {
                return true;
            }
        }
        if let Some(idle) = self.idle_timeout {
            if stats.message_count > 0 && stats.oldest_message_age >= idle.as_secs() as i64 {
                return true;
            }
        }
        if let Some(custom) = &self.custom_trigger {
            if custom(stats) {
                return true;
            }
        }
        false
    }
}
