//! # MemoryX client
//!
//! Durable client-side outbox and flusher for MemoryX agents. Decouples
//! `add_memory`/`add_message` calls from the network and guarantees
//! at-least-once delivery of memory writes and conversation segments to a
//! MemoryX server, surviving process restarts via an embedded SQLite
//! outbox.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use memoryx_client::{MemoryXClient, MemoryXConfig, Role};
//!
//! #[tokio::main]
//! async fn main() -> memoryx_client::Result<()> {
//!     let client = MemoryXClient::new(
//!         MemoryXConfig::default()
//!             .with_server_url("https://api.memoryx.dev")
//!             .with_api_key("device-key"),
//!     )?;
//!
//!     client.add_message(Role::User, "What's my deploy checklist?").await?;
//!     client.add_message(Role::Assistant, "...").await?;
//!     client.flush().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod db;
pub mod errors;
pub mod flusher;
pub mod outbox;
pub mod retry;
pub mod tokenizer;
pub mod transport;
pub mod types;

pub use config::{FlushConfig, MemoryXConfig};
pub use errors::{ClientError, Result};
pub use flusher::{MemoryXClient, spawn_background_flusher};
pub use tokenizer::{ApproximateTokenizer, Tokenizer};
pub use types::{
    AcceptedResponse, ConversationFlushRequest, ConversationMessage, MemoryPayload, Metadata,
    QueueStats, Role,
};
