//! Publishes export requests for the out-of-process export worker.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Queue consumed by the playlist export worker.
pub const EXPORT_PLAYLISTS_QUEUE: &str = "export:playlists";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPlaylistMessage {
    pub playlist_id: String,
    pub user_id: String,
    pub target_email: String,
}

/// Body of `POST /export/playlists/:playlistId`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPlaylistPayload {
    pub target_email: String,
}

#[async_trait]
pub trait MessageProducer: Send + Sync {
    async fn send_message(&self, queue: &str, message: &str) -> Result<()>;
}

/// Pushes messages onto a Redis list; workers pop from the other end.
#[derive(Clone)]
pub struct RedisProducer {
    connection: ConnectionManager,
}

impl RedisProducer {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl MessageProducer for RedisProducer {
    async fn send_message(&self, queue: &str, message: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .rpush(queue, message)
            .await
            .with_context(|| format!("Failed to publish message to queue: {}", queue))?;
        tracing::debug!("Published message to {}", queue);
        Ok(())
    }
}

/// Stand-in used when no broker is configured. Every publish fails, so
/// callers never report a request as queued when no worker can consume it.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableProducer;

#[async_trait]
impl MessageProducer for UnavailableProducer {
    async fn send_message(&self, queue: &str, _message: &str) -> Result<()> {
        anyhow::bail!("No message broker configured for queue: {}", queue)
    }
}

/// In-process queues, drained by whoever holds a clone. Used by tests; the
/// server never wires it up since nothing in the process consumes it.
#[derive(Clone, Default)]
pub struct MemoryProducer {
    queues: Arc<Mutex<HashMap<String, VecDeque<String>>>>,
}

impl MemoryProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every pending message of a queue, oldest first.
    pub async fn drain(&self, queue: &str) -> Vec<String> {
        self.queues
            .lock()
            .await
            .get_mut(queue)
            .map(|messages| messages.drain(..).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageProducer for MemoryProducer {
    async fn send_message(&self, queue: &str, message: &str) -> Result<()> {
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_back(message.to_string());
        tracing::debug!("Queued message on in-process queue {}", queue);
        Ok(())
    }
}
