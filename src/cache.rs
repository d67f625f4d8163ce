//! Key/value cache with expiry, backed by Redis or by process memory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Returns `None` for missing or expired keys.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
}

/// Open a reconnecting Redis connection shared by the cache and the export queue.
pub async fn connect_redis(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url)
        .with_context(|| format!("Invalid redis url: {}", redis_url))?;
    ConnectionManager::new(client)
        .await
        .context("Failed to connect to redis")
}

impl RedisCache {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .set_ex(key, value, ttl.as_secs().max(1))
            .await
            .with_context(|| format!("Failed to cache key: {}", key))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut connection = self.connection.clone();
        connection
            .get(key)
            .await
            .with_context(|| format!("Failed to read cached key: {}", key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .del(key)
            .await
            .with_context(|| format!("Failed to evict cached key: {}", key))?;
        Ok(())
    }
}

/// In-process cache for single-node deployments and tests.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires_at)) if *expires_at > Instant::now() => {
                    return Ok(Some(value.clone()));
                }
                None => return Ok(None),
                Some(_) => {}
            }
        }

        // expired
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_roundtrip_and_delete() {
        let cache = MemoryCache::new();
        cache.set("likes:album-1", "3", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("likes:album-1").await.unwrap().as_deref(), Some("3"));

        cache.delete("likes:album-1").await.unwrap();
        assert_eq!(cache.get("likes:album-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_cache_expires() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
