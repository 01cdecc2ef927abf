use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use uuid::Uuid;

use crate::bot::dispatcher::OutboundJob;
use crate::config::RedisConfig;

const REDIS_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("corrupt dead letter: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("redis operation timed out")]
    Timeout,
}

/// An outbound message that could not be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    #[serde(flatten)]
    pub job: OutboundJob,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(job: OutboundJob, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            job,
            error: error.into(),
            attempts,
            failed_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    fn backend(&self) -> &'static str;
    /// Stores a letter, evicting the oldest ones past the capacity.
    async fn push(&self, letter: &DeadLetter) -> Result<(), DeadLetterError>;
    /// Newest first.
    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<DeadLetter>, DeadLetterError>;
    async fn len(&self) -> Result<usize, DeadLetterError>;
    async fn get(&self, id: Uuid) -> Result<Option<DeadLetter>, DeadLetterError>;
    async fn remove(&self, id: Uuid) -> Result<Option<DeadLetter>, DeadLetterError>;
    async fn ping(&self) -> Result<(), DeadLetterError>;
}

/// Redis layout: a hash of id → JSON entry plus a list of ids, newest at the head.
pub struct RedisDeadLetterQueue {
    client: redis::Client,
    ids_key: String,
    entries_key: String,
    max_entries: usize,
}

impl RedisDeadLetterQueue {
    pub fn new(url: &str, key_prefix: &str, max_entries: usize) -> Result<Self, DeadLetterError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            ids_key: format!("{key_prefix}:dlq:ids"),
            entries_key: format!("{key_prefix}:dlq:entries"),
            max_entries: max_entries.max(1),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, DeadLetterError> {
        match timeout(REDIS_TIMEOUT, self.client.get_multiplexed_async_connection()).await {
            Ok(conn) => Ok(conn?),
            Err(_) => Err(DeadLetterError::Timeout),
        }
    }

    async fn bounded<T, F>(fut: F) -> Result<T, DeadLetterError>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match timeout(REDIS_TIMEOUT, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DeadLetterError::Timeout),
        }
    }
}

#[async_trait]
impl DeadLetterQueue for RedisDeadLetterQueue {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn push(&self, letter: &DeadLetter) -> Result<(), DeadLetterError> {
        let payload = serde_json::to_string(letter)?;
        let id = letter.id.to_string();
        let mut conn = self.connection().await?;

        let _: () = Self::bounded(
            redis::pipe()
                .atomic()
                .hset(&self.entries_key, &id, payload)
                .ignore()
                .lpush(&self.ids_key, &id)
                .ignore()
                .query_async(&mut conn),
        )
        .await?;

        let len: usize = Self::bounded(conn.llen(&self.ids_key)).await?;
        if len > self.max_entries {
            let evicted: Vec<String> = Self::bounded(conn.lrange(
                &self.ids_key,
                self.max_entries as isize,
                -1,
            ))
            .await?;
            if !evicted.is_empty() {
                let _: () = Self::bounded(
                    redis::pipe()
                        .atomic()
                        .ltrim(&self.ids_key, 0, self.max_entries as isize - 1)
                        .ignore()
                        .hdel(&self.entries_key, &evicted)
                        .ignore()
                        .query_async(&mut conn),
                )
                .await?;
                tracing::warn!(
                    evicted = evicted.len(),
                    "Dead letter queue full, dropped oldest entries"
                );
            }
        }
        Ok(())
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<DeadLetter>, DeadLetterError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let start = offset as isize;
        let stop = (offset + limit) as isize - 1;
        let ids: Vec<String> = Self::bounded(conn.lrange(&self.ids_key, start, stop)).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let payloads: Vec<Option<String>> = Self::bounded(
            redis::cmd("HMGET")
                .arg(&self.entries_key)
                .arg(&ids)
                .query_async(&mut conn),
        )
        .await?;
        payloads
            .into_iter()
            .flatten()
            .map(|payload| serde_json::from_str(&payload).map_err(DeadLetterError::from))
            .collect()
    }

    async fn len(&self) -> Result<usize, DeadLetterError> {
        let mut conn = self.connection().await?;
        Self::bounded(conn.llen(&self.ids_key)).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetter>, DeadLetterError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> =
            Self::bounded(conn.hget(&self.entries_key, id.to_string())).await?;
        payload
            .map(|payload| serde_json::from_str(&payload))
            .transpose()
            .map_err(DeadLetterError::from)
    }

    async fn remove(&self, id: Uuid) -> Result<Option<DeadLetter>, DeadLetterError> {
        let Some(letter) = self.get(id).await? else {
            return Ok(None);
        };
        let id = id.to_string();
        let mut conn = self.connection().await?;
        let (removed, _): (usize, usize) = Self::bounded(
            redis::pipe()
                .atomic()
                .hdel(&self.entries_key, &id)
                .lrem(&self.ids_key, 0, &id)
                .query_async(&mut conn),
        )
        .await?;
        // A concurrent remove got there first.
        Ok((removed > 0).then_some(letter))
    }

    async fn ping(&self) -> Result<(), DeadLetterError> {
        let mut conn = self.connection().await?;
        let _: String = Self::bounded(redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }
}

/// Process-local queue used when Redis is not configured. Entries are lost on restart.
pub struct MemoryDeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetter>>,
    max_entries: usize,
}

impl MemoryDeadLetterQueue {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries: max_entries.max(1),
        }
    }
}

#[async_trait]
impl DeadLetterQueue for MemoryDeadLetterQueue {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn push(&self, letter: &DeadLetter) -> Result<(), DeadLetterError> {
        let mut entries = self.entries.lock();
        entries.push_front(letter.clone());
        entries.truncate(self.max_entries);
        Ok(())
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<DeadLetter>, DeadLetterError> {
        Ok(self
            .entries
            .lock()
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn len(&self) -> Result<usize, DeadLetterError> {
        Ok(self.entries.lock().len())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetter>, DeadLetterError> {
        Ok(self
            .entries
            .lock()
            .iter()
            .find(|letter| letter.id == id)
            .cloned())
    }

    async fn remove(&self, id: Uuid) -> Result<Option<DeadLetter>, DeadLetterError> {
        let mut entries = self.entries.lock();
        Ok(entries
            .iter()
            .position(|letter| letter.id == id)
            .and_then(|index| entries.remove(index)))
    }

    async fn ping(&self) -> Result<(), DeadLetterError> {
        Ok(())
    }
}

/// Redis when a URL is configured, otherwise the in-memory queue.
pub fn from_config(config: &RedisConfig) -> Result<Box<dyn DeadLetterQueue>, DeadLetterError> {
    match config.url.as_deref().filter(|url| !url.is_empty()) {
        Some(url) => Ok(Box::new(RedisDeadLetterQueue::new(
            url,
            &config.key_prefix,
            config.dlq_max_entries,
        )?)),
        None => Ok(Box::new(MemoryDeadLetterQueue::new(config.dlq_max_entries))),
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::bot::dispatcher::{JobOrigin, OutboundJob};

    fn job(message: &str) -> OutboundJob {
        OutboundJob {
            hotel_id: 1,
            guest_id: Some(7),
            chat_id: "79001112233@c.us".to_string(),
            message: message.to_string(),
            origin: JobOrigin::Trigger { trigger_id: 3 },
        }
    }

    #[tokio::test]
    async fn memory_queue_is_newest_first_and_bounded() {
        let queue = MemoryDeadLetterQueue::new(2);
        let first = DeadLetter::new(job("one"), "timeout", 3);
        let second = DeadLetter::new(job("two"), "timeout", 3);
        let third = DeadLetter::new(job("three"), "HTTP 503", 3);
        for letter in [&first, &second, &third] {
            queue.push(letter).await.expect("push");
        }

        assert_eq!(queue.len().await.expect("len"), 2);
        let listed = queue.list(0, 10).await.expect("list");
        assert_eq!(listed[0].id, third.id);
        assert_eq!(listed[1].id, second.id);
        assert!(queue.get(first.id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn memory_queue_remove_is_once() {
        let queue = MemoryDeadLetterQueue::new(10);
        let letter = DeadLetter::new(job("hello"), "timeout", 1);
        queue.push(&letter).await.expect("push");

        let removed = queue.remove(letter.id).await.expect("remove");
        assert_eq!(removed, Some(letter.clone()));
        assert!(queue.remove(letter.id).await.expect("again").is_none());
        assert!(queue.remove(Uuid::new_v4()).await.expect("unknown").is_none());
        assert_eq!(queue.len().await.expect("len"), 0);
    }

    #[test]
    fn dead_letter_json_is_flat() {
        let letter = DeadLetter::new(job("hello"), "timeout", 2);
        let value = serde_json::to_value(&letter).expect("serialize");
        assert_eq!(value["hotel_id"], 1);
        assert_eq!(value["chat_id"], "79001112233@c.us");
        assert_eq!(value["origin"]["kind"], "trigger");
        assert_eq!(value["attempts"], 2);

        let back: DeadLetter = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, letter);
    }

    #[test]
    fn memory_backend_without_redis_url() {
        let queue = from_config(&RedisConfig::default()).expect("queue");
        assert_eq!(queue.backend(), "memory");
    }

    /// Runs against a live server only when `REDIS_TEST_URL` is set.
    #[tokio::test]
    async fn redis_queue_round_trip() {
        let Ok(url) = std::env::var("REDIS_TEST_URL") else {
            return;
        };
        let prefix = format!("hotelbot-test-{}", Uuid::new_v4());
        let queue = RedisDeadLetterQueue::new(&url, &prefix, 2).expect("client");
        queue.ping().await.expect("ping");

        let letters: Vec<DeadLetter> = ["a", "b", "c"]
            .iter()
            .map(|m| DeadLetter::new(job(m), "timeout", 3))
            .collect();
        for letter in &letters {
            queue.push(letter).await.expect("push");
        }
        assert_eq!(queue.len().await.expect("len"), 2);
        assert!(queue.get(letters[0].id).await.expect("evicted").is_none());

        let removed = queue.remove(letters[2].id).await.expect("remove");
        assert_eq!(removed.map(|l| l.id), Some(letters[2].id));
        let remaining = queue.list(0, 10).await.expect("list");
        assert_eq!(remaining.len(), 1);
        queue.remove(letters[1].id).await.expect("cleanup");
    }
}
