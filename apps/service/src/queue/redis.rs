use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::cmd;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use tracing::debug;
use uuid::Uuid;

use super::{JobQueue, QueueError, decode_job, encode_job};

/// Shortest BRPOP wait; a zero timeout would block forever
const MIN_BLOCK_SECS: f64 = 0.001;

/// Queue backed by a Redis list: `LPUSH` to enqueue, `BRPOP` to dequeue
pub struct RedisQueue {
    pool: Pool,
    key: String,
}

fn unavailable(error: impl std::fmt::Display) -> QueueError {
    QueueError::Unavailable(error.to_string())
}

impl RedisQueue {
    /// Build a pooled queue. No connection is made until first use.
    pub fn new(url: &str, key: impl Into<String>) -> Result<Self, QueueError> {
        let pool = Config::from_url(url).create_pool(Some(Runtime::Tokio1)).map_err(unavailable)?;
        Ok(Self { pool, key: key.into() })
    }

    async fn connection(&self) -> Result<Connection, QueueError> {
        self.pool.get().await.map_err(unavailable)
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, check_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let depth: i64 = cmd("LPUSH")
            .arg(&self.key)
            .arg(encode_job(check_id))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        debug!(check_id = %check_id, queue_depth = depth, "job enqueued");
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Uuid>, QueueError> {
        let mut conn = self.connection().await?;
        let popped: Option<(String, String)> = cmd("BRPOP")
            .arg(&self.key)
            .arg(timeout.as_secs_f64().max(MIN_BLOCK_SECS))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        match popped {
            Some((_key, payload)) => decode_job(&payload).map(Some),
            None => Ok(None),
        }
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let len: u64 = cmd("LLEN").arg(&self.key).query_async(&mut conn).await.map_err(unavailable)?;
        Ok(len)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: String = cmd("PING").query_async(&mut conn).await.map_err(unavailable)?;
        Ok(())
    }
}
