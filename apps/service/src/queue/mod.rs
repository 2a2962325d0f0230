//! Job queue: a FIFO of check identifiers shared by the scheduler and the
//! worker pool.
//!
//! Delivery is at-most-once. A job popped by a worker that dies before
//! finishing is gone.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryQueue;
pub use redis::RedisQueue;

pub const DEFAULT_QUEUE_KEY: &str = "pulse:jobs";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("malformed job payload {payload:?}: {reason}")]
    Malformed { payload: String, reason: String },
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job to the tail of the queue
    async fn enqueue(&self, check_id: Uuid) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the oldest job. `Ok(None)` means the queue
    /// stayed empty, which is the normal idle signal.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Uuid>, QueueError>;

    /// Current backlog length
    async fn depth(&self) -> Result<u64, QueueError>;

    /// Round trip to the backend, used for readiness
    async fn ping(&self) -> Result<(), QueueError>;
}

/// Wire form of a job: the JSON encoding of the identifier string
pub fn encode_job(check_id: Uuid) -> String {
    serde_json::Value::String(check_id.to_string()).to_string()
}

pub fn decode_job(payload: &str) -> Result<Uuid, QueueError> {
    let malformed = |reason: String| QueueError::Malformed { payload: payload.to_string(), reason };
    let raw: String = serde_json::from_str(payload).map_err(|e| malformed(e.to_string()))?;
    Uuid::parse_str(&raw).map_err(|e| malformed(e.to_string()))
}
