use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, timeout_at};
use uuid::Uuid;

use super::{JobQueue, QueueError};

/// In-process queue for single-node runs and tests
#[derive(Default)]
pub struct MemoryQueue {
    jobs: Mutex<VecDeque<Uuid>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, check_id: Uuid) -> Result<(), QueueError> {
        self.jobs.lock().await.push_back(check_id);
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Uuid>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(check_id) = self.jobs.lock().await.pop_front() {
                return Ok(Some(check_id));
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.jobs.lock().await.len() as u64)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
