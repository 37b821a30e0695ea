use super::error::Result;
use super::keys::QUEUE_KEY;
use crate::store::KvStore;
use std::sync::Arc;
use tracing::debug;

/// FIFO of job ids on top of a store list
///
/// Each entry is handed to exactly one `dequeue` caller. There is no ack:
/// an id popped by a worker that then dies is gone.
#[derive(Clone)]
pub struct DispatchQueue {
    store: Arc<dyn KvStore>,
    list: String,
}

impl DispatchQueue {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            list: QUEUE_KEY.to_string(),
        }
    }

    /// Append to the tail
    pub async fn enqueue(&self, job_id: &str) -> Result<()> {
        self.store.push(&self.list, job_id).await?;
        debug!(job_id, list = %self.list, "Job enqueued");
        Ok(())
    }

    /// Wait for and remove the head
    pub async fn dequeue(&self) -> Result<String> {
        Ok(self.store.blocking_pop(&self.list).await?)
    }

    /// Entries still waiting for a worker
    pub async fn depth(&self) -> Result<usize> {
        Ok(self.store.list_len(&self.list).await?)
    }
}
