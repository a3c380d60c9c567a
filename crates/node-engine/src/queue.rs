//! Per-owner task queues
//!
//! Every owner (e.g. one character entity on one node) gets a bounded
//! channel drained by a single worker task, so at most one task per owner
//! is in flight and tasks run in submission order. Owners are independent
//! of each other and interleave freely.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{NodeEngineError, Result};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Default number of pending tasks per owner before `enqueue` waits
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Handle to the output of a queued task
pub struct TaskHandle<T> {
    owner: String,
    rx: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task to finish.
    ///
    /// Fails with [`NodeEngineError::QueueClosed`] if the task panicked or
    /// was dropped before running.
    pub async fn wait(self) -> Result<T> {
        self.rx.await.map_err(|_| NodeEngineError::QueueClosed(self.owner))
    }
}

pub struct OwnerTaskQueue {
    capacity: usize,
    owners: Mutex<HashMap<String, mpsc::Sender<Job>>>,
}

impl OwnerTaskQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            owners: Mutex::new(HashMap::new()),
        }
    }

    /// Queue `task` behind every earlier task for `owner`.
    ///
    /// Must be called from within a tokio runtime; the owner's worker is
    /// spawned on first use.
    pub async fn enqueue<F, T>(&self, owner: &str, task: F) -> Result<TaskHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let owner_id = owner.to_string();
        let job: Job = Box::pin(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(output) => {
                    let _ = tx.send(output);
                }
                Err(_) => log::error!("Queued task for '{}' panicked", owner_id),
            }
        });

        let sender = self.sender(owner);
        if let Err(mpsc::error::SendError(job)) = sender.send(job).await {
            // Worker exited (owner removed mid-send); start a fresh one
            log::debug!("Restarting worker for owner '{}'", owner);
            self.owners.lock().remove(owner);
            self.sender(owner)
                .send(job)
                .await
                .map_err(|_| NodeEngineError::QueueClosed(owner.to_string()))?;
        }

        Ok(TaskHandle {
            owner: owner.to_string(),
            rx,
        })
    }

    /// Stop accepting work for `owner`. Already queued tasks still run.
    pub fn remove_owner(&self, owner: &str) -> bool {
        self.owners.lock().remove(owner).is_some()
    }

    /// Remove every owner whose id starts with `prefix`
    pub fn remove_owners_with_prefix(&self, prefix: &str) -> usize {
        let mut owners = self.owners.lock();
        let before = owners.len();
        owners.retain(|owner, _| !owner.starts_with(prefix));
        before - owners.len()
    }

    pub fn owner_count(&self) -> usize {
        self.owners.lock().len()
    }

    fn sender(&self, owner: &str) -> mpsc::Sender<Job> {
        let mut owners = self.owners.lock();
        if let Some(sender) = owners.get(owner).filter(|s| !s.is_closed()) {
            return sender.clone();
        }

        let (tx, mut rx) = mpsc::channel::<Job>(self.capacity);
        let owner_id = owner.to_string();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            log::debug!("Task queue worker for '{}' stopped", owner_id);
        });
        owners.insert(owner.to_string(), tx.clone());
        tx
    }
}

impl Default for OwnerTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
