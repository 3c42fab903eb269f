//! Bounded task pool with non-blocking submission.
//!
//! Each submitted future occupies one slot until it finishes. When all slots
//! are taken `try_submit` fails immediately and the caller decides how long
//! to back off.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{name} pool saturated ({capacity} tasks running)")]
pub struct PoolSaturated {
    pub name: &'static str,
    pub capacity: usize,
}

#[derive(Clone)]
pub struct WorkerPool {
    name: &'static str,
    capacity: usize,
    slots: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn try_submit<F>(&self, task: F) -> Result<JoinHandle<()>, PoolSaturated>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| PoolSaturated {
                name: self.name,
                capacity: self.capacity,
            })?;
        Ok(tokio::spawn(async move {
            let _permit = permit;
            task.await;
        }))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now.
    pub fn idle(&self) -> usize {
        self.slots.available_permits()
    }
}
