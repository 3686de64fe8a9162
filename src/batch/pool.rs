//! Bounded worker pool with positional results

use crate::error::{RegistryError, Result};
use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs one task per item with at most `workers` in flight.
///
/// Tasks are dispatched in input order. Each result lands in the slot of the
/// item that produced it, whatever order the tasks finish in, so
/// `output[i]` always belongs to `items[i]`. A panicking task yields
/// [`RegistryError::Task`] in its own slot and leaves the rest untouched.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn run<I, T, F, Fut>(&self, items: Vec<I>, task: F) -> Vec<Result<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(usize, I) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut slots: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();
        let mut running = FuturesUnordered::new();

        for (index, item) in items.into_iter().enumerate() {
            // Waiting here, not inside the task, keeps dispatch in index order.
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    slots[index] = Some(Err(RegistryError::Task(format!(
                        "Failed to acquire worker slot: {}",
                        e
                    ))));
                    continue;
                }
            };

            let work = task(index, item);
            let handle = tokio::spawn(async move {
                let _permit = permit;
                work.await
            });
            running.push(handle.map(move |joined| (index, joined)));
        }

        while let Some((index, joined)) = running.next().await {
            slots[index] = Some(joined.map_err(|e| {
                RegistryError::Task(format!("Worker for item {} failed: {}", index + 1, e))
            }));
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    Err(RegistryError::Task(format!("Item {} produced no result", index + 1)))
                })
            })
            .collect()
    }
}
