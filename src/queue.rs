use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{CsvServiceError, Result};
use crate::processor::TableProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    ProcessTable(Uuid),
    ApplyChanges(Uuid),
}

type Waiting = Arc<Mutex<HashSet<Task>>>;

/// Fire-and-forget dispatch of processing work onto a bounded worker pool.
///
/// A task sitting in the channel is queued at most once; it can be queued
/// again as soon as a worker picks it up.
pub struct TaskQueue {
    sender: mpsc::Sender<Task>,
    waiting: Waiting,
    dispatcher: JoinHandle<()>,
}

impl TaskQueue {
    pub fn start(processor: Arc<TableProcessor>, worker_count: usize, capacity: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, mut receiver) = mpsc::channel::<Task>(capacity.max(1));
        let waiting: Waiting = Arc::default();

        let dispatch_waiting = waiting.clone();
        let dispatcher = tokio::spawn(async move {
            let mut in_flight = JoinSet::new();

            while let Some(task) = receiver.recv().await {
                lock(&dispatch_waiting).remove(&task);

                while in_flight.len() >= worker_count {
                    if let Some(Err(e)) = in_flight.join_next().await {
                        error!("Worker task aborted: {}", e);
                    }
                }

                debug!("Dispatching {:?}", task);
                let processor = processor.clone();
                in_flight.spawn(async move { run_task(&processor, task).await });
            }

            while let Some(result) = in_flight.join_next().await {
                if let Err(e) = result {
                    error!("Worker task aborted: {}", e);
                }
            }
            info!("Task queue drained");
        });

        info!(
            "Task queue started with {} workers (capacity {})",
            worker_count, capacity
        );

        Self {
            sender,
            waiting,
            dispatcher,
        }
    }

    /// Queues a task without waiting for it to run or for queue space.
    ///
    /// Returns `Ok(false)` when the same task is already waiting. Fails with
    /// `QueueFull` when the channel is at capacity and `QueueClosed` after
    /// shutdown.
    pub fn enqueue(&self, task: Task) -> Result<bool> {
        if !lock(&self.waiting).insert(task) {
            debug!("{:?} is already waiting in the queue", task);
            return Ok(false);
        }

        match self.sender.try_send(task) {
            Ok(()) => Ok(true),
            Err(e) => {
                lock(&self.waiting).remove(&task);
                Err(match e {
                    TrySendError::Full(_) => CsvServiceError::QueueFull,
                    TrySendError::Closed(_) => CsvServiceError::QueueClosed,
                })
            }
        }
    }

    /// Stops accepting work and waits for queued and running tasks to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.dispatcher.await {
            error!("Task dispatcher aborted: {}", e);
        }
    }
}

fn lock(waiting: &Mutex<HashSet<Task>>) -> MutexGuard<'_, HashSet<Task>> {
    waiting.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_task(processor: &TableProcessor, task: Task) {
    match task {
        Task::ProcessTable(table_id) => {
            if let Err(e) = processor.process_table(table_id).await {
                warn!("Processing run for table {} ended with: {}", table_id, e);
            }
        }
        Task::ApplyChanges(batch_id) => {
            if let Err(e) = processor.apply_change_batch(batch_id).await {
                warn!(
                    "Change batch {} left pending after error: {}",
                    batch_id, e
                );
            }
        }
    }
}
