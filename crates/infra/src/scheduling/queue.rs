//! The summarization job queue and its worker pool.
//!
//! Producers (hourly scheduler, backfill, wake handler, IPC) enqueue
//! `(hour, force)` jobs; a bounded worker pool (parallelism 1 by default to
//! protect the LLM budget) drains them. When the queue is full the oldest
//! pending job is dropped and logged; concurrent jobs for the same hour are
//! harmless because summarization is idempotent.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use trace_common::{BoundedQueue, PushOutcome};
use trace_core::summarize::summarizer::HourlySummarizer;
use trace_domain::constants::JOB_QUEUE_CAPACITY;

/// One queued summarization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummarizeJob {
    pub hour_start: NaiveDateTime,
    pub force: bool,
}

struct WorkerState {
    workers: Vec<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
}

/// Bounded queue plus worker-pool lifecycle. Shareable behind an `Arc`.
pub struct SummarizeQueue {
    queue: Arc<BoundedQueue<SummarizeJob>>,
    state: Mutex<WorkerState>,
}

impl SummarizeQueue {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(BoundedQueue::new(JOB_QUEUE_CAPACITY)),
            state: Mutex::new(WorkerState { workers: Vec::new(), cancel: None }),
        }
    }

    /// Enqueue a job. Returns `false` when an older pending job was dropped
    /// to make room.
    pub fn enqueue(&self, hour_start: NaiveDateTime, force: bool) -> bool {
        match self.queue.push(SummarizeJob { hour_start, force }) {
            PushOutcome::Enqueued => true,
            PushOutcome::DroppedOldest => {
                warn!(hour = %hour_start, "job queue full, dropped oldest pending job");
                false
            }
            PushOutcome::Closed => {
                warn!(hour = %hour_start, "job queue closed, job discarded");
                false
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Start `parallelism` workers draining the queue. No-op while workers
    /// are already running.
    pub fn start_workers(&self, summarizer: Arc<HourlySummarizer>, parallelism: usize) {
        let mut state = self.lock();
        if state.cancel.as_ref().is_some_and(|c| !c.is_cancelled()) {
            return;
        }

        let cancel = CancellationToken::new();
        state.cancel = Some(cancel.clone());

        for worker_id in 0..parallelism.max(1) {
            let queue = Arc::clone(&self.queue);
            let summarizer = Arc::clone(&summarizer);
            let cancel = cancel.clone();

            state.workers.push(tokio::spawn(async move {
                info!(worker_id, "summarize worker started");
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }

                    let queue_handle = Arc::clone(&queue);
                    let job = tokio::task::spawn_blocking(move || {
                        queue_handle.pop_timeout(Duration::from_millis(500))
                    })
                    .await
                    .unwrap_or(None);

                    let Some(job) = job else {
                        continue;
                    };

                    match summarizer.summarize_hour(job.hour_start, job.force).await {
                        Ok(outcome) if outcome.created => {
                            info!(hour = %job.hour_start, note_id = %outcome.note_id, "summarize job complete");
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(hour = %job.hour_start, error = %err, "summarize job failed");
                        }
                    }
                }
                info!(worker_id, "summarize worker stopped");
            }));
        }
    }

    pub fn is_running(&self) -> bool {
        let state = self.lock();
        state.cancel.as_ref().is_some_and(|c| !c.is_cancelled())
            && state.workers.iter().any(|w| !w.is_finished())
    }

    /// Stop the workers; pending jobs stay queued for the next start.
    pub async fn stop_workers(&self) {
        let workers = {
            let mut state = self.lock();
            if let Some(cancel) = state.cancel.take() {
                cancel.cancel();
            }
            std::mem::take(&mut state.workers)
        };

        for worker in workers {
            if tokio::time::timeout(Duration::from_secs(5), worker).await.is_err() {
                warn!("summarize worker did not stop within timeout");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WorkerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for SummarizeQueue {
    fn default() -> Self {
        Self::new()
    }
}
