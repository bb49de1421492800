//! Job dispatcher and worker pool
//!
//! A fixed number of workers drain a small bounded queue of repository jobs. The producer
//! awaits queue capacity before each enqueue, then waits until every job it enqueued has been
//! acknowledged. Failed and panicked jobs are acknowledged like successful ones.

use crate::config::RepositorySpec;
use crate::error::Result;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

/// Depth of the job queue; the producer waits when it is full
pub const QUEUE_DEPTH: usize = 5;

/// Worker report for one finished job
#[derive(Debug)]
struct Ack {
    worker: usize,
    repository: String,
    succeeded: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub enqueued: usize,
    pub acknowledged: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    workers: usize,
    queue_depth: usize,
}

impl Dispatcher {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            queue_depth: QUEUE_DEPTH,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `handler` once per job on the worker pool and return after every job is acknowledged
    pub async fn run<I, F, Fut, T>(&self, jobs: I, handler: F) -> DispatchSummary
    where
        I: IntoIterator<Item = RepositorySpec>,
        F: Fn(RepositorySpec) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (job_tx, job_rx) = mpsc::channel::<RepositorySpec>(self.queue_depth);
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<Ack>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let handler = Arc::new(handler);

        info!(workers = self.workers, "Starting workers");
        let handles: Vec<_> = (0..self.workers)
            .map(|worker| {
                let job_rx = Arc::clone(&job_rx);
                let ack_tx = ack_tx.clone();
                let handler = Arc::clone(&handler);
                tokio::spawn(async move { worker_loop(worker, job_rx, ack_tx, handler).await })
            })
            .collect();
        // only workers hold ack senders now, so the ack stream ends if they all exit
        drop(ack_tx);

        let mut summary = DispatchSummary::default();
        for job in jobs {
            debug!(full_repo = %job.name, "Enqueue repository");
            if job_tx.send(job).await.is_err() {
                error!("Job queue closed before all repositories were enqueued");
                break;
            }
            summary.enqueued += 1;
        }

        while summary.acknowledged < summary.enqueued {
            match ack_rx.recv().await {
                Some(ack) => {
                    summary.acknowledged += 1;
                    if !ack.succeeded {
                        summary.failed += 1;
                    }
                    debug!(
                        worker = ack.worker,
                        full_repo = %ack.repository,
                        remaining = summary.enqueued - summary.acknowledged,
                        "Job finished"
                    );
                }
                None => {
                    warn!(
                        missing = summary.enqueued - summary.acknowledged,
                        "All workers exited before acknowledging every job"
                    );
                    break;
                }
            }
        }

        drop(job_tx);
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
            }
        }

        summary
    }
}

async fn worker_loop<F, Fut, T>(
    worker: usize,
    job_rx: Arc<Mutex<mpsc::Receiver<RepositorySpec>>>,
    ack_tx: mpsc::UnboundedSender<Ack>,
    handler: Arc<F>,
) where
    F: Fn(RepositorySpec) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    loop {
        // the lock is released before the job runs
        let job = job_rx.lock().await.recv().await;
        let Some(job) = job else {
            debug!(worker, "Job queue closed, worker exiting");
            return;
        };

        let repository = job.name.clone();
        // a panicking job still gets acknowledged
        let succeeded = match tokio::spawn(handler(job)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                error!(full_repo = %repository, "{}", e);
                false
            }
            Err(e) => {
                error!(full_repo = %repository, "Sync job aborted: {}", e);
                false
            }
        };

        if ack_tx
            .send(Ack {
                worker,
                repository,
                succeeded,
            })
            .is_err()
        {
            return;
        }
    }
}
