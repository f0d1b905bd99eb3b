//! Pooled driver: a fixed-size set of cooperative workers sharing the
//! priority queue.
//!
//! Ordering is per-priority FIFO at enqueue time only; once several
//! workers pop concurrently there is no execution-order guarantee
//! between them. The queue-counter mutex (inside [`RequestQueue`]) and
//! the speculation mutex are the only coordination points.
//!
//! On cancellation each worker completes its current fetch-and-dispatch
//! and exits. The queue is deliberately **not** drained: pending work
//! survives for [`checkpoint`](PoolDriver::checkpoint) and a later
//! resume.
//!
//! [`RequestQueue`]: crate::queue::RequestQueue

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, trace};

use crate::checkpoint::QueueCheckpoint;
use crate::driver::core::{DriverCore, Flow};
use crate::error::ScrapeError;
use crate::hooks::RunStatus;
use crate::scraper::Scraper;
use crate::state::StopSignal;
use crate::stats::StatCollector;

const IDLE_POLL: Duration = Duration::from_millis(10);

/// The parallel driver flavor.
pub struct PoolDriver<S: Scraper> {
    pub(crate) core: Arc<DriverCore<S>>,
    pub(crate) workers: usize,
}

impl<S: Scraper> PoolDriver<S> {
    /// Process to completion with the configured worker count.
    /// `on_run_complete` fires on every exit path; the first worker
    /// error wins when several fail.
    pub async fn run(&self) -> Result<(), ScrapeError> {
        let name = self.core.run_name();
        info!(scraper = %name, workers = self.workers, "run starting");
        if let Some(callback) = &self.core.hooks.on_run_start {
            callback(&name);
        }

        let result = self.run_inner().await;

        let status = if result.is_ok() {
            RunStatus::Completed
        } else {
            RunStatus::Error
        };
        info!(scraper = %name, status = status.as_str(), "run finished");
        if let Some(callback) = &self.core.hooks.on_run_complete {
            callback(&name, status, result.as_ref().err());
        }
        result
    }

    async fn run_inner(&self) -> Result<(), ScrapeError> {
        self.core.seed()?;

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            let core = Arc::clone(&self.core);
            workers.spawn(worker_loop(core, worker_id));
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "worker failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(join_error) => {
                    error!(error = %join_error, "worker panicked");
                    if first_error.is_none() {
                        first_error = Some(ScrapeError::Config(format!(
                            "worker panicked: {join_error}"
                        )));
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.core.stats)
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.core.stop.clone()
    }

    /// Snapshot pending work; meaningful after a cancelled run since
    /// pool workers leave the queue intact on stop.
    pub fn checkpoint(&self) -> QueueCheckpoint {
        QueueCheckpoint::capture(&self.core.queue)
    }
}

async fn worker_loop<S: Scraper>(
    core: Arc<DriverCore<S>>,
    worker_id: usize,
) -> Result<(), ScrapeError> {
    trace!(worker_id, "worker started");
    loop {
        // Finish-current-then-exit: observed before each pop, never
        // mid-request. Pending requests stay queued.
        if core.stop.is_set() {
            debug!(worker_id, "stop signal observed, worker exiting");
            break;
        }
        match core.queue.pop(&core.state) {
            Some(request) => {
                let flow = core.process(request).await;
                core.state.finish_one();
                match flow {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Stop) => {
                        core.stop.set();
                        break;
                    }
                    Err(e) => {
                        // Fatal for the whole run: wind the pool down.
                        core.stop.set();
                        return Err(e);
                    }
                }
            }
            None => {
                // Empty queue is only the end once no peer holds an
                // in-flight request that could still enqueue more.
                if core.state.is_idle() {
                    trace!(worker_id, "queue empty and idle, worker exiting");
                    break;
                }
                tokio::time::sleep(IDLE_POLL).await;
            }
        }
    }
    Ok(())
}
