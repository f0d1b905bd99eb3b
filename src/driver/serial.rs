//! Single-consumer driver: one thread of execution, suspension points
//! exactly at the HTTP calls, no internal contention.

use std::sync::Arc;

use tracing::{debug, info};

use crate::checkpoint::QueueCheckpoint;
use crate::driver::core::{DriverCore, Flow};
use crate::error::ScrapeError;
use crate::hooks::RunStatus;
use crate::scraper::Scraper;
use crate::state::StopSignal;
use crate::stats::StatCollector;

/// The serial driver flavor.
///
/// `run()` blocks from seeding to completion. Cancellation is observed
/// at the top of each cycle; when the signal is set the queue is
/// drained and the run exits, so "stop" means stop immediately.
pub struct SerialDriver<S: Scraper> {
    pub(crate) core: Arc<DriverCore<S>>,
}

impl<S: Scraper> SerialDriver<S> {
    /// Process to completion. Returns when the queue is empty, the
    /// stop signal fires, or an error propagates past all hooks.
    /// `on_run_complete` fires on every exit path.
    pub async fn run(&self) -> Result<(), ScrapeError> {
        let name = self.core.run_name();
        info!(scraper = %name, "run starting");
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

        loop {
            if self.core.stop.is_set() {
                let dropped = self.core.queue.drain();
                debug!(dropped, "stop signal observed, queue drained");
                break;
            }
            let Some(request) = self.core.queue.pop(&self.core.state) else {
                break;
            };
            let flow = self.core.process(request).await;
            self.core.state.finish_one();
            match flow? {
                Flow::Continue => {}
                Flow::Stop => break,
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.core.stats)
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.core.stop.clone()
    }

    /// Snapshot the pending queue for a later resume.
    pub fn checkpoint(&self) -> QueueCheckpoint {
        QueueCheckpoint::capture(&self.core.queue)
    }
}
