//! # Builder Module
//!
//! Fluent construction of the two driver flavors around one scraper.
//!
//! ## Example
//!
//! ```rust,ignore
//! use magpie::prelude::*;
//!
//! let driver = DriverBuilder::new(CourtScraper)
//!     .storage_dir("/var/lib/court-files")
//!     .on_data(|record| println!("{record:?}"))
//!     .on_transient_exception(|e| {
//!         eprintln!("transient: {e}");
//!         true
//!     })
//!     .build()?;
//! driver.run().await?;
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::checkpoint::QueueCheckpoint;
use crate::driver::{DriverCore, PoolDriver, SerialDriver};
use crate::error::{AssumptionError, ScrapeError, TransientError};
use crate::fetch::{Fetcher, HttpFetcher, RetryPolicy, RetryingFetcher};
use crate::hooks::{Hooks, RunStatus};
use crate::item::DeferredValidation;
use crate::scraper::{Invocation, Scraper};
use crate::speculation::SpeculationConfig;
use crate::state::StopSignal;

/// Assembles a [`SerialDriver`] or [`PoolDriver`] from a scraper,
/// optional hooks, and configuration.
pub struct DriverBuilder<S: Scraper> {
    scraper: S,
    storage_dir: Option<PathBuf>,
    fetcher: Option<Arc<dyn Fetcher>>,
    timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    workers: usize,
    hooks: Hooks<S::Record>,
    stop: Option<StopSignal>,
    invocations: Vec<Invocation>,
    speculation_overrides: BTreeMap<String, SpeculationConfig>,
    resume_from: Option<QueueCheckpoint>,
}

impl<S: Scraper> DriverBuilder<S> {
    pub fn new(scraper: S) -> Self {
        DriverBuilder {
            scraper,
            storage_dir: None,
            fetcher: None,
            timeout: None,
            retry: None,
            workers: 1,
            hooks: Hooks::default(),
            stop: None,
            invocations: Vec::new(),
            speculation_overrides: BTreeMap::new(),
            resume_from: None,
        }
    }

    /// Directory for archived files. Defaults to the system temp
    /// directory plus `juriscraper_files`.
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Per-request timeout applied by the default HTTP fetcher.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Layer exponential-backoff retries over the fetcher.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Worker count for [`build_pool`](Self::build_pool). Default 1.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Size the pool to the machine, like a download pool would be.
    pub fn auto_workers(mut self) -> Self {
        self.workers = num_cpus::get().clamp(1, 16);
        self
    }

    /// Substitute the fetch layer (e.g. a scripted fetcher in tests or
    /// a persistence-backed manager).
    pub fn fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Add one typed entry invocation. Without any, every
    /// zero-parameter non-speculative entry is invoked once.
    pub fn invocation(mut self, invocation: Invocation) -> Self {
        self.invocations.push(invocation);
        self
    }

    pub fn invocations(mut self, invocations: impl IntoIterator<Item = Invocation>) -> Self {
        self.invocations.extend(invocations);
        self
    }

    /// Override a speculator's definite range and/or failure budget
    /// for this run.
    pub fn speculation_override(
        mut self,
        speculator: impl Into<String>,
        config: SpeculationConfig,
    ) -> Self {
        self.speculation_overrides.insert(speculator.into(), config);
        self
    }

    /// External cancellation signal observed before each pop.
    pub fn stop_signal(mut self, signal: StopSignal) -> Self {
        self.stop = Some(signal);
        self
    }

    /// Re-seed the queue from a previous run's checkpoint before
    /// normal seeding; the restored seen-keys keep already-fetched
    /// requests deduplicated.
    pub fn resume_from(mut self, checkpoint: QueueCheckpoint) -> Self {
        self.resume_from = Some(checkpoint);
        self
    }

    pub fn on_run_start(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_run_start = Some(Box::new(callback));
        self
    }

    pub fn on_run_complete(
        mut self,
        callback: impl Fn(&str, RunStatus, Option<&ScrapeError>) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_run_complete = Some(Box::new(callback));
        self
    }

    /// Invoked with each validated datum.
    pub fn on_data(mut self, callback: impl Fn(S::Record) + Send + Sync + 'static) -> Self {
        self.hooks.on_data = Some(Box::new(callback));
        self
    }

    /// Invoked with each datum that failed validation.
    pub fn on_invalid_data(
        mut self,
        callback: impl Fn(&DeferredValidation<S::Record>) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_invalid_data = Some(Box::new(callback));
        self
    }

    /// Invoked on structural assumption failures; return `true` to
    /// continue the run.
    pub fn on_structural_error(
        mut self,
        callback: impl Fn(&AssumptionError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_structural_error = Some(Box::new(callback));
        self
    }

    /// Invoked on transient transport failures; return `true` to
    /// continue the run.
    pub fn on_transient_exception(
        mut self,
        callback: impl Fn(&TransientError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_transient_exception = Some(Box::new(callback));
        self
    }

    /// Substitute the archive file sink.
    pub fn on_archive(
        mut self,
        callback: impl Fn(&[u8], &str, Option<&str>, &std::path::Path) -> std::io::Result<PathBuf>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.hooks.on_archive = Some(Box::new(callback));
        self
    }

    /// Substitute the in-memory seen-set; return `true` to enqueue.
    pub fn duplicate_check(
        mut self,
        callback: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.hooks.duplicate_check = Some(Box::new(callback));
        self
    }

    fn build_core(self) -> Result<(Arc<DriverCore<S>>, usize), ScrapeError> {
        if self.workers == 0 {
            return Err(ScrapeError::Config(
                "worker count must be greater than 0".into(),
            ));
        }

        let storage_dir = self
            .storage_dir
            .unwrap_or_else(|| std::env::temp_dir().join("juriscraper_files"));
        std::fs::create_dir_all(&storage_dir)?;

        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => match &self.retry {
                Some(policy) => Arc::new(RetryingFetcher::new(fetcher, policy.clone())),
                None => fetcher,
            },
            None => {
                let timeout = self.timeout.unwrap_or(Duration::from_secs(30));
                let client = self
                    .scraper
                    .configure_http(reqwest::Client::builder().timeout(timeout))
                    .build()
                    .map_err(|e| ScrapeError::Config(format!("HTTP client: {e}")))?;
                let http = HttpFetcher::from_client(client, timeout);
                match &self.retry {
                    Some(policy) => Arc::new(RetryingFetcher::new(http, policy.clone())),
                    None => Arc::new(http),
                }
            }
        };

        let stop = self.stop.unwrap_or_default();
        debug!(storage_dir = %storage_dir.display(), workers = self.workers, "driver configured");

        let core = Arc::new(DriverCore::new(
            Arc::new(self.scraper),
            fetcher,
            self.hooks,
            stop,
            storage_dir,
            self.invocations,
            self.speculation_overrides,
        ));
        if let Some(checkpoint) = self.resume_from {
            core.restore(checkpoint);
        }
        Ok((core, self.workers))
    }

    /// Build the serial flavor.
    pub fn build(self) -> Result<SerialDriver<S>, ScrapeError> {
        let (core, _) = self.build_core()?;
        Ok(SerialDriver { core })
    }

    /// Build the pooled flavor with the configured worker count.
    pub fn build_pool(self) -> Result<PoolDriver<S>, ScrapeError> {
        let (core, workers) = self.build_core()?;
        Ok(PoolDriver { core, workers })
    }
}
