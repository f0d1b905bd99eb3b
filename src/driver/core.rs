//! Shared fetch-and-dispatch pipeline used by both driver flavors.
//!
//! One [`DriverCore`] owns the queue, the fetch layer, the speculation
//! engine, the hooks, and the collected statistics. The flavors differ
//! only in how they pump [`DriverCore::process`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::driver::default_archive_sink;
use crate::error::{AssumptionError, FetchFailure, ScrapeError};
use crate::fetch::Fetcher;
use crate::hooks::Hooks;
use crate::item::{ParsedData, ScraperYield, YieldStream};
use crate::queue::{PushResult, RequestQueue};
use crate::request::{Request, ResolveContext, SpeculationId};
use crate::response::Response;
use crate::scraper::{Invocation, Scraper, StepInput};
use crate::speculation::{Extension, SpeculationConfig, SpeculationEngine};
use crate::state::{DriverState, StopSignal};
use crate::stats::StatCollector;

/// Whether the run continues after a processed request.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

pub(crate) struct DriverCore<S: Scraper> {
    pub scraper: Arc<S>,
    pub queue: RequestQueue,
    pub fetcher: Arc<dyn Fetcher>,
    pub hooks: Hooks<S::Record>,
    pub speculation: SpeculationEngine,
    pub state: DriverState,
    pub stats: Arc<StatCollector>,
    pub stop: StopSignal,
    pub storage_dir: PathBuf,
    pub invocations: Vec<Invocation>,
    pub speculation_overrides: BTreeMap<String, SpeculationConfig>,
    /// Step name → declared priority, resolved once at construction.
    step_priorities: BTreeMap<String, i32>,
}

impl<S: Scraper> DriverCore<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        scraper: Arc<S>,
        fetcher: Arc<dyn Fetcher>,
        hooks: Hooks<S::Record>,
        stop: StopSignal,
        storage_dir: PathBuf,
        invocations: Vec<Invocation>,
        speculation_overrides: BTreeMap<String, SpeculationConfig>,
    ) -> Self {
        let step_priorities = scraper
            .steps()
            .into_iter()
            .map(|s| (s.name, s.priority))
            .collect();
        DriverCore {
            scraper,
            queue: RequestQueue::new(),
            fetcher,
            hooks,
            speculation: SpeculationEngine::new(),
            state: DriverState::new(),
            stats: Arc::new(StatCollector::new()),
            stop,
            storage_dir,
            invocations,
            speculation_overrides,
            step_priorities,
        }
    }

    /// Priority an enqueued request is served at: explicit value, then
    /// the archive default of 1, then the target step's declared
    /// priority, then 9.
    fn effective_priority(&self, request: &Request) -> i32 {
        if let Some(p) = request.priority {
            return p;
        }
        if request.archive {
            return 1;
        }
        self.step_priorities
            .get(&request.continuation)
            .copied()
            .unwrap_or(9)
    }

    /// Push a request through the duplicate filter. A deduplicated
    /// speculative request counts as a failure for its speculator, and
    /// the frontier may release the next ID in its stead; the loop
    /// keeps going while extensions themselves get deduplicated.
    pub(crate) fn enqueue(&self, request: Request) -> Result<(), ScrapeError> {
        let mut next = Some(request);
        while let Some(req) = next.take() {
            let priority = self.effective_priority(&req);
            match self
                .queue
                .push(req, priority, self.hooks.duplicate_check.as_deref())
            {
                PushResult::Queued => self.stats.increment_requests_enqueued(),
                PushResult::Duplicate(speculation) => {
                    self.stats.increment_duplicates_skipped();
                    if let Some(id) = speculation {
                        if let Extension::Enqueue(n) = self.speculation.record(&id, false) {
                            next = Some(self.speculative_request(&id.speculator, n)?);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn speculative_request(&self, speculator: &str, id: u64) -> Result<Request, ScrapeError> {
        Ok(self
            .scraper
            .speculate(speculator, id)?
            .speculative(speculator, id))
    }

    /// Seed the queue: entry invocations first, then every speculator's
    /// definite range and initial probe.
    pub(crate) fn seed(&self) -> Result<(), ScrapeError> {
        let invocations = if self.invocations.is_empty() {
            default_invocations(self.scraper.as_ref())
        } else {
            self.invocations.clone()
        };
        if !invocations.is_empty() {
            for request in self.scraper.initial_seed(&invocations)? {
                self.enqueue(request)?;
            }
        }

        for (name, spec) in self.scraper.speculators() {
            let config = self.speculation_overrides.get(&name);
            let range = self.speculation.register(&name, &spec, config);
            debug!(
                speculator = %name,
                start = range.start,
                end = range.end,
                "seeding speculative requests"
            );
            for id in range.ids() {
                let request = self.speculative_request(&name, id)?;
                self.enqueue(request)?;
            }
        }
        Ok(())
    }

    /// Record a speculative outcome and enqueue the released probe, if
    /// any.
    fn track_speculation(&self, id: &SpeculationId, success: bool) -> Result<(), ScrapeError> {
        if let Extension::Enqueue(n) = self.speculation.record(id, success) {
            let request = self.speculative_request(&id.speculator, n)?;
            self.enqueue(request)?;
        }
        Ok(())
    }

    /// One full cycle for a popped request: fetch, archive, classify
    /// the speculative outcome, invoke the continuation, dispatch its
    /// yields.
    pub(crate) async fn process(&self, request: Request) -> Result<Flow, ScrapeError> {
        self.stats.increment_requests_sent();
        trace!(url = %request.http.url, continuation = %request.continuation, "processing request");

        let raw = match self.fetcher.fetch(&request).await {
            Ok(raw) => raw,
            Err(FetchFailure::Skip) => {
                debug!(url = %request.http.url, "fetch layer skipped request");
                return Ok(Flow::Continue);
            }
            Err(FetchFailure::Halt) => return Err(ScrapeError::Halted),
            Err(FetchFailure::Transient(e)) => {
                self.stats.increment_requests_failed();
                // A transient failure is a non-2xx outcome for
                // speculation purposes.
                if let Some(id) = request.speculation.clone() {
                    self.track_speculation(&id, false)?;
                }
                return match &self.hooks.on_transient_exception {
                    Some(callback) => {
                        if callback(&e) {
                            Ok(Flow::Continue)
                        } else {
                            debug!("transient callback requested stop");
                            Ok(Flow::Stop)
                        }
                    }
                    None => Err(e.into()),
                };
            }
        };

        self.stats.increment_requests_succeeded();
        self.stats.record_response_status(raw.status);

        let archive_path = if request.archive {
            let path = match &self.hooks.on_archive {
                Some(sink) => sink(
                    &raw.body,
                    &raw.url,
                    request.expected_type.as_deref(),
                    &self.storage_dir,
                )?,
                None => default_archive_sink(
                    &raw.body,
                    &raw.url,
                    request.expected_type.as_deref(),
                    &self.storage_dir,
                )?,
            };
            self.stats.increment_archives_stored();
            Some(path)
        } else {
            None
        };

        let response = Response::from_raw(raw, request, archive_path);

        if let Some(id) = response.request.speculation.clone() {
            let success =
                response.is_success() && !self.scraper.fails_successfully(&response);
            self.track_speculation(&id, success)?;
        }

        let continuation = response.request.continuation.clone();
        let input = StepInput::new(response);
        let stream = match self.scraper.step(&continuation, &input) {
            Ok(stream) => stream,
            // A structural failure while preparing the step is handled
            // the same way as one raised mid-sequence.
            Err(ScrapeError::Assumption(e)) => return self.structural_failure(&e),
            Err(other) => return Err(other),
        };
        self.dispatch(stream, &input)
    }

    /// Pull items off the yield stream one at a time, dispatching each
    /// before the next is produced.
    fn dispatch(
        &self,
        stream: YieldStream<S::Record>,
        input: &StepInput,
    ) -> Result<Flow, ScrapeError> {
        for item in stream {
            match item {
                Ok(ScraperYield::Data(data)) => self.handle_data(data)?,
                Ok(ScraperYield::Request(next)) => {
                    let resolved = if next.nonnavigating && !next.archive {
                        next.resolve_from(ResolveContext::Request(input.request()))?
                    } else {
                        next.resolve_from(ResolveContext::Response(input.response()))?
                    };
                    self.enqueue(resolved)?;
                }
                Ok(ScraperYield::Nothing) => {}
                Err(e) => return self.structural_failure(&e),
            }
        }
        Ok(Flow::Continue)
    }

    fn structural_failure(&self, error: &AssumptionError) -> Result<Flow, ScrapeError> {
        warn!(%error, "structural assumption failure");
        match &self.hooks.on_structural_error {
            Some(callback) => {
                if callback(error) {
                    Ok(Flow::Continue)
                } else {
                    Ok(Flow::Stop)
                }
            }
            None => Err(ScrapeError::Assumption(clone_assumption(error))),
        }
    }

    fn handle_data(&self, data: ParsedData<S::Record>) -> Result<(), ScrapeError> {
        match data {
            ParsedData::Ready(record) => {
                self.stats.increment_items_scraped();
                if let Some(callback) = &self.hooks.on_data {
                    callback(record);
                }
            }
            ParsedData::Deferred(deferred) => match deferred.confirm() {
                Ok(record) => {
                    self.stats.increment_items_scraped();
                    if let Some(callback) = &self.hooks.on_data {
                        callback(record);
                    }
                }
                Err(error) => {
                    self.stats.increment_items_invalid();
                    match &self.hooks.on_invalid_data {
                        Some(callback) => callback(&deferred),
                        None => return Err(error.into()),
                    }
                }
            },
        }
        Ok(())
    }

    pub(crate) fn run_name(&self) -> String {
        self.scraper.name().to_string()
    }

    /// Re-seed the queue from a checkpoint taken by a previous run.
    pub(crate) fn restore(&self, checkpoint: crate::checkpoint::QueueCheckpoint) {
        self.queue
            .restore(checkpoint.pending, checkpoint.seen_keys, |request| {
                self.effective_priority(request)
            });
    }
}

/// With no explicit invocations, every zero-parameter non-speculative
/// entry is invoked once.
fn default_invocations<S: Scraper>(scraper: &S) -> Vec<Invocation> {
    scraper
        .entries()
        .into_iter()
        .filter(|e| !e.is_speculative() && e.params.is_empty())
        .map(|e| Invocation::new(e.name))
        .collect()
}

// AssumptionError holds no non-cloneable state, but exposing Clone on
// the public error would freeze that; rebuild locally instead.
fn clone_assumption(error: &AssumptionError) -> AssumptionError {
    match error {
        AssumptionError::Scraper {
            message,
            url,
            context,
        } => AssumptionError::Scraper {
            message: message.clone(),
            url: url.clone(),
            context: context.clone(),
        },
        AssumptionError::HtmlStructure {
            selector,
            selector_kind,
            description,
            expected_min,
            expected_max,
            actual,
            url,
        } => AssumptionError::HtmlStructure {
            selector: selector.clone(),
            selector_kind: *selector_kind,
            description: description.clone(),
            expected_min: *expected_min,
            expected_max: *expected_max,
            actual: *actual,
            url: url.clone(),
        },
        AssumptionError::DataFormat(e) => AssumptionError::DataFormat(e.clone()),
    }
}
