//! # Speculation Engine
//!
//! Probes sequential integer ID spaces that expose no enumerable index.
//!
//! Every speculator gets a **definite range** fetched unconditionally
//! (from a consumer override, or `1..=highest_observed`) and a
//! tolerance `plus` of consecutive post-range failures (override, or
//! `largest_observed_gap`). Beyond the range the engine keeps exactly
//! one probe in flight: the outcome of the frontier ID either resets
//! (success) or increments (failure) the counter, and while the counter
//! stays below `plus` the next ID is released. `plus = 0` disables
//! probing beyond the definite range.
//!
//! A deduplicated speculative request is recorded as a failure so
//! aliased URLs cannot extend the frontier forever. Each speculator has
//! an independent counter; one mutex guards all of them.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::request::SpeculationId;
use crate::scraper::SpeculationSpec;

/// Per-run consumer overrides for one speculator.
#[derive(Debug, Clone, Default)]
pub struct SpeculationConfig {
    /// Fetch every ID in this closed interval unconditionally,
    /// ignoring failure counts.
    pub definite_range: Option<(u64, u64)>,
    /// Consecutive failures tolerated beyond the definite range before
    /// stopping. Falls back to the speculator's
    /// `largest_observed_gap`.
    pub plus: Option<u64>,
}

/// The IDs to enqueue when a speculator is seeded.
#[derive(Debug, PartialEq, Eq)]
pub struct SeedRange {
    pub start: u64,
    pub end: u64,
    /// First post-range probe, when the tolerance allows probing.
    pub probe: Option<u64>,
}

impl SeedRange {
    /// All IDs to enqueue at seed time, definite range plus the probe.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        (self.start..=self.end).chain(self.probe.iter().copied())
    }
}

/// What the driver must do after an outcome is recorded.
#[derive(Debug, PartialEq, Eq)]
pub enum Extension {
    /// Enqueue the next probe for this speculator.
    Enqueue(u64),
    None,
}

#[derive(Debug)]
struct SpeculatorState {
    definite_end: u64,
    plus: u64,
    /// Highest ID handed out so far.
    frontier: u64,
    consecutive_failures: u64,
    stopped: bool,
}

/// Tracks probing state for every speculator of a run.
#[derive(Debug, Default)]
pub struct SpeculationEngine {
    states: Mutex<BTreeMap<String, SpeculatorState>>,
}

impl SpeculationEngine {
    pub fn new() -> Self {
        SpeculationEngine::default()
    }

    /// Register a speculator, resolving the effective range and
    /// tolerance, and return what to seed.
    pub fn register(
        &self,
        name: &str,
        spec: &SpeculationSpec,
        config: Option<&SpeculationConfig>,
    ) -> SeedRange {
        let (start, end) = config
            .and_then(|c| c.definite_range)
            .unwrap_or((1, spec.highest_observed));
        let plus = config
            .and_then(|c| c.plus)
            .unwrap_or(spec.largest_observed_gap);

        let probe = (plus > 0).then_some(end + 1);
        let frontier = probe.unwrap_or(end);
        debug!(speculator = name, start, end, plus, "speculator registered");

        self.states.lock().insert(
            name.to_string(),
            SpeculatorState {
                definite_end: end,
                plus,
                frontier,
                consecutive_failures: 0,
                stopped: plus == 0,
            },
        );
        SeedRange { start, end, probe }
    }

    /// Record the outcome of a speculative request (including a
    /// dedup-skip, which counts as a failure) and decide whether the
    /// frontier advances.
    pub fn record(&self, id: &SpeculationId, success: bool) -> Extension {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(&id.speculator) else {
            return Extension::None;
        };

        // Only post-range outcomes touch the counter: the definite
        // range is fetched unconditionally, and letting its stragglers
        // reset the counter would make pooled runs nondeterministic.
        if id.id > state.definite_end {
            if success {
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures += 1;
            }
        }

        if state.stopped || id.id != state.frontier {
            return Extension::None;
        }

        if state.consecutive_failures < state.plus {
            state.frontier += 1;
            trace!(
                speculator = %id.speculator,
                next = state.frontier,
                failures = state.consecutive_failures,
                "extending speculation"
            );
            Extension::Enqueue(state.frontier)
        } else {
            state.stopped = true;
            debug!(
                speculator = %id.speculator,
                failures = state.consecutive_failures,
                "speculation stopped"
            );
            Extension::None
        }
    }

    pub fn is_stopped(&self, speculator: &str) -> bool {
        self.states
            .lock()
            .get(speculator)
            .map(|s| s.stopped)
            .unwrap_or(true)
    }
}
