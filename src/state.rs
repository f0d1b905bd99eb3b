//! Shared run state: in-flight tracking and the cooperative stop signal.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Tracks how many requests are currently between pop and dispatch
/// completion. Pool workers use this to tell "queue momentarily empty
/// while a peer may still enqueue" apart from "run finished".
#[derive(Debug, Default)]
pub struct DriverState {
    in_flight: AtomicUsize,
}

impl DriverState {
    pub fn new() -> Self {
        DriverState::default()
    }

    pub(crate) fn start_one(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn finish_one(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }
}

/// Cooperative cancellation flag, observed by the driver before each
/// queue pop. Clone it freely; all clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        StopSignal::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
