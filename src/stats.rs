//! # Statistics Module
//!
//! Collects counters about a run for monitoring and diagnostics.
//!
//! All updates are atomic so both driver flavors share one collector
//! without locking. A [`snapshot`](StatCollector::snapshot) captures a
//! consistent view for reporting; `Display` and JSON export work off
//! the snapshot.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

/// A consistent view of the counters at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub requests_enqueued: usize,
    pub requests_sent: usize,
    pub requests_succeeded: usize,
    pub requests_failed: usize,
    pub duplicates_skipped: usize,
    pub items_scraped: usize,
    pub items_invalid: usize,
    pub archives_stored: usize,
    pub response_status_counts: BTreeMap<u16, usize>,
    #[serde(skip)]
    pub elapsed: Duration,
    pub elapsed_secs: f64,
}

impl StatsSnapshot {
    fn requests_per_second(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.requests_sent as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

/// Live counters of a run.
#[derive(Debug)]
pub struct StatCollector {
    start_time: Instant,
    requests_enqueued: AtomicUsize,
    requests_sent: AtomicUsize,
    requests_succeeded: AtomicUsize,
    requests_failed: AtomicUsize,
    duplicates_skipped: AtomicUsize,
    items_scraped: AtomicUsize,
    items_invalid: AtomicUsize,
    archives_stored: AtomicUsize,
    response_status_counts: DashMap<u16, usize>,
}

impl StatCollector {
    pub fn new() -> Self {
        StatCollector {
            start_time: Instant::now(),
            requests_enqueued: AtomicUsize::new(0),
            requests_sent: AtomicUsize::new(0),
            requests_succeeded: AtomicUsize::new(0),
            requests_failed: AtomicUsize::new(0),
            duplicates_skipped: AtomicUsize::new(0),
            items_scraped: AtomicUsize::new(0),
            items_invalid: AtomicUsize::new(0),
            archives_stored: AtomicUsize::new(0),
            response_status_counts: DashMap::new(),
        }
    }

    pub(crate) fn increment_requests_enqueued(&self) {
        self.requests_enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_succeeded(&self) {
        self.requests_succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_duplicates_skipped(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_scraped(&self) {
        self.items_scraped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_invalid(&self) {
        self.items_invalid.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_archives_stored(&self) {
        self.archives_stored.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_response_status(&self, status: u16) {
        *self.response_status_counts.entry(status).or_insert(0) += 1;
    }

    pub fn requests_sent(&self) -> usize {
        self.requests_sent.load(Ordering::SeqCst)
    }

    pub fn items_scraped(&self) -> usize {
        self.items_scraped.load(Ordering::SeqCst)
    }

    /// Capture a consistent view for reporting.
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut status_counts = BTreeMap::new();
        for entry in self.response_status_counts.iter() {
            status_counts.insert(*entry.key(), *entry.value());
        }
        let elapsed = self.start_time.elapsed();
        StatsSnapshot {
            requests_enqueued: self.requests_enqueued.load(Ordering::SeqCst),
            requests_sent: self.requests_sent.load(Ordering::SeqCst),
            requests_succeeded: self.requests_succeeded.load(Ordering::SeqCst),
            requests_failed: self.requests_failed.load(Ordering::SeqCst),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::SeqCst),
            items_scraped: self.items_scraped.load(Ordering::SeqCst),
            items_invalid: self.items_invalid.load(Ordering::SeqCst),
            archives_stored: self.archives_stored.load(Ordering::SeqCst),
            response_status_counts: status_counts,
            elapsed,
            elapsed_secs: elapsed.as_secs_f64(),
        }
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.snapshot())
    }

    pub fn to_json_string_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.snapshot();
        writeln!(f, "\nRun Statistics")?;
        writeln!(f, "--------------")?;
        writeln!(f, "  duration : {:?}", s.elapsed)?;
        writeln!(f, "  speed    : {:.2} req/s", s.requests_per_second())?;
        writeln!(
            f,
            "  requests : enqueued: {}, sent: {}, ok: {}, fail: {}, dup-skip: {}",
            s.requests_enqueued,
            s.requests_sent,
            s.requests_succeeded,
            s.requests_failed,
            s.duplicates_skipped
        )?;
        writeln!(
            f,
            "  items    : scraped: {}, invalid: {}, archived: {}",
            s.items_scraped, s.items_invalid, s.archives_stored
        )?;
        let status = if s.response_status_counts.is_empty() {
            "none".to_string()
        } else {
            s.response_status_counts
                .iter()
                .map(|(code, count)| format!("{code}: {count}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        writeln!(f, "  status   : {status}")
    }
}
