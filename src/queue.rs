//! # Request Queue
//!
//! Min-priority queue over `(priority, insertion counter)` with the
//! duplicate filter applied before enqueue.
//!
//! Ordering guarantees:
//!
//! - Lowest priority number pops first.
//! - Ties break FIFO: the insertion counter is monotonically increasing
//!   and assigned under the queue mutex, so equal-priority requests pop
//!   in enqueue order even when several workers enqueue concurrently.
//! - The queue is not observable in ordered form; only `pop` is defined.
//!
//! Deduplication runs at push time: compute the request's key, consult
//! the seen-set (or a caller-supplied predicate), and skip the push when
//! the key was already seen. The skip sentinel bypasses the filter.
//! Keys are marked at enqueue time.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use parking_lot::Mutex;
use tracing::trace;

use crate::request::{Request, SpeculationId};
use crate::state::DriverState;

/// Outcome of a push attempt.
#[derive(Debug)]
pub enum PushResult {
    Queued,
    /// The duplicate filter rejected the request. Carries the
    /// speculation identity, if any, so the caller can count the skip
    /// as a speculative failure.
    Duplicate(Option<SpeculationId>),
}

/// Caller-supplied replacement for the in-memory seen-set. Returns
/// `true` to enqueue, `false` to skip.
pub type DuplicateCheck = dyn Fn(&str) -> bool + Send + Sync;

#[derive(Debug)]
struct Entry {
    priority: i32,
    seq: u64,
    request: Request,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

#[derive(Debug, Default)]
struct Inner {
    heap: BinaryHeap<Reverse<Entry>>,
    seq: u64,
    seen: HashSet<String>,
}

/// The shared request queue. One mutex guards the heap, the FIFO
/// counter, and the seen-set; `pop` bumps the in-flight counter under
/// the same lock so emptiness checks cannot race a concurrent pop.
#[derive(Debug, Default)]
pub struct RequestQueue {
    inner: Mutex<Inner>,
}

impl RequestQueue {
    pub fn new() -> Self {
        RequestQueue::default()
    }

    /// Push a request at the given effective priority, subject to the
    /// duplicate filter.
    pub fn push(
        &self,
        request: Request,
        priority: i32,
        duplicate_check: Option<&DuplicateCheck>,
    ) -> PushResult {
        let mut inner = self.inner.lock();
        if let Some(key) = request.dedup_key() {
            let fresh = match duplicate_check {
                Some(check) => check(&key),
                None => inner.seen.insert(key),
            };
            if !fresh {
                trace!(url = %request.http.url, "duplicate request skipped");
                return PushResult::Duplicate(request.speculation.clone());
            }
        }
        let seq = inner.seq;
        inner.seq += 1;
        trace!(url = %request.http.url, priority, seq, "request enqueued");
        inner.heap.push(Reverse(Entry {
            priority,
            seq,
            request,
        }));
        PushResult::Queued
    }

    /// Pop the lowest-ordered request, registering it as in-flight
    /// before the lock is released.
    pub fn pop(&self, state: &DriverState) -> Option<Request> {
        let mut inner = self.inner.lock();
        let entry = inner.heap.pop()?;
        state.start_one();
        Some(entry.0.request)
    }

    /// Discard all pending requests; returns how many were dropped.
    pub fn drain(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.heap.len();
        inner.heap.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot pending requests (in pop order) and the seen keys,
    /// without disturbing the queue. Used for checkpointing.
    pub fn snapshot(&self) -> (Vec<Request>, HashSet<String>) {
        let inner = self.inner.lock();
        let mut entries: Vec<&Reverse<Entry>> = inner.heap.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let pending = entries.into_iter().map(|e| e.0.request.clone()).collect();
        (pending, inner.seen.clone())
    }

    /// Re-seed the queue from a snapshot, preserving relative order.
    pub fn restore(&self, pending: Vec<Request>, seen: HashSet<String>, priority_of: impl Fn(&Request) -> i32) {
        let mut inner = self.inner.lock();
        inner.seen.extend(seen);
        for request in pending {
            let priority = priority_of(&request);
            let seq = inner.seq;
            inner.seq += 1;
            inner.heap.push(Reverse(Entry {
                priority,
                seq,
                request,
            }));
        }
    }
}
