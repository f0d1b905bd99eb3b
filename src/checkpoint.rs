//! # Checkpoint Module
//!
//! Snapshot of pending work for resuming an interrupted run.
//!
//! Because requests are serializable records (continuations are step
//! names), a [`QueueCheckpoint`] captures the pending requests in pop
//! order plus the seen deduplication keys. The pool driver exits
//! without draining the queue on cancellation precisely so this
//! snapshot has something to save.
//!
//! Encoding is MessagePack; saves go through a temporary file and an
//! atomic rename. The on-disk format is internal to this crate.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ScrapeError;
use crate::queue::RequestQueue;
use crate::request::Request;

/// Pending requests and seen dedup keys of an interrupted run.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct QueueCheckpoint {
    /// Pending requests in pop order.
    pub pending: Vec<Request>,
    /// Deduplication keys already marked seen.
    pub seen_keys: HashSet<String>,
}

impl QueueCheckpoint {
    pub(crate) fn capture(queue: &RequestQueue) -> Self {
        let (pending, seen_keys) = queue.snapshot();
        QueueCheckpoint { pending, seen_keys }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.seen_keys.is_empty()
    }

    /// Serialize and write atomically: encode, write a `.tmp` sibling,
    /// rename over the target.
    pub fn save(&self, path: &Path) -> Result<(), ScrapeError> {
        let encoded = rmp_serde::to_vec(self)
            .map_err(|e| ScrapeError::Checkpoint(format!("failed to serialize: {e}")))?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, encoded)?;
        fs::rename(&tmp_path, path)?;
        info!(path = %path.display(), pending = self.pending.len(), "checkpoint saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ScrapeError> {
        let bytes = fs::read(path)?;
        let checkpoint = rmp_serde::from_slice(&bytes)
            .map_err(|e| ScrapeError::Checkpoint(format!("failed to deserialize: {e}")))?;
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RequestQueue;

    #[test]
    fn checkpoint_round_trips_through_disk() {
        let queue = RequestQueue::new();
        queue.push(Request::navigate("https://e.com/a", "parse"), 9, None);
        queue.push(
            Request::archive("https://e.com/b.pdf", "save").with_expected_type("pdf"),
            1,
            None,
        );

        let checkpoint = QueueCheckpoint::capture(&queue);
        assert_eq!(checkpoint.pending.len(), 2);
        // Archive request pops first at priority 1.
        assert_eq!(checkpoint.pending[0].http.url, "https://e.com/b.pdf");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.checkpoint");
        checkpoint.save(&path).unwrap();

        let restored = QueueCheckpoint::load(&path).unwrap();
        assert_eq!(restored.pending.len(), 2);
        assert_eq!(restored.seen_keys, checkpoint.seen_keys);
        assert!(restored.pending[0].archive);
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.checkpoint");
        std::fs::write(&path, b"not msgpack").unwrap();
        assert!(matches!(
            QueueCheckpoint::load(&path),
            Err(ScrapeError::Checkpoint(_))
        ));
    }
}
