//! # Driver Module
//!
//! The execution engine: owns the request queue, performs the
//! fetch-and-dispatch cycle, surfaces lifecycle and per-event hooks,
//! and handles graceful stop.
//!
//! Two flavors share one core and have identical observable contracts
//! (same hooks, same queue semantics, same dispatch):
//!
//! - [`SerialDriver`] — a single consumer; cancellation drains the
//!   queue and exits ("stop immediately").
//! - [`PoolDriver`] — N cooperative workers over the shared queue;
//!   cancellation lets each worker finish its current request and exits
//!   **without** draining, preserving pending work for checkpointing.

mod core;
mod pool;
mod serial;

pub(crate) use self::core::{DriverCore, Flow};
pub use pool::PoolDriver;
pub use serial::SerialDriver;

use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use url::Url;

/// Default archive sink: name the file after the URL's last path
/// segment, or synthesize `download_<digest><ext>` from the URL hash
/// and the expected-type extension; write into the storage directory
/// and return the path.
pub fn default_archive_sink(
    body: &[u8],
    url: &str,
    expected_type: Option<&str>,
    storage_dir: &Path,
) -> io::Result<PathBuf> {
    let from_url = Url::parse(url).ok().and_then(|u| {
        u.path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
    });
    let filename = match from_url {
        Some(name) => name,
        None => {
            let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
            let ext = match expected_type {
                Some("pdf") => ".pdf",
                Some("audio") => ".mp3",
                _ => "",
            };
            format!("download_{}{ext}", &digest[..16])
        }
    };
    let path = storage_dir.join(filename);
    std::fs::write(&path, body)?;
    Ok(path)
}
