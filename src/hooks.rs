//! Callback surface of the driver.
//!
//! Any subset may be registered. The default behavior in the absence of
//! a callback is: the error (structural, transient, or validation)
//! propagates and terminates the run.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::{AssumptionError, ScrapeError, TransientError};
use crate::item::DeferredValidation;

/// Outcome reported to `on_run_complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        }
    }
}

pub type OnRunStart = Box<dyn Fn(&str) + Send + Sync>;
pub type OnRunComplete = Box<dyn Fn(&str, RunStatus, Option<&ScrapeError>) + Send + Sync>;
pub type OnData<T> = Box<dyn Fn(T) + Send + Sync>;
pub type OnInvalidData<T> = Box<dyn Fn(&DeferredValidation<T>) + Send + Sync>;
/// Returns `true` to continue the run, `false` to stop it.
pub type OnStructuralError = Box<dyn Fn(&AssumptionError) -> bool + Send + Sync>;
/// Returns `true` to continue the run, `false` to stop it.
pub type OnTransientException = Box<dyn Fn(&TransientError) -> bool + Send + Sync>;
/// Substitute file sink: receives body, URL, expected-type hint, and
/// the storage directory; returns where the body was written.
pub type OnArchive =
    Box<dyn Fn(&[u8], &str, Option<&str>, &Path) -> io::Result<PathBuf> + Send + Sync>;
pub type DuplicateCheckHook = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// The registered callbacks of one driver. Callbacks run on the
/// dispatching worker; synchronization of shared state they touch is
/// the caller's responsibility.
pub struct Hooks<T> {
    pub(crate) on_run_start: Option<OnRunStart>,
    pub(crate) on_run_complete: Option<OnRunComplete>,
    pub(crate) on_data: Option<OnData<T>>,
    pub(crate) on_invalid_data: Option<OnInvalidData<T>>,
    pub(crate) on_structural_error: Option<OnStructuralError>,
    pub(crate) on_transient_exception: Option<OnTransientException>,
    pub(crate) on_archive: Option<OnArchive>,
    pub(crate) duplicate_check: Option<DuplicateCheckHook>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Hooks {
            on_run_start: None,
            on_run_complete: None,
            on_data: None,
            on_invalid_data: None,
            on_structural_error: None,
            on_transient_exception: None,
            on_archive: None,
            duplicate_check: None,
        }
    }
}

impl<T> std::fmt::Debug for Hooks<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = |o: bool| if o { "set" } else { "-" };
        f.debug_struct("Hooks")
            .field("on_run_start", &set(self.on_run_start.is_some()))
            .field("on_run_complete", &set(self.on_run_complete.is_some()))
            .field("on_data", &set(self.on_data.is_some()))
            .field("on_invalid_data", &set(self.on_invalid_data.is_some()))
            .field("on_structural_error", &set(self.on_structural_error.is_some()))
            .field(
                "on_transient_exception",
                &set(self.on_transient_exception.is_some()),
            )
            .field("on_archive", &set(self.on_archive.is_some()))
            .field("duplicate_check", &set(self.duplicate_check.is_some()))
            .finish()
    }
}
