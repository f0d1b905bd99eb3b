//! Error taxonomy for the scraper engine.
//!
//! Three axes govern how a failure is handled:
//!
//! - **Permanent vs transient.** [`AssumptionError`] means the scraper's
//!   assumptions about the target (structure, data format) no longer hold
//!   and retrying cannot help. [`TransientError`] means the transport
//!   failed in a way that may succeed on retry (5xx, 429, timeout).
//! - **Per-item vs per-run.** Structural and validation failures are
//!   reported per yielded item; transient failures per request. The
//!   matching hook decides whether the run continues.
//! - **Fatal vs recoverable.** With no hook registered, any failure
//!   propagates out of `run()` and ends the run.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

/// Which selector language a structural assertion used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    Xpath,
    Css,
}

impl SelectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorKind::Xpath => "xpath",
            SelectorKind::Css => "css",
        }
    }
}

/// A single field-level validation failure.
#[derive(Debug, Clone)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Details of a schema validation failure on scraped data.
///
/// Carried by [`AssumptionError::DataFormat`]; keeps the document that
/// failed so it can be inspected or persisted by an error handler.
#[derive(Debug, Clone)]
pub struct DataFormatError {
    pub errors: Vec<FieldError>,
    pub failed_doc: Value,
    pub model: String,
    pub url: String,
}

impl DataFormatError {
    fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for DataFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "data validation failed for model '{}': {}",
            self.model,
            self.summary()
        )
    }
}

impl std::error::Error for DataFormatError {}

/// A scraper assumption that no longer holds. Permanent: the scraper
/// code or its expected schema is wrong for the current target.
#[derive(Debug, Error)]
pub enum AssumptionError {
    /// Generic assumption violation with free-form context.
    #[error("{message} (url: {url})")]
    Scraper {
        message: String,
        url: String,
        context: BTreeMap<String, String>,
    },

    /// A selector matched a different number of elements than declared.
    #[error(
        "HTML structure mismatch: expected {} elements for '{description}', found {actual} (url: {url})",
        expected_range(.expected_min, .expected_max)
    )]
    HtmlStructure {
        selector: String,
        selector_kind: SelectorKind,
        description: String,
        expected_min: usize,
        expected_max: Option<usize>,
        actual: usize,
        url: String,
    },

    /// Scraped data failed schema validation.
    #[error(transparent)]
    DataFormat(DataFormatError),
}

impl AssumptionError {
    /// Shorthand for the generic variant without extra context.
    pub fn scraper(message: impl Into<String>, url: impl Into<String>) -> Self {
        AssumptionError::Scraper {
            message: message.into(),
            url: url.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn is_data_format(&self) -> bool {
        matches!(self, AssumptionError::DataFormat(_))
    }
}

fn expected_range(min: &usize, max: &Option<usize>) -> String {
    match max {
        None => format!("at least {min}"),
        Some(max) if max == min => format!("exactly {min}"),
        Some(max) => format!("between {min} and {max}"),
    }
}

/// A transport failure that may succeed on retry.
#[derive(Debug, Clone, Error)]
pub enum TransientError {
    /// Server answered with a status outside the expected set (5xx, 429).
    #[error("HTTP {status} from {url} (expected one of: {})", format_codes(.expected))]
    UnexpectedStatus {
        status: u16,
        expected: Vec<u16>,
        url: String,
    },

    /// The request exceeded the configured timeout.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: f64 },

    /// Connection-level failure below the HTTP layer.
    #[error("transport failure for {url}: {message}")]
    Transport { url: String, message: String },
}

fn format_codes(codes: &[u16]) -> String {
    codes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure modes of the fetch layer, as seen by the driver.
///
/// [`HttpFetcher`](crate::fetch::HttpFetcher) only ever produces
/// `Transient`; persistence-backed fetchers use `Halt` and `Skip` to
/// steer the driver without raising a scraper-facing error.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error(transparent)]
    Transient(#[from] TransientError),

    /// Stop the whole run.
    #[error("fetch layer requested a halt")]
    Halt,

    /// Drop this request silently and continue with the next.
    #[error("fetch layer requested a skip")]
    Skip,
}

/// Top-level error surfaced out of `run()`.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Assumption(#[from] AssumptionError),

    #[error(transparent)]
    Transient(#[from] TransientError),

    #[error("unknown entry '{0}'")]
    UnknownEntry(String),

    #[error("unknown step '{0}'")]
    UnknownStep(String),

    #[error("unknown speculator '{0}'")]
    UnknownSpeculator(String),

    #[error("invalid parameters for entry '{entry}': {message}")]
    InvalidParams { entry: String, message: String },

    #[error("invalid URL '{url}': {message}")]
    Url { url: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("run halted by fetch layer")]
    Halted,

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<DataFormatError> for ScrapeError {
    fn from(e: DataFormatError) -> Self {
        ScrapeError::Assumption(AssumptionError::DataFormat(e))
    }
}
