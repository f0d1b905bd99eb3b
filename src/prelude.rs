//! A "prelude" for scraper authors.
//!
//! # Example
//!
//! ```
//! use magpie::prelude::*;
//! ```

pub use crate::builder::DriverBuilder;
pub use crate::error::{AssumptionError, ScrapeError, SelectorKind, TransientError};
pub use crate::fetch::{Fetcher, RetryPolicy};
pub use crate::item::{yields, DeferredValidation, ParsedData, ScraperYield, YieldStream};
pub use crate::request::{Body, DataMap, Method, Request};
pub use crate::response::Response;
pub use crate::scraper::{
    EntrySpec, Invocation, ParamKind, Scraper, SpeculationSpec, StepInput, StepSpec,
};
pub use crate::speculation::SpeculationConfig;
pub use crate::state::StopSignal;
pub use crate::async_trait;
