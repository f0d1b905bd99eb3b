//! # magpie
//!
//! Scraper-execution engine: takes a declarative scraper (typed entry
//! points, named parsing steps, optional ID speculators) and drives it
//! through an HTTP interaction graph to completion, collecting
//! structured results while handling errors, deduplication, priority,
//! speculation over unknown ID ranges, and graceful interruption.
//!
//! ## Example
//!
//! ```rust,ignore
//! use magpie::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Docket {
//!     number: String,
//!     case_name: String,
//! }
//!
//! struct CourtScraper;
//!
//! impl Scraper for CourtScraper {
//!     type Record = Docket;
//!
//!     fn name(&self) -> &str { "court" }
//!
//!     fn entries(&self) -> Vec<EntrySpec> {
//!         vec![EntrySpec::new("recent", "Docket")]
//!     }
//!
//!     fn seed(&self, entry: &str, _params: &DataMap) -> Result<Vec<Request>, ScrapeError> {
//!         match entry {
//!             "recent" => Ok(vec![Request::navigate(
//!                 "https://court.example/cases",
//!                 "parse_listing",
//!             )]),
//!             other => Err(ScrapeError::UnknownEntry(other.into())),
//!         }
//!     }
//!
//!     fn step(&self, name: &str, input: &StepInput) -> Result<YieldStream<Docket>, ScrapeError> {
//!         match name {
//!             "parse_listing" => {
//!                 let mut out = Vec::new();
//!                 for row in input.json()?["cases"].as_array().into_iter().flatten() {
//!                     out.push(Ok(ScraperYield::deferred(row.clone(), &input.response().url)));
//!                 }
//!                 Ok(yields(out))
//!             }
//!             other => Err(ScrapeError::UnknownStep(other.into())),
//!         }
//!     }
//! }
//!
//! # async fn run() -> Result<(), ScrapeError> {
//! let driver = DriverBuilder::new(CourtScraper)
//!     .on_data(|docket| println!("{docket:?}"))
//!     .build()?;
//! driver.run().await
//! # }
//! ```

pub mod builder;
pub mod checkpoint;
pub mod driver;
pub mod error;
pub mod fetch;
pub mod hooks;
pub mod item;
pub mod prelude;
pub mod queue;
pub mod request;
pub mod response;
pub mod scraper;
pub mod speculation;
pub mod state;
pub mod stats;

pub use builder::DriverBuilder;
pub use checkpoint::QueueCheckpoint;
pub use driver::{PoolDriver, SerialDriver};
pub use error::{AssumptionError, FetchFailure, ScrapeError, TransientError};
pub use fetch::{Fetcher, HttpFetcher, RetryPolicy, RetryingFetcher};
pub use hooks::RunStatus;
pub use item::{DeferredValidation, ParsedData, ScrapedRecord, ScraperYield, YieldStream};
pub use request::{Body, DataMap, DedupKey, Method, Permanent, Request};
pub use response::{RawResponse, Response};
pub use scraper::{EntrySpec, Invocation, ParamKind, Scraper, SpeculationSpec, StepInput, StepSpec};
pub use speculation::SpeculationConfig;
pub use state::StopSignal;
pub use stats::StatCollector;

pub use async_trait::async_trait;
pub use tokio;
