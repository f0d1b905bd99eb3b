//! Parsed output: what a continuation yields besides further requests.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{AssumptionError, DataFormatError, FieldError};
use crate::request::Request;

/// Marker for the datum type a scraper produces. Blanket-implemented
/// for anything serde can move in and out of JSON.
pub trait ScrapedRecord: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> ScrapedRecord for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A raw document plus its target schema, validated only when the
/// driver calls [`confirm`](DeferredValidation::confirm). Lets a step
/// assemble fields across several sources and hand the driver the
/// decision of what to do with an invalid document.
#[derive(Debug, Clone)]
pub struct DeferredValidation<T> {
    raw: Value,
    url: String,
    _model: PhantomData<fn() -> T>,
}

impl<T: ScrapedRecord> DeferredValidation<T> {
    pub fn new(raw: Value, url: impl Into<String>) -> Self {
        DeferredValidation {
            raw,
            url: url.into(),
            _model: PhantomData,
        }
    }

    /// Run schema validation, returning the typed record or the
    /// data-format error describing what failed.
    pub fn confirm(&self) -> Result<T, AssumptionError> {
        serde_json::from_value(self.raw.clone()).map_err(|e| {
            AssumptionError::DataFormat(DataFormatError {
                errors: vec![FieldError {
                    field: field_of(&e),
                    message: e.to_string(),
                }],
                failed_doc: self.raw.clone(),
                model: self.model_name().to_string(),
                url: self.url.clone(),
            })
        })
    }

    /// The raw unvalidated document.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn model_name(&self) -> &'static str {
        let full = std::any::type_name::<T>();
        full.rsplit("::").next().unwrap_or(full)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

// serde_json reports "missing field `x`" / "unknown field `x`" style
// messages; pull the backticked name out when present.
fn field_of(e: &serde_json::Error) -> String {
    let msg = e.to_string();
    match (msg.find('`'), msg.rfind('`')) {
        (Some(a), Some(b)) if b > a + 1 => msg[a + 1..b].to_string(),
        _ => "document".to_string(),
    }
}

/// Payload of a data yield: already typed, or deferred for validation.
#[derive(Debug)]
pub enum ParsedData<T> {
    Ready(T),
    Deferred(DeferredValidation<T>),
}

/// One value produced by a parsing step.
#[derive(Debug)]
pub enum ScraperYield<T> {
    Data(ParsedData<T>),
    Request(Request),
    /// Explicit no-op, ignored by the driver.
    Nothing,
}

impl<T: ScrapedRecord> ScraperYield<T> {
    pub fn data(record: T) -> Self {
        ScraperYield::Data(ParsedData::Ready(record))
    }

    pub fn deferred(raw: Value, url: impl Into<String>) -> Self {
        ScraperYield::Data(ParsedData::Deferred(DeferredValidation::new(raw, url)))
    }

    pub fn request(request: Request) -> Self {
        ScraperYield::Request(request)
    }
}

/// The finite lazy sequence a parsing step returns. The driver pulls
/// items one at a time and dispatches each before the next, so a
/// structural error raised mid-sequence is handled at the same layer as
/// one raised up-front.
pub type YieldStream<T> = Box<dyn Iterator<Item = Result<ScraperYield<T>, AssumptionError>> + Send>;

/// Wrap an eagerly built batch of yields as a stream.
pub fn yields<T: ScrapedRecord>(
    items: Vec<Result<ScraperYield<T>, AssumptionError>>,
) -> YieldStream<T> {
    Box::new(items.into_iter())
}
