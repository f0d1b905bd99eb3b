//! # Scraper Surface
//!
//! Defines the [`Scraper`] trait: the contract between a user-supplied
//! scraper and the driver.
//!
//! A scraper declares typed **entry points** (how a run starts), named
//! **parsing steps** (continuations invoked with responses), and
//! optional **speculators** (ID-probing request factories). Continuation
//! references are plain strings so every request stays serializable.
//!
//! Because the driver addresses steps by name, a scraper implements
//! [`Scraper::step`] as a dispatch over its registered step names; the
//! per-step metadata in [`Scraper::steps`] supplies queue priorities and
//! decoding hints.
//!
//! ## Example
//!
//! ```rust,ignore
//! use magpie::prelude::*;
//!
//! struct CourtScraper;
//!
//! impl Scraper for CourtScraper {
//!     type Record = serde_json::Value;
//!
//!     fn name(&self) -> &str { "court" }
//!
//!     fn entries(&self) -> Vec<EntrySpec> {
//!         vec![EntrySpec::new("recent", "Docket")]
//!     }
//!
//!     fn seed(&self, entry: &str, _params: &DataMap) -> Result<Vec<Request>, ScrapeError> {
//!         match entry {
//!             "recent" => Ok(vec![Request::navigate("https://court.example/cases", "parse_listing")]),
//!             other => Err(ScrapeError::UnknownEntry(other.into())),
//!         }
//!     }
//!
//!     fn step(&self, name: &str, input: &StepInput) -> Result<YieldStream<Self::Record>, ScrapeError> {
//!         match name {
//!             "parse_listing" => { /* build yields from input */ }
//!             other => Err(ScrapeError::UnknownStep(other.into())),
//!         }
//!     }
//! }
//! ```

use ::scraper::Html;
use chrono::NaiveDate;
use serde_json::Value;

use crate::error::{AssumptionError, ScrapeError};
use crate::item::{ScrapedRecord, YieldStream};
use crate::request::{DataMap, Request};
use crate::response::Response;

/// Parameter types an entry point accepts. Primitives are coerced from
/// their JSON renderings; `Model` parameters must be objects and are
/// validated by the scraper's own serde types inside `seed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    Int,
    Date,
    Model(&'static str),
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        ParamSpec {
            name: name.into(),
            kind,
        }
    }
}

/// Metadata of a speculative entry: what is known about the ID space.
#[derive(Debug, Clone)]
pub struct SpeculationSpec {
    /// Highest ID known to exist.
    pub highest_observed: u64,
    /// Greatest gap ever observed between consecutive present IDs; the
    /// default consecutive-failure budget.
    pub largest_observed_gap: u64,
    /// When the metadata was last verified. Documentation only.
    pub observation_date: Option<NaiveDate>,
}

impl Default for SpeculationSpec {
    fn default() -> Self {
        SpeculationSpec {
            highest_observed: 1,
            largest_observed_gap: 10,
            observation_date: None,
        }
    }
}

/// Metadata of one entry point.
#[derive(Debug, Clone)]
pub struct EntrySpec {
    pub name: String,
    /// Name of the datum type this entry produces.
    pub returns: &'static str,
    pub params: Vec<ParamSpec>,
    pub speculation: Option<SpeculationSpec>,
}

impl EntrySpec {
    pub fn new(name: impl Into<String>, returns: &'static str) -> Self {
        EntrySpec {
            name: name.into(),
            returns,
            params: Vec::new(),
            speculation: None,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(ParamSpec::new(name, kind));
        self
    }

    pub fn speculative(mut self, spec: SpeculationSpec) -> Self {
        self.speculation = Some(spec);
        self
    }

    pub fn is_speculative(&self) -> bool {
        self.speculation.is_some()
    }
}

/// Metadata of one parsing step.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub name: String,
    /// Default queue priority for requests targeting this step.
    pub priority: i32,
    /// Decoding hint for collaborators that re-decode raw bodies.
    pub encoding: &'static str,
}

impl StepSpec {
    pub fn new(name: impl Into<String>) -> Self {
        StepSpec {
            name: name.into(),
            priority: 9,
            encoding: "utf-8",
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// One typed entry invocation: `{entry_name: {param: value, ...}}`.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub entry: String,
    pub params: DataMap,
}

impl Invocation {
    pub fn new(entry: impl Into<String>) -> Self {
        Invocation {
            entry: entry.into(),
            params: DataMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Parse the single-key JSON wire form.
    pub fn from_value(value: &Value) -> Result<Self, ScrapeError> {
        let obj = value
            .as_object()
            .filter(|m| m.len() == 1)
            .ok_or_else(|| ScrapeError::Config("invocation must be a single-key object".into()))?;
        let (entry, params) = obj.iter().next().expect("length checked above");
        let params = params
            .as_object()
            .ok_or_else(|| ScrapeError::Config("invocation parameters must be an object".into()))?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Invocation {
            entry: entry.clone(),
            params,
        })
    }
}

/// Everything the driver computes for a parsing step. Content views
/// (`json`, `html`) are parsed on demand; a malformed document is a
/// structural failure of the scraper's assumptions.
pub struct StepInput {
    response: Response,
}

impl StepInput {
    pub fn new(response: Response) -> Self {
        StepInput { response }
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn request(&self) -> &Request {
        &self.response.request
    }

    pub fn previous_request(&self) -> Option<&Request> {
        self.response.request.parent()
    }

    pub fn accumulated(&self) -> &DataMap {
        &self.response.request.accumulated
    }

    pub fn aux(&self) -> &DataMap {
        &self.response.request.aux
    }

    pub fn text(&self) -> &str {
        &self.response.text
    }

    /// Response text parsed as JSON.
    pub fn json(&self) -> Result<Value, AssumptionError> {
        serde_json::from_str(&self.response.text).map_err(|e| {
            AssumptionError::scraper(format!("failed to parse JSON: {e}"), &self.response.url)
        })
    }

    /// Response text parsed as an HTML document.
    pub fn html(&self) -> Html {
        Html::parse_document(&self.response.text)
    }

    /// For archive responses, the path the body was persisted to.
    pub fn archive_path(&self) -> Option<&std::path::Path> {
        self.response.archive_path()
    }
}

/// Contract between a scraper and the driver.
pub trait Scraper: Send + Sync + 'static {
    /// The datum type this scraper collects.
    type Record: ScrapedRecord;

    fn name(&self) -> &str;

    /// Declared entry points with their parameter types and speculation
    /// metadata.
    fn entries(&self) -> Vec<EntrySpec>;

    /// Declared parsing steps. Steps missing here get default metadata
    /// (priority 9, utf-8).
    fn steps(&self) -> Vec<StepSpec> {
        Vec::new()
    }

    /// Produce the requests of one entry invocation. `params` has been
    /// validated and coerced against the entry's [`ParamSpec`]s.
    fn seed(&self, entry: &str, params: &DataMap) -> Result<Vec<Request>, ScrapeError>;

    /// Invoke the named parsing step. Implementations dispatch on
    /// `name` and return [`ScrapeError::UnknownStep`] for anything
    /// unregistered.
    fn step(&self, name: &str, input: &StepInput) -> Result<YieldStream<Self::Record>, ScrapeError>;

    /// Build the request probing one ID of a speculative entry. Only
    /// called for entries whose spec carries speculation metadata.
    fn speculate(&self, speculator: &str, _id: u64) -> Result<Request, ScrapeError> {
        Err(ScrapeError::UnknownSpeculator(speculator.to_string()))
    }

    /// Soft-404 detector: return `true` when a 2xx response actually
    /// represents "not found" (an error page served with a success
    /// status). Used to classify speculative outcomes.
    fn fails_successfully(&self, _response: &Response) -> bool {
        false
    }

    /// Customize the shared HTTP client, e.g. TLS settings for servers
    /// needing specific cipher suites.
    fn configure_http(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        builder
    }

    /// Dispatch a list of typed invocations to their entry points and
    /// collect the seeded requests, in invocation order.
    fn initial_seed(&self, invocations: &[Invocation]) -> Result<Vec<Request>, ScrapeError> {
        if invocations.is_empty() {
            return Err(ScrapeError::Config(
                "initial_seed requires at least one entry invocation".into(),
            ));
        }
        let entries = self.entries();
        let mut requests = Vec::new();
        for invocation in invocations {
            let spec = entries
                .iter()
                .find(|e| e.name == invocation.entry)
                .ok_or_else(|| ScrapeError::UnknownEntry(invocation.entry.clone()))?;
            let validated = validate_params(spec, &invocation.params)?;
            requests.extend(self.seed(&spec.name, &validated)?);
        }
        Ok(requests)
    }

    /// Speculative entries and their metadata.
    fn speculators(&self) -> Vec<(String, SpeculationSpec)> {
        self.entries()
            .into_iter()
            .filter_map(|e| e.speculation.map(|s| (e.name, s)))
            .collect()
    }

    /// Priority declared for a step, if registered.
    fn step_priority(&self, name: &str) -> Option<i32> {
        self.steps()
            .into_iter()
            .find(|s| s.name == name)
            .map(|s| s.priority)
    }

    /// Machine-readable description of the entry points.
    fn schema(&self) -> Value {
        let mut entries = serde_json::Map::new();
        for entry in self.entries() {
            let mut properties = serde_json::Map::new();
            let mut required = Vec::new();
            for param in &entry.params {
                required.push(Value::String(param.name.clone()));
                let prop = match param.kind {
                    ParamKind::Str => serde_json::json!({"type": "string"}),
                    ParamKind::Int => serde_json::json!({"type": "integer"}),
                    ParamKind::Date => serde_json::json!({"type": "string", "format": "date"}),
                    ParamKind::Model(model) => {
                        serde_json::json!({"$ref": format!("#/$defs/{model}")})
                    }
                };
                properties.insert(param.name.clone(), prop);
            }
            let mut doc = serde_json::json!({
                "returns": entry.returns,
                "speculative": entry.is_speculative(),
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                },
            });
            if let Some(spec) = &entry.speculation {
                doc["highest_observed"] = spec.highest_observed.into();
                doc["largest_observed_gap"] = spec.largest_observed_gap.into();
            }
            entries.insert(entry.name.clone(), doc);
        }
        serde_json::json!({
            "scraper": self.name(),
            "entries": entries,
        })
    }
}

/// Validate and coerce an invocation's parameters against the entry's
/// declared types. Strings and integers coerce across JSON renderings,
/// dates accept ISO strings, model parameters must be objects.
pub fn validate_params(spec: &EntrySpec, params: &DataMap) -> Result<DataMap, ScrapeError> {
    let declared: Vec<&str> = spec.params.iter().map(|p| p.name.as_str()).collect();
    if let Some(unexpected) = params.keys().find(|k| !declared.contains(&k.as_str())) {
        return Err(ScrapeError::InvalidParams {
            entry: spec.name.clone(),
            message: format!("unexpected parameter '{unexpected}' (expected: {declared:?})"),
        });
    }

    let mut validated = DataMap::new();
    for param in &spec.params {
        let raw = params.get(&param.name).ok_or_else(|| ScrapeError::InvalidParams {
            entry: spec.name.clone(),
            message: format!("missing required parameter '{}'", param.name),
        })?;
        let value = coerce(raw, param).map_err(|message| ScrapeError::InvalidParams {
            entry: spec.name.clone(),
            message,
        })?;
        validated.insert(param.name.clone(), value);
    }
    Ok(validated)
}

fn coerce(raw: &Value, param: &ParamSpec) -> Result<Value, String> {
    match param.kind {
        ParamKind::Str => match raw {
            Value::String(_) => Ok(raw.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            other => Err(format!(
                "parameter '{}' expected a string, got {other}",
                param.name
            )),
        },
        ParamKind::Int => match raw {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(raw.clone()),
            Value::String(s) => s
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("parameter '{}' is not an integer: '{s}'", param.name)),
            other => Err(format!(
                "parameter '{}' expected an integer, got {other}",
                param.name
            )),
        },
        ParamKind::Date => match raw {
            Value::String(s) => s
                .parse::<NaiveDate>()
                .map(|d| Value::String(d.to_string()))
                .map_err(|_| format!("parameter '{}' is not an ISO date: '{s}'", param.name)),
            other => Err(format!(
                "parameter '{}' expected an ISO date string, got {other}",
                param.name
            )),
        },
        ParamKind::Model(model) => match raw {
            Value::Object(_) => Ok(raw.clone()),
            other => Err(format!(
                "parameter '{}' expected a {model} object, got {other}",
                param.name
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> EntrySpec {
        EntrySpec::new("search", "Docket")
            .with_param("docket_number", ParamKind::Str)
            .with_param("year", ParamKind::Int)
            .with_param("filed_after", ParamKind::Date)
    }

    #[test]
    fn primitives_are_coerced() {
        let mut params = DataMap::new();
        params.insert("docket_number".into(), serde_json::json!(410));
        params.insert("year".into(), serde_json::json!("2024"));
        params.insert("filed_after".into(), serde_json::json!("2024-01-03"));

        let validated = validate_params(&entry(), &params).unwrap();
        assert_eq!(validated["docket_number"], serde_json::json!("410"));
        assert_eq!(validated["year"], serde_json::json!(2024));
        assert_eq!(validated["filed_after"], serde_json::json!("2024-01-03"));
    }

    #[test]
    fn missing_parameter_is_rejected() {
        let err = validate_params(&entry(), &DataMap::new()).unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidParams { .. }));
    }

    #[test]
    fn unexpected_parameter_is_rejected() {
        let mut params = DataMap::new();
        params.insert("bogus".into(), serde_json::json!(1));
        let err = validate_params(&entry(), &params).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn bad_date_is_rejected() {
        let mut params = DataMap::new();
        params.insert("docket_number".into(), serde_json::json!("A"));
        params.insert("year".into(), serde_json::json!(1));
        params.insert("filed_after".into(), serde_json::json!("01/03/2024"));
        assert!(validate_params(&entry(), &params).is_err());
    }

    #[test]
    fn invocation_wire_form_parses() {
        let inv = Invocation::from_value(&serde_json::json!(
            {"search_by_number": {"docket_number": "A10"}}
        ))
        .unwrap();
        assert_eq!(inv.entry, "search_by_number");
        assert_eq!(inv.params["docket_number"], serde_json::json!("A10"));
    }
}
