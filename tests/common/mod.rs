//! Shared test utilities: a scripted fetcher and result collectors.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use magpie::async_trait;
use magpie::error::{FetchFailure, TransientError};
use magpie::request::Request;
use magpie::response::RawResponse;
use magpie::Fetcher;

/// One scripted outcome for a URL.
#[derive(Debug, Clone)]
pub enum Canned {
    Ok { status: u16, body: String },
    Transient(TransientError),
}

impl Canned {
    pub fn ok(status: u16, body: impl Into<String>) -> Self {
        Canned::Ok {
            status,
            body: body.into(),
        }
    }

    pub fn service_unavailable(url: &str) -> Self {
        Canned::Transient(TransientError::UnexpectedStatus {
            status: 503,
            expected: vec![200],
            url: url.to_string(),
        })
    }
}

/// Scripted [`Fetcher`]: responses keyed by URL, consumed in order with
/// the last one repeating. Unknown URLs get an empty 404. Every request
/// is recorded for assertions.
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, VecDeque<Canned>>>,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        MockFetcher::default()
    }

    pub fn respond(self, url: impl Into<String>, canned: Canned) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.into())
            .or_default()
            .push_back(canned);
        self
    }

    pub fn respond_ok(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.respond(url, Canned::ok(200, body))
    }

    /// Handle onto the request log, valid after the fetcher moves into
    /// the driver.
    pub fn request_log(&self) -> RequestLog {
        RequestLog(Arc::clone(&self.requests))
    }
}

#[derive(Clone)]
pub struct RequestLog(Arc<Mutex<Vec<Request>>>);

impl RequestLog {
    pub fn urls(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.http.url.clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<RawResponse, FetchFailure> {
        self.requests.lock().unwrap().push(request.clone());
        let url = request.http.url.clone();

        let canned = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&url) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match canned {
            Some(Canned::Ok { status, body }) => Ok(RawResponse::new(status, &url, body)),
            Some(Canned::Transient(e)) => Err(e.into()),
            None => Ok(RawResponse::new(404, &url, "")),
        }
    }
}

/// An `on_data` collector: returns the callback target and a handle to
/// read what was captured.
pub fn collect_results<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, Arc<Mutex<Vec<T>>>) {
    let results = Arc::new(Mutex::new(Vec::new()));
    (Arc::clone(&results), results)
}

/// Route driver logs through the test harness when debugging.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

use magpie::error::{AssumptionError, ScrapeError, SelectorKind};
use magpie::item::{yields, ScraperYield, YieldStream};
use magpie::request::DataMap;
use magpie::response::Response;
use magpie::scraper::{EntrySpec, Scraper, SpeculationSpec, StepInput, StepSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The datum type the test scrapers collect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub docket: String,
}

impl CaseRecord {
    pub fn new(docket: impl Into<String>) -> Self {
        CaseRecord {
            docket: docket.into(),
        }
    }
}

/// Speculator wiring for [`ScriptScraper`].
pub struct SpeculatorCfg {
    pub name: String,
    pub url_prefix: String,
    pub spec: SpeculationSpec,
    /// IDs above this value all map to the same URL, simulating an
    /// aliased ID space.
    pub alias_above: Option<u64>,
}

/// A scraper whose behavior is scripted by the JSON bodies the server
/// returns. Pages may carry:
///
/// - `"data"`: array of case objects yielded as validated records
/// - `"deferred"`: array of raw docs yielded for deferred validation
/// - `"requests"`: array of `{url, mode?, priority?, skip_dedup?,
///   accumulated?, permanent_headers?, expected_type?}`
/// - `"fail": "structural"`: raise a structural error after the above
/// - `"emit_accumulated"`: yield a record carrying `accumulated.docket`
/// - `"emit_location"`: yield a record carrying `current_location`
/// - `"emit_archive_path"`: yield a record carrying the stored path
/// - `"soft404": true`: recognized by `fails_successfully`
pub struct ScriptScraper {
    pub start_url: Option<String>,
    pub speculator: Option<SpeculatorCfg>,
}

impl ScriptScraper {
    pub fn starting_at(url: impl Into<String>) -> Self {
        ScriptScraper {
            start_url: Some(url.into()),
            speculator: None,
        }
    }

    pub fn speculating(cfg: SpeculatorCfg) -> Self {
        ScriptScraper {
            start_url: None,
            speculator: Some(cfg),
        }
    }
}

fn request_from_script(spec: &Value) -> Request {
    let url = spec["url"].as_str().expect("scripted request needs a url");
    let mut request = match spec["mode"].as_str().unwrap_or("navigate") {
        "fetch" => Request::fetch(url, "parse"),
        "archive" => Request::archive(url, "parse"),
        _ => Request::navigate(url, "parse"),
    };
    if let Some(priority) = spec["priority"].as_i64() {
        request = request.with_priority(priority as i32);
    }
    if spec["skip_dedup"].as_bool() == Some(true) {
        request = request.skip_dedup();
    }
    if let Some(hint) = spec["expected_type"].as_str() {
        request = request.with_expected_type(hint);
    }
    if let Some(accumulated) = spec["accumulated"].as_object() {
        let map: DataMap = accumulated
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        request = request.with_accumulated(map);
    }
    if let Some(headers) = spec["permanent_headers"].as_object() {
        for (k, v) in headers {
            request = request.with_permanent_header(k, v.as_str().unwrap_or_default());
        }
    }
    request
}

impl Scraper for ScriptScraper {
    type Record = CaseRecord;

    fn name(&self) -> &str {
        "script"
    }

    fn entries(&self) -> Vec<EntrySpec> {
        let mut entries = Vec::new();
        if self.start_url.is_some() {
            entries.push(EntrySpec::new("start", "CaseRecord"));
        }
        if let Some(cfg) = &self.speculator {
            entries.push(EntrySpec::new(&cfg.name, "CaseRecord").speculative(cfg.spec.clone()));
        }
        entries
    }

    fn steps(&self) -> Vec<StepSpec> {
        vec![StepSpec::new("parse")]
    }

    fn seed(&self, entry: &str, _params: &DataMap) -> Result<Vec<Request>, ScrapeError> {
        match (entry, &self.start_url) {
            ("start", Some(url)) => Ok(vec![Request::navigate(url, "parse")]),
            (other, _) => Err(ScrapeError::UnknownEntry(other.into())),
        }
    }

    fn speculate(&self, speculator: &str, id: u64) -> Result<Request, ScrapeError> {
        match &self.speculator {
            Some(cfg) if cfg.name == speculator => {
                let effective = match cfg.alias_above {
                    Some(above) if id > above => above,
                    _ => id,
                };
                Ok(Request::navigate(
                    format!("{}/{}", cfg.url_prefix, effective),
                    "parse",
                ))
            }
            _ => Err(ScrapeError::UnknownSpeculator(speculator.into())),
        }
    }

    fn fails_successfully(&self, response: &Response) -> bool {
        serde_json::from_str::<Value>(&response.text)
            .map(|doc| doc["soft404"].as_bool() == Some(true))
            .unwrap_or(false)
    }

    fn step(&self, name: &str, input: &StepInput) -> Result<YieldStream<CaseRecord>, ScrapeError> {
        if name != "parse" {
            return Err(ScrapeError::UnknownStep(name.into()));
        }
        if input.text().is_empty() {
            return Ok(yields(Vec::new()));
        }
        let doc = input.json().map_err(ScrapeError::Assumption)?;
        let url = input.response().url.clone();

        let mut out: Vec<Result<ScraperYield<CaseRecord>, AssumptionError>> = Vec::new();
        if let Some(rows) = doc["data"].as_array() {
            for row in rows {
                let record: CaseRecord =
                    serde_json::from_value(row.clone()).expect("scripted data rows are records");
                out.push(Ok(ScraperYield::data(record)));
            }
        }
        if let Some(rows) = doc["deferred"].as_array() {
            for row in rows {
                out.push(Ok(ScraperYield::deferred(row.clone(), &url)));
            }
        }
        if doc["emit_accumulated"].as_bool() == Some(true) {
            let docket = input
                .accumulated()
                .get("docket")
                .and_then(|v| v.as_str())
                .unwrap_or("missing")
                .to_string();
            out.push(Ok(ScraperYield::data(CaseRecord::new(docket))));
        }
        if doc["emit_location"].as_bool() == Some(true) {
            out.push(Ok(ScraperYield::data(CaseRecord::new(
                input.request().current_location.clone(),
            ))));
        }
        if doc["emit_archive_path"].as_bool() == Some(true) {
            let path = input
                .archive_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "no-archive".into());
            out.push(Ok(ScraperYield::data(CaseRecord::new(path))));
        }
        if let Some(specs) = doc["requests"].as_array() {
            for spec in specs {
                out.push(Ok(ScraperYield::request(request_from_script(spec))));
            }
        }
        if doc["fail"].as_str() == Some("structural") {
            out.push(Err(AssumptionError::HtmlStructure {
                selector: "//table[@id='cases']/tr".into(),
                selector_kind: SelectorKind::Xpath,
                description: "case rows".into(),
                expected_min: 1,
                expected_max: None,
                actual: 0,
                url,
            }));
        }
        Ok(yields(out))
    }
}
