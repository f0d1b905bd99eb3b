//! The request record and its resolution protocol.
//!
//! A [`Request`] is an immutable plan for one HTTP interaction. It carries
//! its own navigation context (`current_location`), its ancestry, the
//! payload maps that flow along the request chain, and the two booleans
//! (`nonnavigating`, `archive`) that discriminate the three request modes.
//!
//! Requests are plain serializable data: the continuation is a step
//! *name*, never a function pointer, so a queue of requests can be
//! checkpointed to disk or shipped across processes.

use std::collections::BTreeMap;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::ScrapeError;
use crate::response::Response;

/// User-defined payload map carried on requests.
///
/// `BTreeMap` keeps key order stable for hashing and serialization, and
/// cloning a map of owned [`serde_json::Value`] trees is a deep copy, so
/// two requests built from the same source map never share substructure.
pub type DataMap = BTreeMap<String, serde_json::Value>;

/// HTTP methods a scraper may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }
}

/// Request body in one of the shapes scrapers actually produce.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Body {
    #[default]
    Empty,
    /// Raw bytes, sent as-is.
    Bytes(Vec<u8>),
    /// Form fields, sent urlencoded.
    Form(Vec<(String, String)>),
    /// JSON document.
    Json(serde_json::Value),
}

impl Body {
    /// Canonical rendering used for deduplication-key hashing:
    /// sorted-key JSON for documents, element-sorted pairs for forms,
    /// raw bytes otherwise.
    fn canonical(&self) -> Vec<u8> {
        match self {
            Body::Empty => Vec::new(),
            Body::Bytes(b) => b.clone(),
            Body::Form(pairs) => {
                let mut sorted = pairs.clone();
                sorted.sort();
                sorted
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("&")
                    .into_bytes()
            }
            // serde_json maps serialize with sorted keys
            Body::Json(v) => serde_json::to_vec(v).unwrap_or_default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// The HTTP parameters of a request: method, URL (absolute or relative
/// until resolved), headers, and body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpParams {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Body,
}

impl HttpParams {
    pub fn get(url: impl Into<String>) -> Self {
        HttpParams {
            method: Method::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            body: Body::Empty,
        }
    }
}

/// Per-chain headers and cookies that flow from a request to all of its
/// descendants unless overridden. Set a bearer token once after an
/// authentication step and every descendant carries it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permanent {
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
}

impl Permanent {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.cookies.is_empty()
    }

    /// Merge `parent` underneath `self`: entries of `self` win on
    /// conflict. Associative in chain order, so merging parent into
    /// child and then grandchild into the result equals merging all
    /// three oldest-first.
    pub fn merged_over(&self, parent: &Permanent) -> Permanent {
        let mut out = parent.clone();
        out.headers.extend(self.headers.clone());
        out.cookies.extend(self.cookies.clone());
        out
    }
}

/// Identifies which speculator produced a request, and for which ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeculationId {
    pub speculator: String,
    pub id: u64,
}

/// Deduplication behavior for a request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DedupKey {
    /// Hash the final URL, sorted query, and canonical body at enqueue
    /// time.
    #[default]
    Auto,
    /// Bypass the duplicate filter entirely.
    Skip,
    /// Caller-chosen key.
    Key(String),
}

/// Context a yielded request is resolved against.
#[derive(Clone, Copy)]
pub enum ResolveContext<'a> {
    /// The response that the yielding continuation was invoked with.
    Response(&'a Response),
    /// The request that originated the yielding continuation.
    Request(&'a Request),
}

/// An immutable record describing one planned HTTP interaction.
///
/// Three modes, discriminated by two booleans:
///
/// | mode | `nonnavigating` | `archive` | effect |
/// |---|---|---|---|
/// | navigating | false | false | response URL becomes the descendants' base |
/// | non-navigating | true | false | fetch without moving `current_location` |
/// | archive | — | true | body persisted to the file sink |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub http: HttpParams,
    /// Name of the parsing step invoked with the response.
    pub continuation: String,
    /// Absolute URL that relative URLs in descendants resolve against.
    pub current_location: String,
    /// Ancestor requests, oldest first. Never modified after
    /// construction; deep chains cost memory, so keep payloads small.
    pub previous_requests: Vec<Request>,
    /// Fields collected across the chain; flows into final results.
    pub accumulated: DataMap,
    /// Navigation-only fields (tokens, hidden form values); never
    /// flows into results.
    pub aux: DataMap,
    pub permanent: Permanent,
    /// Explicit queue priority. `None` defers to the archive default
    /// (1) or the target step's declared priority (9 if undeclared).
    pub priority: Option<i32>,
    pub nonnavigating: bool,
    pub archive: bool,
    /// File-type hint used for archive file naming ("pdf", "audio", ...).
    pub expected_type: Option<String>,
    pub speculation: Option<SpeculationId>,
    pub dedup: DedupKey,
}

impl Request {
    fn base(http: HttpParams, continuation: String) -> Self {
        Request {
            http,
            continuation,
            current_location: String::new(),
            previous_requests: Vec::new(),
            accumulated: DataMap::new(),
            aux: DataMap::new(),
            permanent: Permanent::default(),
            priority: None,
            nonnavigating: false,
            archive: false,
            expected_type: None,
            speculation: None,
            dedup: DedupKey::Auto,
        }
    }

    /// A navigating GET: the response URL becomes `current_location`
    /// for descendants.
    pub fn navigate(url: impl Into<String>, continuation: impl Into<String>) -> Self {
        Request::base(HttpParams::get(url), continuation.into())
    }

    /// A non-navigating fetch (API call alongside a page): descendants
    /// keep resolving against the current page.
    pub fn fetch(url: impl Into<String>, continuation: impl Into<String>) -> Self {
        let mut r = Request::base(HttpParams::get(url), continuation.into());
        r.nonnavigating = true;
        r
    }

    /// An archive download: the body is persisted through the archive
    /// sink and the continuation receives the stored file path.
    pub fn archive(url: impl Into<String>, continuation: impl Into<String>) -> Self {
        let mut r = Request::base(HttpParams::get(url), continuation.into());
        r.archive = true;
        r
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.http.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.http.body = body;
        self
    }

    /// Attach accumulated data. The map is owned by this request; pass
    /// a clone when seeding several siblings from one source map.
    pub fn with_accumulated(mut self, data: DataMap) -> Self {
        self.accumulated = data;
        self
    }

    pub fn with_aux(mut self, data: DataMap) -> Self {
        self.aux = data;
        self
    }

    pub fn with_permanent_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.permanent.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_permanent_cookie(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.permanent.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_expected_type(mut self, hint: impl Into<String>) -> Self {
        self.expected_type = Some(hint.into());
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup = DedupKey::Key(key.into());
        self
    }

    /// Opt this request out of duplicate filtering.
    pub fn skip_dedup(mut self) -> Self {
        self.dedup = DedupKey::Skip;
        self
    }

    /// Mark as produced by a speculator for the given ID.
    pub fn speculative(mut self, speculator: impl Into<String>, id: u64) -> Self {
        self.speculation = Some(SpeculationId {
            speculator: speculator.into(),
            id,
        });
        self
    }

    pub fn is_speculative(&self) -> bool {
        self.speculation.is_some()
    }

    pub fn parent(&self) -> Option<&Request> {
        self.previous_requests.last()
    }

    /// Resolve this request's URL against `base`.
    ///
    /// Percent-escapes in path and query are decoded and re-encoded
    /// first, which makes the operation idempotent: a URL that already
    /// went through resolution does not get double-encoded on the next
    /// one. The join itself follows RFC 3986: absolute URLs replace the
    /// base, relative ones resolve against it.
    pub fn resolve_url(&self, base: &str) -> Result<String, ScrapeError> {
        let reencoded = reencode_url(&self.http.url);
        if base.is_empty() {
            return Url::parse(&reencoded)
                .map(String::from)
                .map_err(|e| ScrapeError::Url {
                    url: self.http.url.clone(),
                    message: e.to_string(),
                });
        }
        let base_url = Url::parse(base).map_err(|e| ScrapeError::Url {
            url: base.to_string(),
            message: e.to_string(),
        })?;
        base_url
            .join(&reencoded)
            .map(String::from)
            .map_err(|e| ScrapeError::Url {
                url: self.http.url.clone(),
                message: e.to_string(),
            })
    }

    /// Produce the enqueueable form of this request: URL resolved,
    /// ancestry extended, permanent data merged (this request's entries
    /// override the parent's).
    ///
    /// With a [`Response`] context the join base is the response's final
    /// URL; navigating requests adopt it as their new
    /// `current_location`, while non-navigating and archive requests
    /// keep the location the context already had. With a [`Request`]
    /// context both the base and the new location are the context's
    /// `current_location`.
    pub fn resolve_from(&self, context: ResolveContext<'_>) -> Result<Request, ScrapeError> {
        let (base, parent): (&str, &Request) = match context {
            ResolveContext::Response(r) => (r.url.as_str(), &r.request),
            ResolveContext::Request(q) => (q.current_location.as_str(), q),
        };
        let resolved_url = self.resolve_url(base)?;

        let navigating = !self.nonnavigating && !self.archive;
        let current_location = match context {
            ResolveContext::Response(r) if navigating => r.url.clone(),
            ResolveContext::Response(r) => r.request.current_location.clone(),
            ResolveContext::Request(q) => q.current_location.clone(),
        };

        let mut ancestry = parent.previous_requests.clone();
        ancestry.push(parent.clone());

        let mut out = self.clone();
        out.http.url = resolved_url;
        out.current_location = current_location;
        out.previous_requests = ancestry;
        out.permanent = self.permanent.merged_over(&parent.permanent);
        Ok(out)
    }

    /// Deduplication key for the queue's duplicate filter.
    ///
    /// `Auto` hashes the final URL, the query string sorted by key, and
    /// the canonical body rendering with SHA-256. Returns `None` for the
    /// skip sentinel.
    pub fn dedup_key(&self) -> Option<String> {
        match &self.dedup {
            DedupKey::Skip => None,
            DedupKey::Key(k) => Some(k.clone()),
            DedupKey::Auto => Some(self.compute_dedup_key()),
        }
    }

    fn compute_dedup_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.http.url.as_bytes());
        if let Ok(url) = Url::parse(&self.http.url) {
            let mut pairs: Vec<(String, String)> = url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            pairs.sort();
            for (k, v) in pairs {
                hasher.update(b"|");
                hasher.update(k.as_bytes());
                hasher.update(b"=");
                hasher.update(v.as_bytes());
            }
        }
        hasher.update(b"|");
        hasher.update(self.http.body.canonical());
        format!("{:x}", hasher.finalize())
    }
}

// Alphanumerics and `_.-~` stay literal everywhere; paths additionally
// keep `/`, queries keep `=` and `&`.
const PATH_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'=')
    .remove(b'&');

/// Normalize percent-escapes: decode, then re-encode path and query
/// with their respective safe sets. Idempotent by construction.
fn reencode_url(raw: &str) -> String {
    let (without_fragment, fragment) = match raw.split_once('#') {
        Some((u, f)) => (u, Some(f)),
        None => (raw, None),
    };
    let (prefix_and_path, query) = match without_fragment.split_once('?') {
        Some((u, q)) => (u, Some(q)),
        None => (without_fragment, None),
    };

    // Split scheme://authority off the path so the authority part is
    // left untouched.
    let (prefix, path) = match prefix_and_path.find("://") {
        Some(idx) => {
            let after_scheme = idx + 3;
            match prefix_and_path[after_scheme..].find('/') {
                Some(slash) => prefix_and_path.split_at(after_scheme + slash),
                None => (prefix_and_path, ""),
            }
        }
        None => ("", prefix_and_path),
    };

    let decoded_path = percent_decode_str(path).decode_utf8_lossy().into_owned();
    let encoded_path = utf8_percent_encode(&decoded_path, PATH_ENCODE).to_string();

    let mut out = String::with_capacity(raw.len());
    out.push_str(prefix);
    out.push_str(&encoded_path);
    if let Some(q) = query {
        let decoded_query = percent_decode_str(q).decode_utf8_lossy().into_owned();
        out.push('?');
        out.push_str(&utf8_percent_encode(&decoded_query, QUERY_ENCODE).to_string());
    }
    if let Some(f) = fragment {
        out.push('#');
        out.push_str(f);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_url_resolves_against_base() {
        let r = Request::navigate("/detail/42", "parse_detail");
        let resolved = r.resolve_url("https://example.com/listing").unwrap();
        assert_eq!(resolved, "https://example.com/detail/42");
    }

    #[test]
    fn absolute_url_replaces_base() {
        let r = Request::navigate("https://other.example/x", "parse");
        let resolved = r.resolve_url("https://example.com/").unwrap();
        assert_eq!(resolved, "https://other.example/x");
    }

    #[test]
    fn resolution_is_idempotent() {
        let base = "https://example.com/dir/";
        let r = Request::navigate("a b/c%20d?q=1 2", "parse");
        let once = r.resolve_url(base).unwrap();
        let again = Request::navigate(once.clone(), "parse")
            .resolve_url(base)
            .unwrap();
        assert_eq!(once, again);
    }

    #[test]
    fn escapes_are_not_double_encoded() {
        let r = Request::navigate("/case/%2Fid", "parse");
        let once = r.resolve_url("https://example.com").unwrap();
        assert!(!once.contains("%252F"));
    }

    #[test]
    fn accumulated_data_is_isolated_between_siblings() {
        let mut shared = DataMap::new();
        shared.insert("case".into(), serde_json::json!({"name": "Ant v. Bee"}));

        let a = Request::navigate("/a", "p").with_accumulated(shared.clone());
        let mut b = Request::navigate("/b", "p").with_accumulated(shared.clone());

        // Mutating one branch must not leak into the sibling or source.
        b.accumulated.insert("case".into(), serde_json::json!("clobbered"));
        shared.insert("extra".into(), serde_json::json!(1));

        assert_eq!(
            a.accumulated.get("case"),
            Some(&serde_json::json!({"name": "Ant v. Bee"}))
        );
        assert!(!a.accumulated.contains_key("extra"));
    }

    #[test]
    fn permanent_merge_child_overrides_parent() {
        let mut parent = Permanent::default();
        parent.headers.insert("Authorization".into(), "Bearer old".into());
        parent.cookies.insert("session".into(), "s1".into());

        let mut child = Permanent::default();
        child.headers.insert("Authorization".into(), "Bearer new".into());

        let merged = child.merged_over(&parent);
        assert_eq!(merged.headers["Authorization"], "Bearer new");
        assert_eq!(merged.cookies["session"], "s1");
    }

    #[test]
    fn permanent_merge_is_associative_over_chains() {
        let mut a = Permanent::default();
        a.headers.insert("h".into(), "a".into());
        a.headers.insert("only-a".into(), "1".into());
        let mut b = Permanent::default();
        b.headers.insert("h".into(), "b".into());
        let mut c = Permanent::default();
        c.cookies.insert("k".into(), "c".into());

        let stepwise = c.merged_over(&b.merged_over(&a));
        let mut direct = a.clone();
        direct.headers.extend(b.headers.clone());
        direct.headers.extend(c.headers.clone());
        direct.cookies.extend(b.cookies.clone());
        direct.cookies.extend(c.cookies.clone());

        assert_eq!(stepwise, direct);
    }

    #[test]
    fn auto_dedup_key_is_stable_across_header_changes() {
        let a = Request::navigate("https://example.com/x?b=2&a=1", "p");
        let b = Request::navigate("https://example.com/x?b=2&a=1", "p").with_header("X-Trace", "1");
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn auto_dedup_key_differs_for_different_bodies() {
        let a = Request::navigate("https://example.com/x", "p")
            .with_body(Body::Form(vec![("q".into(), "1".into())]));
        let b = Request::navigate("https://example.com/x", "p")
            .with_body(Body::Form(vec![("q".into(), "2".into())]));
        assert_ne!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn form_body_canonical_is_order_insensitive() {
        let a = Body::Form(vec![("b".into(), "2".into()), ("a".into(), "1".into())]);
        let b = Body::Form(vec![("a".into(), "1".into()), ("b".into(), "2".into())]);
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn skip_sentinel_yields_no_key() {
        assert_eq!(Request::navigate("/x", "p").skip_dedup().dedup_key(), None);
    }

    fn response_at(url: &str, request: Request) -> crate::response::Response {
        crate::response::Response::from_raw(
            crate::response::RawResponse::new(200, url, &b""[..]),
            request,
            None,
        )
    }

    #[test]
    fn navigating_resolution_adopts_the_response_url() {
        let parent = Request::navigate("https://court.test/listing", "parse_listing")
            .with_permanent_header("Authorization", "Bearer tok");
        let response = response_at("https://court.test/listing?page=2", parent);

        let child = Request::navigate("detail/1", "parse_detail")
            .resolve_from(ResolveContext::Response(&response))
            .unwrap();

        assert_eq!(child.http.url, "https://court.test/detail/1");
        assert_eq!(child.current_location, "https://court.test/listing?page=2");
        assert_eq!(child.previous_requests.len(), 1);
        assert_eq!(
            child.previous_requests[0].http.url,
            "https://court.test/listing"
        );
        // Parent's permanent data rides along.
        assert_eq!(child.permanent.headers["Authorization"], "Bearer tok");
    }

    #[test]
    fn nonnavigating_resolution_keeps_the_parent_location() {
        let mut parent = Request::navigate("https://court.test/detail/1", "parse_detail");
        parent.current_location = "https://court.test/listing".into();
        let response = response_at("https://court.test/detail/1", parent);

        let child = Request::fetch("https://api.court.test/meta", "parse_meta")
            .resolve_from(ResolveContext::Response(&response))
            .unwrap();

        assert_eq!(child.current_location, "https://court.test/listing");
    }

    #[test]
    fn request_context_resolution_uses_its_location_as_base() {
        let mut parent = Request::fetch("https://api.court.test/meta", "parse_meta");
        parent.current_location = "https://court.test/app/".into();

        let child = Request::fetch("extra", "parse_extra")
            .resolve_from(ResolveContext::Request(&parent))
            .unwrap();

        assert_eq!(child.http.url, "https://court.test/app/extra");
        assert_eq!(child.current_location, "https://court.test/app/");
        assert_eq!(child.previous_requests.len(), 1);
    }

    #[test]
    fn ancestry_grows_oldest_first() {
        let grandparent = Request::navigate("https://court.test/", "a");
        let response = response_at("https://court.test/", grandparent);
        let parent = Request::navigate("/listing", "b")
            .resolve_from(ResolveContext::Response(&response))
            .unwrap();
        let parent_response = response_at("https://court.test/listing", parent);
        let child = Request::navigate("/detail", "c")
            .resolve_from(ResolveContext::Response(&parent_response))
            .unwrap();

        let chain: Vec<&str> = child
            .previous_requests
            .iter()
            .map(|r| r.continuation.as_str())
            .collect();
        assert_eq!(chain, vec!["a", "b"]);
        assert_eq!(child.parent().unwrap().continuation, "b");
    }

    #[test]
    fn request_round_trips_through_serde() {
        let r = Request::archive("https://example.com/doc.pdf", "save_doc")
            .with_expected_type("pdf")
            .with_permanent_cookie("session", "abc")
            .speculative("fetch_case", 7);
        let encoded = serde_json::to_string(&r).unwrap();
        let back: Request = serde_json::from_str(&encoded).unwrap();
        assert_eq!(back.http.url, r.http.url);
        assert_eq!(back.speculation, r.speculation);
        assert!(back.archive);
    }
}
