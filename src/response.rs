//! HTTP responses as delivered to parsing steps.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::request::Request;

/// Transport-level response produced by the fetch layer, before it is
/// tied back to its originating request.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    /// Final URL after redirects.
    pub url: String,
}

impl RawResponse {
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        RawResponse {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
            url: url.into(),
        }
    }
}

/// Response bundle handed to a continuation: status, headers, raw and
/// decoded body, the final URL, and the request that produced it.
///
/// For archive requests `archive_path` carries the location the body was
/// persisted to by the archive sink; it is `None` for everything else.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub text: String,
    pub url: String,
    pub request: Request,
    pub archive_path: Option<PathBuf>,
}

impl Response {
    /// Assemble a [`Response`] from the transport result, decoding the
    /// body with the charset declared in `Content-Type` and falling back
    /// to lossy UTF-8.
    pub fn from_raw(raw: RawResponse, request: Request, archive_path: Option<PathBuf>) -> Self {
        let text = decode_body(&raw.body, raw.headers.get("content-type").map(String::as_str));
        Response {
            status: raw.status,
            headers: raw.headers,
            body: raw.body,
            text,
            url: raw.url,
            request,
            archive_path,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn archive_path(&self) -> Option<&Path> {
        self.archive_path.as_deref()
    }
}

fn decode_body(body: &[u8], content_type: Option<&str>) -> String {
    if let Some(charset) = content_type.and_then(charset_of) {
        if let Some(encoding) = encoding_rs::Encoding::for_label(charset.as_bytes()) {
            let (text, _, _) = encoding.decode(body);
            return text.into_owned();
        }
    }
    String::from_utf8_lossy(body).into_owned()
}

fn charset_of(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix("charset=")
            .map(|c| c.trim_matches('"').to_ascii_lowercase())
    })
}
