//! HAR 1.2 ingestion and the in-memory recorded-traffic model.
//!
//! The archive reads only the entry fields the kernel needs
//! (`log.entries[].request.{method,url,headers,queryString,postData}` and
//! `log.entries[].response.{status,statusText,headers,content}`); unknown
//! fields are ignored and a missing response is acceptable.

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

use crate::error::{Error, Result};

use super::types::{
    BodyPayload, CookieJar, CookieRecord, HarQuality, HarValidation, Header, QueryParam,
    RequestBody, RequestId, RequestRecord, ResponseRecord, UrlInfo,
};

// Wire shapes. Serde skips unknown fields by default, which is exactly the
// leniency the HAR contract requires.

#[derive(Debug, Deserialize)]
struct HarFile {
    log: HarLog,
}

#[derive(Debug, Deserialize)]
struct HarLog {
    #[serde(default)]
    entries: Vec<HarEntry>,
}

#[derive(Debug, Deserialize)]
struct HarEntry {
    #[serde(default, rename = "startedDateTime")]
    started_date_time: Option<String>,
    request: HarRequest,
    #[serde(default)]
    response: Option<HarResponse>,
}

#[derive(Debug, Deserialize)]
struct HarRequest {
    method: String,
    url: String,
    #[serde(default)]
    headers: Vec<HarPair>,
    #[serde(default, rename = "queryString")]
    query_string: Vec<HarPair>,
    #[serde(default, rename = "postData")]
    post_data: Option<HarPostData>,
}

#[derive(Debug, Deserialize)]
struct HarPair {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct HarPostData {
    #[serde(default, rename = "mimeType")]
    mime_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HarResponse {
    #[serde(default)]
    status: u16,
    #[serde(default, rename = "statusText")]
    status_text: String,
    #[serde(default)]
    headers: Vec<HarPair>,
    #[serde(default)]
    content: Option<HarContent>,
}

#[derive(Debug, Deserialize)]
struct HarContent {
    #[serde(default, rename = "mimeType")]
    mime_type: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CookieFile {
    cookies: Vec<CookieRecord>,
}

fn versioned_path(path: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/v\d+/").unwrap()).is_match(path)
}

/// The immutable recorded-traffic model.
///
/// Owns every request record; the rest of the kernel refers to them by
/// [`RequestId`]. All accessors are read-only.
#[derive(Debug, Clone)]
pub struct HarArchive {
    requests: Vec<RequestRecord>,
    urls: Vec<UrlInfo>,
}

impl HarArchive {
    /// Load an archive from a HAR file on disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&text)
    }

    /// Load an archive from HAR JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let file: HarFile = serde_json::from_str(text)
            .map_err(|e| Error::invalid_input(format!("malformed HAR file: {e}")))?;

        let mut requests = Vec::with_capacity(file.log.entries.len());
        for (index, entry) in file.log.entries.into_iter().enumerate() {
            requests.push(Self::build_record(RequestId(index as u32), entry));
        }

        let urls = Self::build_url_index(&requests);
        debug!(
            requests = requests.len(),
            distinct_urls = urls.len(),
            "loaded recording"
        );

        Ok(Self { requests, urls })
    }

    fn build_record(id: RequestId, entry: HarEntry) -> RequestRecord {
        let started_at = entry
            .started_date_time
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            // Entries without a usable timestamp keep their recorded order.
            .unwrap_or_else(|| Utc.timestamp_millis_opt(id.0 as i64).unwrap());

        let headers: Vec<Header> = entry
            .request
            .headers
            .into_iter()
            .map(|p| Header::new(p.name, p.value))
            .collect();

        let query: Vec<QueryParam> = entry
            .request
            .query_string
            .into_iter()
            .map(|p| QueryParam {
                name: p.name,
                value: p.value,
            })
            .collect();

        let body = entry.request.post_data.and_then(|post| {
            let text = post.text?;
            let payload = if post.mime_type.contains("json") {
                match serde_json::from_str(&text) {
                    Ok(value) => BodyPayload::Json(value),
                    Err(_) => BodyPayload::Text(text),
                }
            } else if post.mime_type.contains("octet-stream") {
                BodyPayload::Bytes(text.into_bytes())
            } else {
                BodyPayload::Text(text)
            };
            Some(RequestBody {
                mime_type: post.mime_type,
                payload,
            })
        });

        let response = entry.response.and_then(|resp| {
            // A zero status with no content means the recorder saw nothing.
            let content = resp.content;
            if resp.status == 0 && content.is_none() {
                return None;
            }
            let (mime_type, body) = match content {
                Some(c) => (c.mime_type, c.text),
                None => (None, None),
            };
            Some(ResponseRecord {
                status: resp.status,
                status_text: resp.status_text,
                headers: resp
                    .headers
                    .into_iter()
                    .map(|p| Header::new(p.name, p.value))
                    .collect(),
                mime_type,
                body,
            })
        });

        RequestRecord {
            id,
            method: entry.request.method,
            url: entry.request.url,
            headers,
            query,
            body,
            response,
            started_at,
        }
    }

    /// Distinct (method, URL) pairs, with text/html responses left out of the
    /// candidate listing. The underlying requests stay accessible.
    fn build_url_index(requests: &[RequestRecord]) -> Vec<UrlInfo> {
        let mut seen: HashMap<(String, String), ()> = HashMap::new();
        let mut urls = Vec::new();
        for req in requests {
            if req
                .response
                .as_ref()
                .map(|r| r.is_html())
                .unwrap_or(false)
            {
                continue;
            }
            let key = (req.method.clone(), req.url.clone());
            if seen.insert(key, ()).is_none() {
                urls.push(UrlInfo {
                    url: req.url.clone(),
                    method: req.method.clone(),
                    request_content_type: req.content_type().map(str::to_string),
                    response_content_type: req.response_content_type().map(str::to_string),
                });
            }
        }
        urls
    }

    /// All recorded requests in recorded order.
    pub fn requests(&self) -> &[RequestRecord] {
        &self.requests
    }

    /// Lookup a request by its archive index.
    pub fn request(&self, id: RequestId) -> Option<&RequestRecord> {
        self.requests.get(id.0 as usize)
    }

    /// The candidate URL index.
    pub fn urls(&self) -> &[UrlInfo] {
        &self.urls
    }

    /// Find the first request matching a URL, optionally constrained by method.
    pub fn find_by_url(&self, url: &str, method: Option<&str>) -> Option<&RequestRecord> {
        self.requests.iter().find(|r| {
            r.url == url
                && method
                    .map(|m| r.method.eq_ignore_ascii_case(m))
                    .unwrap_or(true)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Quality verdict over the recording: entry count, API-looking path
    /// ratio, and the presence of non-GET methods.
    pub fn validation(&self) -> HarValidation {
        if self.requests.is_empty() {
            return HarValidation {
                quality: HarQuality::Empty,
                issues: vec!["the recording contains no entries".to_string()],
                recommendations: vec![
                    "re-record the session with network capture enabled".to_string(),
                ],
            };
        }

        let api_like = self
            .requests
            .iter()
            .filter(|r| {
                let path = r.path();
                path.contains("/api/")
                    || versioned_path(path)
                    || r.response.as_ref().map(|resp| resp.is_json()).unwrap_or(false)
            })
            .count();
        let api_ratio = api_like as f64 / self.requests.len() as f64;
        let has_mutation = self
            .requests
            .iter()
            .any(|r| !r.method.eq_ignore_ascii_case("GET"));

        let mut issues = Vec::new();
        let mut recommendations = Vec::new();
        if api_ratio < 0.1 {
            issues.push("very few API-looking requests in the recording".to_string());
            recommendations
                .push("interact with the target feature while recording".to_string());
        }
        if !has_mutation {
            issues.push("no non-GET requests recorded".to_string());
            recommendations.push(
                "if the goal is an action (create/update/delete), perform it while recording"
                    .to_string(),
            );
        }
        if self.requests.len() < 3 {
            issues.push("recording is very short".to_string());
        }

        let quality = if api_ratio >= 0.3 && has_mutation && self.requests.len() >= 5 {
            HarQuality::Excellent
        } else if api_ratio >= 0.1 || has_mutation {
            HarQuality::Good
        } else {
            HarQuality::Poor
        };

        HarValidation {
            quality,
            issues,
            recommendations,
        }
    }
}

impl CookieJar {
    /// Load a jar from a cookie file on disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&text)
    }

    /// Parse a cookie file: either `{"cookies": [...]}` or a flat
    /// name → value map.
    pub fn from_json(text: &str) -> Result<Self> {
        if let Ok(file) = serde_json::from_str::<CookieFile>(text) {
            return Ok(Self::new(file.cookies));
        }
        let map: HashMap<String, String> = serde_json::from_str(text)
            .map_err(|e| Error::invalid_input(format!("malformed cookie file: {e}")))?;
        Ok(Self::from_map(map))
    }
}
