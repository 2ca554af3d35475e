//! Core records for recorded browser traffic.
//!
//! Everything in this module is created at ingestion time and immutable
//! afterwards. The archive owns the records; the rest of the kernel holds
//! `RequestId` indices into it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Index of a request inside its owning [`super::HarArchive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u32);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A single HTTP header with its recorded casing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A query-string parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParam {
    pub name: String,
    pub value: String,
}

/// Structured request body with its declared MIME type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    pub mime_type: String,
    pub payload: BodyPayload,
}

/// The decoded body payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyPayload {
    /// Parsed JSON object or array.
    Json(serde_json::Value),
    /// Plain text (form-encoded bodies land here too).
    Text(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
}

impl BodyPayload {
    /// Render the payload as searchable text.
    pub fn as_text(&self) -> String {
        match self {
            Self::Json(value) => value.to_string(),
            Self::Text(text) => text.clone(),
            Self::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// The recorded response half of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<Header>,
    pub mime_type: Option<String>,
    pub body: Option<String>,
}

impl ResponseRecord {
    /// Case-insensitive header lookup; returns the first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// All Set-Cookie header payloads.
    pub fn set_cookies(&self) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case("set-cookie"))
            .map(|h| h.value.as_str())
            .collect()
    }

    /// True when the recorded content type is JSON.
    pub fn is_json(&self) -> bool {
        self.mime_type
            .as_deref()
            .map(|m| m.contains("json"))
            .unwrap_or(false)
    }

    /// True when the recorded content type is HTML.
    pub fn is_html(&self) -> bool {
        self.mime_type
            .as_deref()
            .map(|m| m.contains("html"))
            .unwrap_or(false)
    }

    /// Check whether a value occurs verbatim anywhere in the response:
    /// body text, header values, or Set-Cookie payloads.
    pub fn contains_value(&self, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        if let Some(body) = &self.body {
            if body.contains(value) {
                return true;
            }
        }
        self.headers.iter().any(|h| h.value.contains(value))
    }
}

/// One recorded request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RequestId,
    pub method: String,
    pub url: String,
    pub headers: Vec<Header>,
    pub query: Vec<QueryParam>,
    pub body: Option<RequestBody>,
    pub response: Option<ResponseRecord>,
    /// When the browser issued the request. Drives "earliest producer wins".
    pub started_at: DateTime<Utc>,
}

impl RequestRecord {
    /// Case-insensitive header lookup; returns the first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// The request Content-Type, if declared.
    pub fn content_type(&self) -> Option<&str> {
        self.body
            .as_ref()
            .map(|b| b.mime_type.as_str())
            .or_else(|| self.header("content-type"))
    }

    /// The response Content-Type, if a response was recorded.
    pub fn response_content_type(&self) -> Option<&str> {
        self.response.as_ref().and_then(|r| r.mime_type.as_deref())
    }

    /// URL path without query string.
    pub fn path(&self) -> &str {
        let without_scheme = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        let path_start = without_scheme.find('/').unwrap_or(without_scheme.len());
        let path = &without_scheme[path_start..];
        path.split_once('?').map(|(p, _)| p).unwrap_or(path)
    }

    /// Host portion of the URL.
    pub fn host(&self) -> &str {
        let without_scheme = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        without_scheme
            .split(['/', '?'])
            .next()
            .unwrap_or(without_scheme)
    }

    /// JavaScript resource URLs are never analyzed or used as producers.
    pub fn is_javascript(&self) -> bool {
        self.path().ends_with(".js")
    }

    /// Cookie pairs sent with this request, parsed from the Cookie header.
    pub fn cookie_pairs(&self) -> Vec<(String, String)> {
        let Some(raw) = self.header("cookie") else {
            return Vec::new();
        };
        raw.split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

/// Slim descriptor used to score candidate URLs without touching bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlInfo {
    pub url: String,
    pub method: String,
    pub request_content_type: Option<String>,
    pub response_content_type: Option<String>,
}

impl UrlInfo {
    /// URL path without scheme, host, or query string.
    pub fn path(&self) -> &str {
        let without_scheme = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        let path_start = without_scheme.find('/').unwrap_or(without_scheme.len());
        let path = &without_scheme[path_start..];
        path.split_once('?').map(|(p, _)| p).unwrap_or(path)
    }

    /// Query parameters parsed from the URL.
    pub fn query_params(&self) -> Vec<(String, String)> {
        let Some((_, query)) = self.url.split_once('?') else {
            return Vec::new();
        };
        query
            .split('&')
            .filter(|part| !part.is_empty())
            .map(|part| match part.split_once('=') {
                Some((name, value)) => (name.to_string(), value.to_string()),
                None => (part.to_string(), String::new()),
            })
            .collect()
    }
}

/// HAR quality bucket reported by validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarQuality {
    Excellent,
    Good,
    Poor,
    Empty,
}

impl std::fmt::Display for HarQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Excellent => write!(f, "excellent"),
            Self::Good => write!(f, "good"),
            Self::Poor => write!(f, "poor"),
            Self::Empty => write!(f, "empty"),
        }
    }
}

/// Precomputed validation verdict for a loaded archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarValidation {
    pub quality: HarQuality,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// A single cookie from the jar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default, rename = "httpOnly")]
    pub http_only: Option<bool>,
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default, rename = "sameSite")]
    pub same_site: Option<String>,
}

impl CookieRecord {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expires: None,
            http_only: None,
            secure: None,
            same_site: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Suffix-based domain match. A leading dot matches the host itself and
    /// any subdomain; a bare domain matches exactly.
    pub fn matches_host(&self, host: &str) -> bool {
        match self.domain.as_deref() {
            None => true,
            Some(domain) => {
                if let Some(suffix) = domain.strip_prefix('.') {
                    host == suffix || host.ends_with(&format!(".{suffix}"))
                } else {
                    host == domain
                }
            }
        }
    }
}

/// Name-keyed cookie jar loaded alongside the archive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CookieJar {
    cookies: Vec<CookieRecord>,
}

impl CookieJar {
    pub fn new(cookies: Vec<CookieRecord>) -> Self {
        Self { cookies }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn cookies(&self) -> &[CookieRecord] {
        &self.cookies
    }

    /// Lookup by cookie name.
    pub fn get(&self, name: &str) -> Option<&CookieRecord> {
        self.cookies.iter().find(|c| c.name == name)
    }

    /// Cookies whose domain matches the given host.
    pub fn for_host(&self, host: &str) -> Vec<&CookieRecord> {
        self.cookies.iter().filter(|c| c.matches_host(host)).collect()
    }

    /// Build a jar from a flat name → value map.
    pub fn from_map(map: HashMap<String, String>) -> Self {
        let mut cookies: Vec<CookieRecord> = map
            .into_iter()
            .map(|(name, value)| CookieRecord::new(name, value))
            .collect();
        cookies.sort_by(|a, b| a.name.cmp(&b.name));
        Self { cookies }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> RequestRecord {
        RequestRecord {
            id: RequestId(0),
            method: "GET".to_string(),
            url: url.to_string(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            response: None,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_path_and_host_extraction() {
        let req = request("https://api.example.com/v1/search?q=abc");
        assert_eq!(req.path(), "/v1/search");
        assert_eq!(req.host(), "api.example.com");
    }

    #[test]
    fn test_javascript_detection() {
        assert!(request("https://cdn.example.com/bundle.js").is_javascript());
        assert!(!request("https://api.example.com/v1/js-jobs").is_javascript());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut req = request("https://api.example.com/me");
        req.headers.push(Header::new("Authorization", "Bearer tok"));
        assert_eq!(req.header("authorization"), Some("Bearer tok"));
        assert_eq!(req.header("AUTHORIZATION"), Some("Bearer tok"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn test_cookie_pairs_parsing() {
        let mut req = request("https://example.com/");
        req.headers
            .push(Header::new("Cookie", "sessionid=abc123; theme=dark"));
        let pairs = req.cookie_pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], ("sessionid".to_string(), "abc123".to_string()));
    }

    #[test]
    fn test_cookie_domain_suffix_matching() {
        let dotted = CookieRecord::new("sid", "x").with_domain(".example.com");
        assert!(dotted.matches_host("example.com"));
        assert!(dotted.matches_host("app.example.com"));
        assert!(!dotted.matches_host("notexample.com"));

        let exact = CookieRecord::new("sid", "x").with_domain("example.com");
        assert!(exact.matches_host("example.com"));
        assert!(!exact.matches_host("app.example.com"));
    }

    #[test]
    fn test_response_contains_value() {
        let resp = ResponseRecord {
            status: 200,
            status_text: "OK".to_string(),
            headers: vec![Header::new("Set-Cookie", "XSRF-TOKEN=xyz789; Path=/")],
            mime_type: Some("application/json".to_string()),
            body: Some(r#"{"token":"tok_123"}"#.to_string()),
        };
        assert!(resp.contains_value("tok_123"));
        assert!(resp.contains_value("xyz789"));
        assert!(!resp.contains_value("absent"));
        assert!(!resp.contains_value(""));
    }

    #[test]
    fn test_url_info_query_params() {
        let info = UrlInfo {
            url: "https://api.example.com/search?q=term&page=2".to_string(),
            method: "GET".to_string(),
            request_content_type: None,
            response_content_type: Some("application/json".to_string()),
        };
        let params = info.query_params();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].0, "q");
        assert_eq!(params[1], ("page".to_string(), "2".to_string()));
    }

    #[test]
    fn test_jar_from_map_is_sorted() {
        let mut map = HashMap::new();
        map.insert("b".to_string(), "2".to_string());
        map.insert("a".to_string(), "1".to_string());
        let jar = CookieJar::from_map(map);
        assert_eq!(jar.cookies()[0].name, "a");
        assert_eq!(jar.get("b").map(|c| c.value.as_str()), Some("2"));
    }
}
