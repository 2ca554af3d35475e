//! Dynamic-parts extraction: which byte-strings in a request does the
//! server validate?
//!
//! Two passes feed the result. The single-request pass asks the oracle to
//! read one rendered request. The session-aware pass looks for parameters
//! that repeat across the whole recording and scores their consistency.
//! Both passes absorb oracle failures; this component never errors.

use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::har::{render_curl, HarArchive, RequestRecord};
use crate::oracle::schemas::{self, DynamicPartsAnswer, SessionTokensAnswer};
use crate::oracle::{CancelSignal, ChatMessage, Oracle};

/// Header names that carry authentication material.
pub const AUTH_HEADER_NAMES: &[&str] = &[
    "authorization",
    "x-api-key",
    "x-auth-token",
    "x-csrf-token",
    "x-xsrf-token",
    "x-session-token",
    "bearer",
    "api-key",
    "auth-token",
];

/// Substrings marking a cookie as session-relevant.
pub const SESSION_COOKIE_MARKERS: &[&str] = &[
    "session", "sess", "auth", "token", "csrf", "xsrf", "jwt", "bearer",
];

/// True when a parameter name is authentication-shaped.
pub fn is_auth_parameter(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    AUTH_HEADER_NAMES.contains(&lower.as_str())
        || SESSION_COOKIE_MARKERS.iter().any(|m| lower.contains(m))
}

/// A parameter observed to repeat across the recorded session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPattern {
    pub key: String,
    /// Most common observed value.
    pub value: String,
    /// (count of most common value) / (total observations).
    pub consistency: f64,
    pub occurrences: usize,
    pub total: usize,
    pub is_auth: bool,
}

/// Tuning knobs for the extractor.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Minimum consistency for a pattern to reach the oracle.
    pub session_pattern_threshold: f64,
    /// Stricter bar applied by the oracle-less fallback.
    pub fallback_consistency_threshold: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            session_pattern_threshold: 0.3,
            fallback_consistency_threshold: 0.5,
        }
    }
}

/// Finds the server-validated values in a request.
pub struct DynamicPartsExtractor {
    config: ExtractorConfig,
    hex_like: Regex,
}

impl Default for DynamicPartsExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

impl DynamicPartsExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            config,
            hex_like: Regex::new(r"^[0-9a-fA-F]{16,}$").unwrap(),
        }
    }

    /// Union of the single-request and session-aware passes, deduplicated
    /// in first-seen order. Never errors.
    pub async fn extract(
        &self,
        oracle: &dyn Oracle,
        archive: &HarArchive,
        request: &RequestRecord,
        input_variables: &HashMap<String, String>,
        cancel: &CancelSignal,
    ) -> Vec<String> {
        let mut parts = self
            .single_request_pass(oracle, request, input_variables, cancel)
            .await;
        for value in self.session_pass(oracle, archive, cancel).await {
            // Session values count only when this request actually sends them.
            if request_carries_value(request, &value) && !parts.contains(&value) {
                parts.push(value);
            }
        }
        parts
    }

    // ==================== Single-request pass ====================

    async fn single_request_pass(
        &self,
        oracle: &dyn Oracle,
        request: &RequestRecord,
        input_variables: &HashMap<String, String>,
        cancel: &CancelSignal,
    ) -> Vec<String> {
        if request.is_javascript() {
            return Vec::new();
        }

        let curl = render_curl(request);
        let declared = if input_variables.is_empty() {
            "none".to_string()
        } else {
            serde_json::to_string(input_variables).unwrap_or_default()
        };
        let messages = vec![
            ChatMessage::system(
                "You analyze one HTTP request and return the values (never the keys) the \
                 server validates for identity or authority: tokens, session ids, CSRF \
                 tokens, API keys, authentication parameters. Exclude arbitrary user data.",
            ),
            ChatMessage::user(format!(
                "Request:\n{curl}\n\nDeclared input variables: {declared}"
            )),
        ];

        match oracle
            .call_function(&messages, &schemas::identify_dynamic_parts(), cancel)
            .await
        {
            Ok(value) => match serde_json::from_value::<DynamicPartsAnswer>(value) {
                Ok(answer) => answer
                    .dynamic_parts
                    .into_iter()
                    .filter(|part| !part.is_empty())
                    // Values the caller already supplies are not dynamic.
                    .filter(|part| {
                        !(input_variables.values().any(|v| v == part) && curl.contains(part))
                    })
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "unparseable dynamic-parts answer");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, url = %request.url, "dynamic-parts oracle call failed");
                Vec::new()
            }
        }
    }

    // ==================== Session-aware pass ====================

    /// Harvest repeated parameters across the whole recording and compute
    /// per-key consistency. Pure and deterministic.
    pub fn session_patterns(&self, archive: &HarArchive) -> Vec<SessionPattern> {
        // key → value → count
        let mut observations: HashMap<String, HashMap<String, usize>> = HashMap::new();
        let mut record = |key: &str, value: &str| {
            if value.is_empty() {
                return;
            }
            *observations
                .entry(key.to_string())
                .or_default()
                .entry(value.to_string())
                .or_insert(0) += 1;
        };

        for request in archive.requests() {
            for param in &request.query {
                record(&param.name, &param.value);
            }
            for header in &request.headers {
                if AUTH_HEADER_NAMES.contains(&header.name.to_ascii_lowercase().as_str()) {
                    record(&header.name.to_ascii_lowercase(), &header.value);
                }
            }
            for (name, value) in request.cookie_pairs() {
                let lower = name.to_ascii_lowercase();
                if SESSION_COOKIE_MARKERS.iter().any(|m| lower.contains(m)) {
                    record(&name, &value);
                }
            }
        }

        let mut patterns: Vec<SessionPattern> = observations
            .into_iter()
            .filter_map(|(key, values)| {
                let is_auth = is_auth_parameter(&key);
                // Candidates: auth-shaped names, or keys with one stable value.
                if !is_auth && values.len() != 1 {
                    return None;
                }
                let total: usize = values.values().sum();
                let (value, occurrences) = values
                    .into_iter()
                    .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))?;
                Some(SessionPattern {
                    consistency: occurrences as f64 / total as f64,
                    key,
                    value,
                    occurrences,
                    total,
                    is_auth,
                })
            })
            .collect();
        patterns.sort_by(|a, b| a.key.cmp(&b.key));
        patterns
    }

    async fn session_pass(
        &self,
        oracle: &dyn Oracle,
        archive: &HarArchive,
        cancel: &CancelSignal,
    ) -> Vec<String> {
        let candidates: Vec<SessionPattern> = self
            .session_patterns(archive)
            .into_iter()
            .filter(|p| p.consistency >= self.config.session_pattern_threshold)
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let summary: Vec<serde_json::Value> = candidates
            .iter()
            .map(|p| {
                json!({
                    "name": p.key,
                    "value": p.value,
                    "consistency": (p.consistency * 100.0).round() / 100.0,
                    "observations": p.total,
                })
            })
            .collect();
        let messages = vec![
            ChatMessage::system(
                "You examine parameters that repeat across a recorded browser session and \
                 separate session-established constants (session ids, CSRF tokens, API \
                 keys) from values the user typed.",
            ),
            ChatMessage::user(
                serde_json::to_string_pretty(&summary).unwrap_or_default(),
            ),
        ];

        match oracle
            .call_function(&messages, &schemas::analyze_session_tokens(), cancel)
            .await
        {
            Ok(value) => match serde_json::from_value::<SessionTokensAnswer>(value) {
                Ok(answer) => {
                    debug!(confidence = answer.confidence, "session-token analysis");
                    candidates
                        .iter()
                        .filter(|p| {
                            answer.potential_session_tokens.contains(&p.value)
                                || answer.authentication_parameters.contains(&p.key)
                        })
                        .map(|p| p.value.clone())
                        .collect()
                }
                Err(e) => {
                    warn!(error = %e, "unparseable session-token answer");
                    self.fallback_session_values(&candidates)
                }
            },
            Err(e) => {
                warn!(error = %e, "session-token oracle call failed, using consistency fallback");
                self.fallback_session_values(&candidates)
            }
        }
    }

    /// Oracle-less path: accept only strongly consistent auth parameters.
    fn fallback_session_values(&self, candidates: &[SessionPattern]) -> Vec<String> {
        candidates
            .iter()
            .filter(|p| p.consistency >= self.config.fallback_consistency_threshold && p.is_auth)
            .map(|p| p.value.clone())
            .collect()
    }

    /// Shape check used by the classifier for token-looking values.
    pub fn looks_like_token(&self, value: &str) -> bool {
        self.hex_like.is_match(value)
            || (value.len() >= 16 && value.chars().all(|c| c.is_ascii_alphanumeric()))
    }
}

/// Whether a request sends the given value anywhere the server can see it.
fn request_carries_value(request: &RequestRecord, value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    request.url.contains(value)
        || request.headers.iter().any(|h| h.value.contains(value))
        || request.query.iter().any(|q| q.value.contains(value))
        || request
            .body
            .as_ref()
            .map(|b| b.payload.as_text().contains(value))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::har::HarArchive;
    use crate::oracle::testing::{FailingOracle, ScriptedOracle};
    use pretty_assertions::assert_eq;

    fn archive_with_repeated_token() -> HarArchive {
        let har = r#"{"log": {"entries": [
            {"request": {"method": "GET", "url": "https://api.example.com/api/a",
                         "headers": [{"name": "Authorization", "value": "Bearer tok_AAA"}]},
             "response": {"status": 200, "statusText": "OK", "headers": [],
                          "content": {"mimeType": "application/json", "text": "{}"}}},
            {"request": {"method": "GET", "url": "https://api.example.com/api/b",
                         "headers": [{"name": "Authorization", "value": "Bearer tok_AAA"}]},
             "response": {"status": 200, "statusText": "OK", "headers": [],
                          "content": {"mimeType": "application/json", "text": "{}"}}},
            {"request": {"method": "GET", "url": "https://api.example.com/api/c?q=hello",
                         "headers": [{"name": "Authorization", "value": "Bearer tok_AAA"}],
                         "queryString": [{"name": "q", "value": "hello"}]},
             "response": {"status": 200, "statusText": "OK", "headers": [],
                          "content": {"mimeType": "application/json", "text": "{}"}}}
        ]}}"#;
        HarArchive::from_json(har).unwrap()
    }

    #[test]
    fn test_is_auth_parameter() {
        assert!(is_auth_parameter("authorization"));
        assert!(is_auth_parameter("X-CSRF-Token"));
        assert!(is_auth_parameter("my_session_id"));
        assert!(!is_auth_parameter("page"));
    }

    #[test]
    fn test_session_patterns_consistency() {
        let extractor = DynamicPartsExtractor::default();
        let patterns = extractor.session_patterns(&archive_with_repeated_token());
        let auth = patterns
            .iter()
            .find(|p| p.key == "authorization")
            .expect("authorization pattern");
        assert_eq!(auth.value, "Bearer tok_AAA");
        assert_eq!(auth.total, 3);
        assert_eq!(auth.consistency, 1.0);
        assert!(auth.is_auth);
    }

    #[test]
    fn test_single_valued_non_auth_param_is_candidate() {
        let extractor = DynamicPartsExtractor::default();
        let patterns = extractor.session_patterns(&archive_with_repeated_token());
        // `q` appears once with one value, so it qualifies as single-valued.
        assert!(patterns.iter().any(|p| p.key == "q"));
    }

    #[tokio::test]
    async fn test_fallback_accepts_consistent_auth_values_only() {
        let extractor = DynamicPartsExtractor::default();
        let archive = archive_with_repeated_token();
        let request = &archive.requests()[0];
        let parts = extractor
            .extract(
                &FailingOracle::new(),
                &archive,
                request,
                &HashMap::new(),
                &CancelSignal::none(),
            )
            .await;
        assert_eq!(parts, vec!["Bearer tok_AAA".to_string()]);
    }

    #[tokio::test]
    async fn test_javascript_requests_are_skipped() {
        let har = r#"{"log": {"entries": [
            {"request": {"method": "GET", "url": "https://cdn.example.com/bundle.js",
                         "headers": []}}
        ]}}"#;
        let archive = HarArchive::from_json(har).unwrap();
        let extractor = DynamicPartsExtractor::default();
        let oracle = ScriptedOracle::new();
        let parts = extractor
            .extract(
                &oracle,
                &archive,
                &archive.requests()[0],
                &HashMap::new(),
                &CancelSignal::none(),
            )
            .await;
        assert!(parts.is_empty());
        // The single-request oracle schema was never consulted.
        assert_eq!(oracle.calls_to("identify_dynamic_parts"), 0);
    }

    #[tokio::test]
    async fn test_input_variable_values_are_filtered() {
        let archive = archive_with_repeated_token();
        let request = &archive.requests()[2];
        let oracle = ScriptedOracle::new().with_response(
            "identify_dynamic_parts",
            serde_json::json!({"dynamic_parts": ["hello", "tok_AAA"]}),
        );
        let mut inputs = HashMap::new();
        inputs.insert("query".to_string(), "hello".to_string());

        let extractor = DynamicPartsExtractor::default();
        let parts = extractor
            .single_request_pass(&oracle, request, &inputs, &CancelSignal::none())
            .await;
        assert_eq!(parts, vec!["tok_AAA".to_string()]);
    }

    #[tokio::test]
    async fn test_union_is_deduplicated() {
        let archive = archive_with_repeated_token();
        let request = &archive.requests()[0];
        let oracle = ScriptedOracle::new()
            .with_response(
                "identify_dynamic_parts",
                serde_json::json!({"dynamic_parts": ["Bearer tok_AAA"]}),
            )
            .with_response(
                "analyze_session_tokens",
                serde_json::json!({
                    "potentialSessionTokens": ["Bearer tok_AAA"],
                    "authenticationParameters": ["authorization"],
                    "confidence": 0.95,
                    "analysis": "repeated bearer token"
                }),
            );
        let extractor = DynamicPartsExtractor::default();
        let parts = extractor
            .extract(&oracle, &archive, request, &HashMap::new(), &CancelSignal::none())
            .await;
        assert_eq!(parts, vec!["Bearer tok_AAA".to_string()]);
    }

    #[test]
    fn test_token_shape_detection() {
        let extractor = DynamicPartsExtractor::default();
        assert!(extractor.looks_like_token("deadbeefdeadbeef"));
        assert!(extractor.looks_like_token("A1B2C3D4E5F6G7H8I9"));
        assert!(!extractor.looks_like_token("hello"));
        assert!(!extractor.looks_like_token("has spaces here ok"));
    }
}
