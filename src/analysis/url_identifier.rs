//! Primary-action URL selection: heuristic scoring with oracle refinement.
//!
//! Scoring is a deterministic function of the prompt and the URL index; the
//! oracle only refines the ranking and its answer is accepted only when it
//! names a URL that actually exists in the recording.

use regex::Regex;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::har::UrlInfo;
use crate::oracle::schemas::{self, EndUrlAnswer};
use crate::oracle::{CancelSignal, ChatMessage, Oracle};

/// Bilingual action verbs and domain terms, with their prompt-match weights.
const SEARCH_TERMS: &[(&str, f64)] = &[
    ("search", 15.0),
    ("pesquisa", 15.0),
    ("buscar", 14.0),
    ("consulta", 13.0),
    ("query", 12.0),
    ("find", 12.0),
    ("recherche", 12.0),
    ("suche", 12.0),
    ("cerca", 12.0),
];

const LEGAL_TERMS: &[(&str, f64)] = &[
    ("jurisprudencia", 18.0),
    ("decisao", 15.0),
    ("acordao", 15.0),
    ("sentenca", 15.0),
    ("julgamento", 12.0),
    ("tribunal", 12.0),
    ("processo", 10.0),
];

const CRUD_TERMS: &[(&str, f64)] = &[
    ("create", 8.0),
    ("add", 8.0),
    ("new", 8.0),
    ("submit", 8.0),
    ("save", 8.0),
    ("update", 8.0),
    ("edit", 8.0),
    ("delete", 8.0),
    ("remove", 8.0),
    ("criar", 8.0),
    ("adicionar", 8.0),
    ("novo", 8.0),
    ("salvar", 8.0),
    ("atualizar", 8.0),
    ("editar", 8.0),
    ("excluir", 8.0),
    ("remover", 8.0),
];

const RETRIEVAL_TERMS: &[(&str, f64)] = &[
    ("get", 6.0),
    ("fetch", 6.0),
    ("list", 6.0),
    ("view", 6.0),
    ("show", 6.0),
    ("obter", 6.0),
    ("listar", 6.0),
    ("ver", 6.0),
];

const DOCUMENT_TERMS: &[(&str, f64)] = &[
    ("download", 7.0),
    ("upload", 7.0),
    ("documento", 6.0),
    ("document", 6.0),
    ("pdf", 6.0),
    ("print", 5.0),
    ("imprimir", 5.0),
    ("arquivo", 5.0),
    ("file", 5.0),
];

const AUTH_TERMS: &[(&str, f64)] = &[
    ("login", 6.0),
    ("signin", 6.0),
    ("logout", 5.0),
    ("entrar", 5.0),
    ("auth", 5.0),
    ("password", 4.0),
    ("senha", 4.0),
    ("token", 4.0),
];

/// Actions penalized when they appear in a URL but not in the prompt.
const SECONDARY_ACTIONS: &[&str] = &["copy", "copiar", "duplicate", "share", "export"];

const STATIC_ASSET_EXTENSIONS: &[&str] = &[
    ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2",
];

const SEARCH_PARAM_NAMES: &[&str] = &[
    "q", "query", "search", "term", "keyword", "pesquisa", "busca", "consulta",
];
const PAGINATION_PARAM_NAMES: &[&str] = &["page", "limit", "offset", "size", "per_page", "start"];
const DATE_PARAM_NAMES: &[&str] = &[
    "date", "data", "from", "to", "inicio", "fim", "start_date", "end_date",
];
const LEGAL_PARAM_NAMES: &[&str] = &["processo", "tribunal", "orgao", "relator", "classe"];
const FILTER_PARAM_NAMES: &[&str] = &["filter", "filtro", "sort", "order"];

/// A candidate URL with its component scores.
#[derive(Debug, Clone)]
pub struct ScoredUrl {
    pub info: UrlInfo,
    pub total: f64,
    pub keyword: f64,
    pub api_pattern: f64,
    pub params: f64,
    pub method: f64,
    pub response: f64,
}

/// Heuristic scorer and oracle-refined selector for the primary action URL.
pub struct UrlIdentifier {
    version_path: Regex,
    api_patterns: Vec<(Regex, f64)>,
}

impl Default for UrlIdentifier {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlIdentifier {
    pub fn new() -> Self {
        Self {
            version_path: Regex::new(r"/v\d+/").unwrap(),
            api_patterns: vec![
                (Regex::new(r"/api/v\d+/").unwrap(), 10.0),
                (Regex::new(r"/graphql").unwrap(), 9.0),
                (Regex::new(r"/api/").unwrap(), 8.0),
                (Regex::new(r"/v\d+/").unwrap(), 8.0),
                (Regex::new(r"/rest/").unwrap(), 7.0),
                (Regex::new(r"/services?/").unwrap(), 5.0),
                (Regex::new(r"/ajax/").unwrap(), 4.0),
                (Regex::new(r"\.json($|\?)").unwrap(), 4.0),
            ],
        }
    }

    // ==================== Filtering ====================

    fn is_static_asset(info: &UrlInfo) -> bool {
        let path = info.path().to_ascii_lowercase();
        STATIC_ASSET_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    }

    /// Keep API-like endpoints; fall back to the full list when nothing
    /// survives.
    pub fn prefilter<'a>(&self, urls: &'a [UrlInfo]) -> Vec<&'a UrlInfo> {
        let filtered: Vec<&UrlInfo> = urls
            .iter()
            .filter(|info| !Self::is_static_asset(info))
            .filter(|info| {
                let path = info.path();
                path.contains("/api/")
                    || self.version_path.is_match(path)
                    || info
                        .response_content_type
                        .as_deref()
                        .map(|m| m.contains("json"))
                        .unwrap_or(false)
                    || matches!(
                        info.method.to_ascii_uppercase().as_str(),
                        "POST" | "PUT" | "DELETE" | "PATCH"
                    )
            })
            .collect();
        if filtered.is_empty() {
            urls.iter().collect()
        } else {
            filtered
        }
    }

    // ==================== Scoring ====================

    fn keyword_score(&self, prompt: &str, info: &UrlInfo) -> f64 {
        let url = info.url.to_ascii_lowercase();
        let mut score = 0.0;

        for table in [
            SEARCH_TERMS,
            LEGAL_TERMS,
            CRUD_TERMS,
            RETRIEVAL_TERMS,
            DOCUMENT_TERMS,
            AUTH_TERMS,
        ] {
            for (term, weight) in table {
                if prompt.contains(term) && url.contains(term) {
                    score += weight;
                }
            }
        }

        // Path segments matching prompt tokens of length >= 3.
        let tokens: Vec<&str> = prompt
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 3)
            .collect();
        for segment in info.path().split('/').filter(|s| !s.is_empty()) {
            let segment = segment.to_ascii_lowercase();
            if tokens.iter().any(|t| segment.contains(t)) {
                score += 2.0;
            }
        }

        // Secondary actions not asked for in the prompt.
        for action in SECONDARY_ACTIONS {
            if url.contains(action) && !prompt.contains(action) {
                score -= 3.0;
            }
        }

        score
    }

    fn api_pattern_score(&self, info: &UrlInfo) -> f64 {
        let path = info.path().to_ascii_lowercase();
        self.api_patterns
            .iter()
            .filter(|(re, _)| re.is_match(&path))
            .map(|(_, weight)| *weight)
            .fold(0.0, f64::max)
    }

    fn param_score(&self, info: &UrlInfo) -> f64 {
        let params = info.query_params();
        let mut score = (params.len() as f64 * 2.0).min(20.0);
        for (name, value) in &params {
            let name = name.to_ascii_lowercase();
            if SEARCH_PARAM_NAMES.contains(&name.as_str()) {
                score += 3.0;
            } else if LEGAL_PARAM_NAMES.contains(&name.as_str()) {
                score += 3.0;
            } else if PAGINATION_PARAM_NAMES.contains(&name.as_str())
                || DATE_PARAM_NAMES.contains(&name.as_str())
                || FILTER_PARAM_NAMES.contains(&name.as_str())
            {
                score += 2.0;
            }
            if value.len() > 10 {
                score += 1.0;
            }
        }
        if params.iter().any(|(_, v)| v.contains('%')) {
            score += 3.0;
        }
        score
    }

    fn method_score(&self, prompt: &str, info: &UrlInfo) -> f64 {
        let method = info.method.to_ascii_uppercase();
        let mut score = match method.as_str() {
            "POST" => 8.0,
            "PUT" | "DELETE" => 7.0,
            "PATCH" => 6.0,
            "GET" => 5.0,
            _ => 3.0,
        };

        let creation_intent = CRUD_TERMS.iter().any(|(t, _)| prompt.contains(t));
        let search_intent = SEARCH_TERMS
            .iter()
            .chain(RETRIEVAL_TERMS)
            .any(|(t, _)| prompt.contains(t));
        if creation_intent && matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
            score += 4.0;
        }
        if search_intent && method == "GET" {
            score += 4.0;
        }
        score
    }

    fn response_score(&self, info: &UrlInfo) -> f64 {
        match info.response_content_type.as_deref() {
            Some(mime) if mime.contains("json") => 10.0,
            Some(mime) if mime.contains("xml") => 6.0,
            Some(mime) if mime.contains("html") => 2.0,
            _ => 0.0,
        }
    }

    /// Score one candidate. Deterministic in (prompt, url).
    pub fn score(&self, prompt: &str, info: &UrlInfo) -> ScoredUrl {
        let prompt = prompt.to_ascii_lowercase();
        let keyword = self.keyword_score(&prompt, info);
        let api_pattern = self.api_pattern_score(info);
        let params = self.param_score(info);
        let method = self.method_score(&prompt, info);
        let response = self.response_score(info);
        ScoredUrl {
            info: info.clone(),
            total: 3.0 * keyword + 2.0 * api_pattern + 1.5 * params + 1.0 * method
                + 0.8 * response,
            keyword,
            api_pattern,
            params,
            method,
            response,
        }
    }

    /// Pre-filter and rank all candidates, best first. Stable under ties.
    pub fn rank(&self, prompt: &str, urls: &[UrlInfo]) -> Vec<ScoredUrl> {
        let mut scored: Vec<ScoredUrl> = self
            .prefilter(urls)
            .into_iter()
            .map(|info| self.score(prompt, info))
            .collect();
        scored.sort_by(|a, b| b.total.partial_cmp(&a.total).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    // ==================== Selection ====================

    /// Full selection algorithm: filter, score, shortcut on a single
    /// survivor, otherwise refine through the oracle with heuristic
    /// fallback.
    pub async fn identify(
        &self,
        oracle: &dyn Oracle,
        prompt: &str,
        urls: &[UrlInfo],
        cancel: &CancelSignal,
    ) -> Result<String> {
        let ranked = self.rank(prompt, urls);
        if ranked.is_empty() {
            return Err(Error::UrlIdentificationFailed {
                available_urls: urls.iter().map(|u| u.url.clone()).collect(),
                suggested_action: "record the target action and retry, or set the action URL \
                                   manually"
                    .to_string(),
            });
        }
        if ranked.len() == 1 {
            debug!(url = %ranked[0].info.url, "single candidate, skipping oracle");
            return Ok(ranked[0].info.url.clone());
        }

        let messages = self.build_messages(prompt, &ranked);
        match oracle
            .call_function(&messages, &schemas::identify_end_url(), cancel)
            .await
        {
            Ok(value) => {
                let answer: EndUrlAnswer = serde_json::from_value(value)?;
                if urls.iter().any(|u| u.url == answer.url) {
                    Ok(answer.url)
                } else {
                    warn!(
                        returned = %answer.url,
                        "oracle named a URL outside the recording, using top heuristic"
                    );
                    Ok(ranked[0].info.url.clone())
                }
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) => {
                warn!(error = %err, "oracle unavailable, using top heuristic candidate");
                Ok(ranked[0].info.url.clone())
            }
        }
    }

    fn build_messages(&self, prompt: &str, ranked: &[ScoredUrl]) -> Vec<ChatMessage> {
        let candidates: Vec<String> = ranked
            .iter()
            .map(|s| format!("{} {}", s.info.method, s.info.url))
            .collect();
        let guidance: Vec<serde_json::Value> = ranked
            .iter()
            .take(5)
            .map(|s| {
                json!({
                    "url": s.info.url,
                    "method": s.info.method,
                    "heuristic_score": (s.total * 10.0).round() / 10.0,
                })
            })
            .collect();
        vec![
            ChatMessage::system(
                "You select the single request that performs the user's goal from a \
                 recorded browser session. Answer with a URL copied verbatim from the \
                 candidate list.",
            ),
            ChatMessage::user(format!(
                "Goal: {prompt}\n\nCandidates:\n{}\n\nHeuristic ranking (top 5):\n{}",
                candidates.join("\n"),
                serde_json::to_string_pretty(&guidance).unwrap_or_default(),
            )),
        ]
    }
}
