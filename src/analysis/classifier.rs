//! Five-way parameter classification: consistency pass, heuristic pass,
//! merge, oracle refinement, and bootstrap enrichment.
//!
//! The pipeline is a deterministic function of the request set and the
//! oracle transcript: parameters are processed in sorted order and every
//! heuristic is a pure function of (name, value, consistency stats).

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::har::{HarArchive, RequestRecord};
use crate::oracle::schemas::{self, ClassifyParametersAnswer};
use crate::oracle::{CancelSignal, ChatMessage, Oracle};

use super::dynamic_parts::is_auth_parameter;
use super::resolver::DependencyResolver;

/// The five classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamClassification {
    /// Must be resolved from a prior response at runtime.
    #[serde(rename = "dynamic")]
    Dynamic,
    /// Stable within one session, different across sessions.
    #[serde(rename = "sessionConstant")]
    SessionConstant,
    /// Exposed as a function argument in the generated client.
    #[serde(rename = "userInput")]
    UserInput,
    /// Safe to hardcode.
    #[serde(rename = "staticConstant")]
    StaticConstant,
    /// Can be omitted.
    #[serde(rename = "optional")]
    Optional,
}

impl ParamClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dynamic => "dynamic",
            Self::SessionConstant => "sessionConstant",
            Self::UserInput => "userInput",
            Self::StaticConstant => "staticConstant",
            Self::Optional => "optional",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dynamic" => Some(Self::Dynamic),
            "sessionConstant" => Some(Self::SessionConstant),
            "userInput" => Some(Self::UserInput),
            "staticConstant" => Some(Self::StaticConstant),
            "optional" => Some(Self::Optional),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which stage produced the final classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamSource {
    Heuristic,
    Consistency,
    Oracle,
    ManualOverride,
}

/// Where a parameter was observed in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamLocation {
    Query,
    Header,
    Cookie,
    Body,
}

/// A raw parameter pulled from a request before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub value: String,
    pub location: ParamLocation,
}

/// Bootstrap metadata attached to session constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapInfo {
    pub source_url: Option<String>,
    pub source_type: Option<String>,
    pub requires_bootstrap: bool,
    pub resolved: bool,
}

/// Occurrence statistics carried on every classified parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamMetadata {
    /// How often the most common value was seen.
    pub occurrences: usize,
    /// Total observations of this parameter name.
    pub total_observations: usize,
    pub consistency: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapInfo>,
}

/// A fully classified parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedParameter {
    pub name: String,
    pub value: String,
    pub classification: ParamClassification,
    pub confidence: f64,
    pub source: ParamSource,
    pub location: ParamLocation,
    pub metadata: ParamMetadata,
}

/// Validation output: structurally broken parameters and soft warnings.
#[derive(Debug, Clone, Default)]
pub struct ClassificationReport {
    pub valid: Vec<ClassifiedParameter>,
    pub invalid: Vec<ClassifiedParameter>,
    pub warnings: Vec<String>,
}

/// Per-name consistency statistics across the recording.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyStat {
    pub most_common_value: String,
    pub occurrences: usize,
    pub total_observations: usize,
    pub consistency: f64,
    /// Fraction of requests in which the parameter appears.
    pub occurrence_rate: f64,
}

/// Tuning knobs for the classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Parameters below this confidence go to the oracle for refinement.
    pub oracle_confidence_floor: f64,
    /// Minimum value length before bootstrap lookup is attempted. Short
    /// numeric literals cause false-positive text matches.
    pub bootstrap_min_value_len: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            oracle_confidence_floor: 0.8,
            bootstrap_min_value_len: 8,
        }
    }
}

const STATIC_NAME_MARKERS: &[&str] = &[
    "latitude", "longitude", "lat", "lng", "version", "v", "format", "fmt",
];
const SEARCH_NAMES: &[&str] = &[
    "q", "query", "search", "term", "keyword", "pesquisa", "busca",
];
const PAGINATION_NAMES: &[&str] = &["page", "limit", "offset", "per_page", "size", "start"];

/// Hybrid heuristic/oracle parameter classifier.
pub struct ParameterClassifier {
    config: ClassifierConfig,
    session_name: Regex,
    api_key_name: Regex,
    csrf_name: Regex,
    date_name: Regex,
    location_name: Regex,
    legal_name: Regex,
    filter_name: Regex,
    iso_date_value: Regex,
    unix_ts_value: Regex,
    token_value: Regex,
}

impl Default for ParameterClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl ParameterClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            session_name: Regex::new(r"(?i)(session|sess_?id|\bsid\b)").unwrap(),
            api_key_name: Regex::new(r"(?i)(api[_-]?key|apikey|access[_-]?key)").unwrap(),
            csrf_name: Regex::new(r"(?i)(csrf|xsrf)").unwrap(),
            date_name: Regex::new(r"(?i)^(date|data|from|to|start|end|inicio|fim)").unwrap(),
            location_name: Regex::new(r"(?i)^(lat|lng|latitude|longitude|geo)").unwrap(),
            legal_name: Regex::new(r"(?i)(processo|tribunal|juris|acordao|sentenca)").unwrap(),
            filter_name: Regex::new(r"(?i)^(filter|filtro|sort|order)").unwrap(),
            iso_date_value: Regex::new(r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2})?").unwrap(),
            unix_ts_value: Regex::new(r"^\d{10}(\d{3})?$").unwrap(),
            token_value: Regex::new(r"^[0-9a-fA-F]{16,}$|^[A-Za-z0-9_-]{16,}$").unwrap(),
        }
    }

    // ==================== Parameter collection ====================

    /// Pull the classifiable parameters out of one request: query params,
    /// top-level JSON body fields, auth headers, and cookie pairs.
    pub fn collect_parameters(request: &RequestRecord) -> Vec<Parameter> {
        let mut params = Vec::new();
        for q in &request.query {
            params.push(Parameter {
                name: q.name.clone(),
                value: q.value.clone(),
                location: ParamLocation::Query,
            });
        }
        if let Some(body) = &request.body {
            if let crate::har::BodyPayload::Json(serde_json::Value::Object(map)) = &body.payload {
                for (name, value) in map {
                    let rendered = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    params.push(Parameter {
                        name: name.clone(),
                        value: rendered,
                        location: ParamLocation::Body,
                    });
                }
            }
        }
        for header in &request.headers {
            if is_auth_parameter(&header.name) {
                params.push(Parameter {
                    name: header.name.to_ascii_lowercase(),
                    value: header.value.clone(),
                    location: ParamLocation::Header,
                });
            }
        }
        for (name, value) in request.cookie_pairs() {
            params.push(Parameter {
                name,
                value,
                location: ParamLocation::Cookie,
            });
        }
        params.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.value.cmp(&b.value)));
        params.dedup();
        params
    }

    // ==================== Consistency pass ====================

    /// Value-frequency statistics per parameter name across all requests.
    ///
    /// Zero-observation names never appear here; callers treating an absent
    /// entry use consistency 1.0 with a single occurrence, so no division
    /// by zero can propagate.
    pub fn consistency_stats(archive: &HarArchive) -> HashMap<String, ConsistencyStat> {
        let total_requests = archive.len().max(1);
        let mut per_name: HashMap<String, HashMap<String, usize>> = HashMap::new();
        let mut appears_in: HashMap<String, usize> = HashMap::new();

        for request in archive.requests() {
            let params = Self::collect_parameters(request);
            let mut seen_names: Vec<&str> = Vec::new();
            for param in &params {
                *per_name
                    .entry(param.name.clone())
                    .or_default()
                    .entry(param.value.clone())
                    .or_insert(0) += 1;
                if !seen_names.contains(&param.name.as_str()) {
                    seen_names.push(&param.name);
                    *appears_in.entry(param.name.clone()).or_insert(0) += 1;
                }
            }
        }

        per_name
            .into_iter()
            .map(|(name, values)| {
                let total: usize = values.values().sum();
                let (most_common_value, occurrences) = values
                    .into_iter()
                    .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
                    .unwrap_or_default();
                let rate = appears_in.get(&name).copied().unwrap_or(0) as f64
                    / total_requests as f64;
                (
                    name,
                    ConsistencyStat {
                        most_common_value,
                        occurrences,
                        total_observations: total,
                        consistency: occurrences as f64 / total.max(1) as f64,
                        occurrence_rate: rate,
                    },
                )
            })
            .collect()
    }

    fn stat_or_default(stats: &HashMap<String, ConsistencyStat>, param: &Parameter) -> ConsistencyStat {
        stats.get(&param.name).cloned().unwrap_or(ConsistencyStat {
            most_common_value: param.value.clone(),
            occurrences: 1,
            total_observations: 1,
            consistency: 1.0,
            occurrence_rate: 1.0,
        })
    }

    fn is_static_name(name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        STATIC_NAME_MARKERS.contains(&lower.as_str())
    }

    // ==================== Heuristic pass ====================

    /// Pure heuristic classification of one parameter.
    pub fn heuristic(
        &self,
        param: &Parameter,
        stat: &ConsistencyStat,
    ) -> (ParamClassification, f64) {
        let name = param.name.as_str();
        let value = param.value.as_str();

        // High-priority rule: strongly consistent, frequently present.
        if stat.consistency > 0.9 && stat.occurrence_rate > 0.5 {
            if is_auth_parameter(name) {
                return (ParamClassification::SessionConstant, 0.95);
            }
            if Self::is_static_name(name) {
                return (ParamClassification::StaticConstant, 0.95);
            }
            return (ParamClassification::StaticConstant, 0.9);
        }

        // Domain library.
        if self.api_key_name.is_match(name) || self.csrf_name.is_match(name) {
            return (ParamClassification::SessionConstant, 0.9);
        }
        if self.session_name.is_match(name) {
            return (ParamClassification::SessionConstant, 0.85);
        }
        if SEARCH_NAMES.contains(&name.to_ascii_lowercase().as_str()) {
            return (ParamClassification::UserInput, 0.85);
        }
        if PAGINATION_NAMES.contains(&name.to_ascii_lowercase().as_str()) {
            return (ParamClassification::UserInput, 0.8);
        }
        if self.legal_name.is_match(name) {
            return (ParamClassification::UserInput, 0.8);
        }
        if self.filter_name.is_match(name) {
            return (ParamClassification::UserInput, 0.75);
        }
        if self.date_name.is_match(name) {
            return (ParamClassification::UserInput, 0.75);
        }

        // Location/name defaults.
        if param.location == ParamLocation::Header && is_auth_parameter(name) {
            return (ParamClassification::SessionConstant, 0.8);
        }
        if self.location_name.is_match(name) && value == "0" {
            return (ParamClassification::StaticConstant, 0.9);
        }
        if self.location_name.is_match(name) {
            return (ParamClassification::UserInput, 0.6);
        }

        // Value shape.
        if self.token_value.is_match(value) {
            return (ParamClassification::SessionConstant, 0.7);
        }
        if self.iso_date_value.is_match(value) || self.unix_ts_value.is_match(value) {
            return (ParamClassification::UserInput, 0.8);
        }

        (ParamClassification::UserInput, 0.4)
    }

    // ==================== Merge ====================

    fn merge(
        &self,
        param: &Parameter,
        stat: &ConsistencyStat,
        heuristic: (ParamClassification, f64),
    ) -> (ParamClassification, f64, ParamSource) {
        let (classification, confidence) = heuristic;

        if stat.consistency > 0.9 && stat.total_observations > 2 {
            if is_auth_parameter(&param.name) {
                return (
                    ParamClassification::SessionConstant,
                    0.95,
                    ParamSource::Consistency,
                );
            }
            if Self::is_static_name(&param.name) {
                return (
                    ParamClassification::StaticConstant,
                    0.95,
                    ParamSource::Consistency,
                );
            }
            if confidence <= 0.8 {
                return (
                    classification,
                    (confidence * 1.1).min(0.95),
                    ParamSource::Heuristic,
                );
            }
        } else if stat.consistency < 0.5 {
            return (classification, confidence * 0.8, ParamSource::Heuristic);
        }

        (classification, confidence, ParamSource::Heuristic)
    }

    // ==================== Pipeline ====================

    /// Run the full pipeline over a set of parameters.
    ///
    /// `prompt` supplies domain-context hints to the refinement call;
    /// `target_url` marks the primary action so bootstrap lookup skips it.
    pub async fn classify_all(
        &self,
        oracle: &dyn Oracle,
        archive: &HarArchive,
        prompt: &str,
        target_url: Option<&str>,
        parameters: Vec<Parameter>,
        cancel: &CancelSignal,
    ) -> Vec<ClassifiedParameter> {
        let stats = Self::consistency_stats(archive);

        let mut ordered = parameters;
        ordered.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.value.cmp(&b.value)));
        ordered.dedup();

        let mut classified: Vec<ClassifiedParameter> = ordered
            .into_iter()
            .map(|param| {
                let stat = Self::stat_or_default(&stats, &param);
                let heuristic = self.heuristic(&param, &stat);
                let (classification, confidence, source) = self.merge(&param, &stat, heuristic);
                ClassifiedParameter {
                    metadata: ParamMetadata {
                        occurrences: stat.occurrences,
                        total_observations: stat.total_observations,
                        consistency: stat.consistency,
                        bootstrap: None,
                    },
                    name: param.name,
                    value: param.value,
                    classification,
                    confidence,
                    source,
                    location: param.location,
                }
            })
            .collect();

        self.refine_with_oracle(oracle, prompt, &mut classified, cancel)
            .await;
        self.enrich_bootstrap(archive, target_url, &mut classified);
        classified
    }

    /// Batch oracle refinement of every parameter below the confidence
    /// floor. Heuristics stand on oracle failure.
    async fn refine_with_oracle(
        &self,
        oracle: &dyn Oracle,
        prompt: &str,
        classified: &mut [ClassifiedParameter],
        cancel: &CancelSignal,
    ) {
        let uncertain: Vec<usize> = classified
            .iter()
            .enumerate()
            .filter(|(_, p)| p.confidence < self.config.oracle_confidence_floor)
            .map(|(i, _)| i)
            .collect();
        if uncertain.is_empty() {
            return;
        }

        let listing: Vec<serde_json::Value> = uncertain
            .iter()
            .map(|&i| {
                let p = &classified[i];
                json!({
                    "name": p.name,
                    "value": p.value,
                    "location": p.location,
                    "heuristic": p.classification.as_str(),
                    "consistency": (p.metadata.consistency * 100.0).round() / 100.0,
                })
            })
            .collect();
        let messages = vec![
            ChatMessage::system(
                "You classify HTTP request parameters for API client generation. \
                 dynamic: must be fetched from a prior response at runtime. \
                 sessionConstant: fixed within one session (session ids, CSRF, keys). \
                 userInput: exposed as a function argument. \
                 staticConstant: safe to hardcode. optional: can be omitted.",
            ),
            ChatMessage::user(format!(
                "Session goal: {prompt}\n\nParameters:\n{}",
                serde_json::to_string_pretty(&listing).unwrap_or_default()
            )),
        ];

        match oracle
            .call_function(&messages, &schemas::classify_parameters(), cancel)
            .await
        {
            Ok(value) => match serde_json::from_value::<ClassifyParametersAnswer>(value) {
                Ok(answer) => {
                    for refined in answer.classified_parameters {
                        let Some(classification) =
                            ParamClassification::parse(&refined.classification)
                        else {
                            continue;
                        };
                        if let Some(param) = classified.iter_mut().find(|p| {
                            p.name == refined.parameter_name
                                && p.value == refined.parameter_value
                                && p.confidence < self.config.oracle_confidence_floor
                        }) {
                            param.classification = classification;
                            param.confidence = refined.confidence.clamp(0.0, 0.95);
                            param.source = ParamSource::Oracle;
                        }
                    }
                    debug!("oracle refinement applied");
                }
                Err(e) => warn!(error = %e, "unparseable classification answer"),
            },
            Err(e) => warn!(error = %e, "classification oracle call failed, keeping heuristics"),
        }
    }

    /// Attach bootstrap sources to session constants.
    fn enrich_bootstrap(
        &self,
        archive: &HarArchive,
        target_url: Option<&str>,
        classified: &mut [ClassifiedParameter],
    ) {
        let resolver = DependencyResolver::new();
        for param in classified
            .iter_mut()
            .filter(|p| p.classification == ParamClassification::SessionConstant)
        {
            let lookup = if param.value.len() >= self.config.bootstrap_min_value_len {
                resolver.find_bootstrap_source(archive, &param.value, target_url)
            } else {
                None
            };
            param.metadata.bootstrap = Some(match lookup {
                Some(source) => {
                    param.confidence = (param.confidence + 0.1).min(1.0);
                    BootstrapInfo {
                        source_url: Some(source.source_url),
                        source_type: Some(source.source_type),
                        requires_bootstrap: true,
                        resolved: true,
                    }
                }
                None => BootstrapInfo {
                    source_url: None,
                    source_type: None,
                    requires_bootstrap: true,
                    resolved: false,
                },
            });
        }
    }

    // ==================== Validation ====================

    /// Split classified parameters into valid/invalid and collect warnings.
    pub fn validate(parameters: &[ClassifiedParameter]) -> ClassificationReport {
        let mut report = ClassificationReport::default();
        for param in parameters {
            if param.name.is_empty() || param.value.is_empty() {
                report.invalid.push(param.clone());
                continue;
            }
            if param.confidence < 0.3 {
                report.warnings.push(format!(
                    "parameter `{}` classified {} at low confidence {:.2}",
                    param.name, param.classification, param.confidence
                ));
            }
            if param.classification == ParamClassification::Dynamic && param.confidence < 0.7 {
                report.warnings.push(format!(
                    "dynamic parameter `{}` below 0.7 confidence ({:.2})",
                    param.name, param.confidence
                ));
            }
            report.valid.push(param.clone());
        }
        report
    }
}
