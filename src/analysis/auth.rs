//! Authentication analysis: a single pass over the recording producing a
//! typed inventory of tokens, auth endpoints, failures, and readiness.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::har::{HarArchive, RequestId, RequestRecord};

use super::dynamic_parts::{AUTH_HEADER_NAMES, SESSION_COOKIE_MARKERS};

/// How a request authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    BearerToken,
    ApiKey,
    BasicAuth,
    SessionCookie,
    OAuth,
    CustomHeader,
    UrlParameter,
    None,
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BearerToken => "bearer_token",
            Self::ApiKey => "api_key",
            Self::BasicAuth => "basic_auth",
            Self::SessionCookie => "session_cookie",
            Self::OAuth => "oauth",
            Self::CustomHeader => "custom_header",
            Self::UrlParameter => "url_parameter",
            Self::None => "none",
        };
        write!(f, "{s}")
    }
}

/// Whether the endpoint appears to demand authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthRequirement {
    Required,
    Optional,
    None,
}

/// Where a token was carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenLocation {
    Header,
    Cookie,
    UrlParam,
    Body,
}

/// What kind of credential a token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Bearer,
    ApiKey,
    Session,
    Csrf,
    Custom,
}

/// One credential observed in the recording, deduped by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub name: String,
    pub value: String,
    pub location: TokenLocation,
    pub kind: TokenKind,
}

/// Why an auth endpoint exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointPurpose {
    Login,
    Refresh,
    Logout,
    Validate,
}

/// An endpoint participating in the authentication flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEndpoint {
    pub url: String,
    pub purpose: EndpointPurpose,
    /// True when the response body mentions token material.
    pub response_contains_token: bool,
}

/// A request the server rejected for authentication reasons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFailure {
    pub url: String,
    pub status: u16,
}

/// Per-request authentication facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestAuthInfo {
    pub request: RequestId,
    pub auth_type: AuthType,
    pub requirement: AuthRequirement,
    pub tokens: Vec<AuthToken>,
    pub failure: Option<AuthFailure>,
}

/// How tangled the authentication flow is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowComplexity {
    Simple,
    Moderate,
    Complex,
}

/// Problems worth surfacing to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SecurityIssue {
    TokenInUrl { url: String, name: String },
    ShortToken { name: String, length: usize },
    FailedRequest { url: String, status: u16 },
}

impl std::fmt::Display for SecurityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TokenInUrl { url, name } => {
                write!(f, "token `{name}` exposed in URL query of {url}")
            }
            Self::ShortToken { name, length } => {
                write!(f, "token `{name}` is only {length} characters")
            }
            Self::FailedRequest { url, status } => {
                write!(f, "request to {url} failed authentication with {status}")
            }
        }
    }
}

/// Whether generated code can authenticate, and with which tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthReadiness {
    /// Zero failed-auth requests and at least one token.
    pub is_ready: bool,
    /// Tokens with no generation endpoint in the recording.
    pub hardcoded: Vec<AuthToken>,
    /// Tokens produced by some recorded response.
    pub dynamic: Vec<AuthToken>,
}

/// The full authentication analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthAnalysis {
    pub requests: Vec<RequestAuthInfo>,
    pub tokens: Vec<AuthToken>,
    pub endpoints: Vec<AuthEndpoint>,
    pub complexity: FlowComplexity,
    pub issues: Vec<SecurityIssue>,
    pub readiness: AuthReadiness,
}

impl AuthAnalysis {
    /// Requests that failed with 401/403.
    pub fn failures(&self) -> Vec<&AuthFailure> {
        self.requests.iter().filter_map(|r| r.failure.as_ref()).collect()
    }
}

/// Single-pass authentication analyzer.
pub struct AuthAnalyzer {
    login_path: Regex,
    refresh_path: Regex,
    logout_path: Regex,
    validate_path: Regex,
}

impl Default for AuthAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthAnalyzer {
    pub fn new() -> Self {
        Self {
            login_path: Regex::new(r"/login|/signin|/auth").unwrap(),
            refresh_path: Regex::new(r"/refresh|/renew").unwrap(),
            logout_path: Regex::new(r"/logout|/signout").unwrap(),
            validate_path: Regex::new(r"/validate|/verify").unwrap(),
        }
    }

    /// Analyze the whole recording.
    pub fn analyze(&self, archive: &HarArchive) -> AuthAnalysis {
        let mut requests = Vec::with_capacity(archive.len());
        let mut tokens: Vec<AuthToken> = Vec::new();
        let mut issues: Vec<SecurityIssue> = Vec::new();

        for record in archive.requests() {
            let info = self.analyze_request(record);
            for token in &info.tokens {
                if !tokens.iter().any(|t| t.value == token.value) {
                    tokens.push(token.clone());
                }
                if token.location == TokenLocation::UrlParam {
                    let issue = SecurityIssue::TokenInUrl {
                        url: record.url.clone(),
                        name: token.name.clone(),
                    };
                    if !issues.contains(&issue) {
                        issues.push(issue);
                    }
                }
            }
            if let Some(failure) = &info.failure {
                issues.push(SecurityIssue::FailedRequest {
                    url: failure.url.clone(),
                    status: failure.status,
                });
            }
            requests.push(info);
        }

        for token in &tokens {
            if token.value.len() < 10 {
                issues.push(SecurityIssue::ShortToken {
                    name: token.name.clone(),
                    length: token.value.len(),
                });
            }
        }

        let endpoints = self.collect_endpoints(archive);
        let complexity = self.flow_complexity(archive, &endpoints);
        let readiness = self.readiness(archive, &requests, &tokens);

        AuthAnalysis {
            requests,
            tokens,
            endpoints,
            complexity,
            issues,
            readiness,
        }
    }

    fn analyze_request(&self, record: &RequestRecord) -> RequestAuthInfo {
        let mut tokens = Vec::new();
        let mut auth_type = AuthType::None;

        if let Some(authorization) = record.header("authorization") {
            if let Some(value) = authorization.strip_prefix("Bearer ") {
                auth_type = AuthType::BearerToken;
                tokens.push(AuthToken {
                    name: "authorization".to_string(),
                    value: value.to_string(),
                    location: TokenLocation::Header,
                    kind: TokenKind::Bearer,
                });
            } else if let Some(value) = authorization.strip_prefix("Basic ") {
                auth_type = AuthType::BasicAuth;
                tokens.push(AuthToken {
                    name: "authorization".to_string(),
                    value: value.to_string(),
                    location: TokenLocation::Header,
                    kind: TokenKind::Custom,
                });
            } else {
                auth_type = AuthType::CustomHeader;
                tokens.push(AuthToken {
                    name: "authorization".to_string(),
                    value: authorization.to_string(),
                    location: TokenLocation::Header,
                    kind: TokenKind::Custom,
                });
            }
        }

        for header in &record.headers {
            let name = header.name.to_ascii_lowercase();
            if name == "authorization" || !AUTH_HEADER_NAMES.contains(&name.as_str()) {
                continue;
            }
            let kind = if name.contains("csrf") || name.contains("xsrf") {
                TokenKind::Csrf
            } else if name.contains("api") {
                TokenKind::ApiKey
            } else {
                TokenKind::Custom
            };
            if auth_type == AuthType::None {
                auth_type = if kind == TokenKind::ApiKey {
                    AuthType::ApiKey
                } else {
                    AuthType::CustomHeader
                };
            }
            tokens.push(AuthToken {
                name,
                value: header.value.clone(),
                location: TokenLocation::Header,
                kind,
            });
        }

        for (name, value) in record.cookie_pairs() {
            let lower = name.to_ascii_lowercase();
            if SESSION_COOKIE_MARKERS.iter().any(|m| lower.contains(m)) {
                if auth_type == AuthType::None {
                    auth_type = AuthType::SessionCookie;
                }
                tokens.push(AuthToken {
                    name,
                    value,
                    location: TokenLocation::Cookie,
                    kind: TokenKind::Session,
                });
            }
        }

        let mut url_param_only = false;
        for q in &record.query {
            let lower = q.name.to_ascii_lowercase();
            if ["token", "access_token", "apikey", "api_key", "key"].contains(&lower.as_str()) {
                if auth_type == AuthType::None {
                    auth_type = AuthType::UrlParameter;
                    url_param_only = true;
                }
                tokens.push(AuthToken {
                    name: q.name.clone(),
                    value: q.value.clone(),
                    location: TokenLocation::UrlParam,
                    kind: if lower.contains("api") || lower == "key" {
                        TokenKind::ApiKey
                    } else {
                        TokenKind::Bearer
                    },
                });
            }
        }

        if record.url.to_ascii_lowercase().contains("oauth") {
            auth_type = AuthType::OAuth;
        }

        let failure = record.response.as_ref().and_then(|resp| {
            matches!(resp.status, 401 | 403).then(|| AuthFailure {
                url: record.url.clone(),
                status: resp.status,
            })
        });

        let requirement = if failure.is_some() {
            AuthRequirement::Required
        } else if url_param_only {
            AuthRequirement::Optional
        } else if !tokens.is_empty() {
            AuthRequirement::Required
        } else {
            AuthRequirement::None
        };

        RequestAuthInfo {
            request: record.id,
            auth_type,
            requirement,
            tokens,
            failure,
        }
    }

    fn collect_endpoints(&self, archive: &HarArchive) -> Vec<AuthEndpoint> {
        let mut endpoints: Vec<AuthEndpoint> = Vec::new();
        for record in archive.requests() {
            let path = record.path().to_ascii_lowercase();
            let purpose = if self.refresh_path.is_match(&path) {
                Some(EndpointPurpose::Refresh)
            } else if self.logout_path.is_match(&path) {
                Some(EndpointPurpose::Logout)
            } else if self.validate_path.is_match(&path) {
                Some(EndpointPurpose::Validate)
            } else if self.login_path.is_match(&path) {
                Some(EndpointPurpose::Login)
            } else {
                None
            };
            let Some(purpose) = purpose else { continue };
            if endpoints.iter().any(|e| e.url == record.url) {
                continue;
            }
            let response_contains_token = record
                .response
                .as_ref()
                .and_then(|r| r.body.as_deref())
                .map(|body| {
                    let lower = body.to_ascii_lowercase();
                    lower.contains("token") || lower.contains("access") || lower.contains("bearer")
                })
                .unwrap_or(false);
            endpoints.push(AuthEndpoint {
                url: record.url.clone(),
                purpose,
                response_contains_token,
            });
        }
        endpoints
    }

    fn flow_complexity(&self, archive: &HarArchive, endpoints: &[AuthEndpoint]) -> FlowComplexity {
        let has_oauth = archive
            .requests()
            .iter()
            .any(|r| r.url.to_ascii_lowercase().contains("oauth"));
        if endpoints.len() > 4 || has_oauth {
            FlowComplexity::Complex
        } else if endpoints.len() > 2
            || endpoints
                .iter()
                .any(|e| e.purpose == EndpointPurpose::Refresh)
        {
            FlowComplexity::Moderate
        } else {
            FlowComplexity::Simple
        }
    }

    fn readiness(
        &self,
        archive: &HarArchive,
        requests: &[RequestAuthInfo],
        tokens: &[AuthToken],
    ) -> AuthReadiness {
        let failed = requests.iter().any(|r| r.failure.is_some());
        let mut hardcoded = Vec::new();
        let mut dynamic = Vec::new();
        for token in tokens {
            // A generation endpoint exists when some recorded response carries
            // the token value.
            let generated = archive.requests().iter().any(|r| {
                r.response
                    .as_ref()
                    .map(|resp| resp.contains_value(&token.value))
                    .unwrap_or(false)
            });
            if generated {
                dynamic.push(token.clone());
            } else {
                hardcoded.push(token.clone());
            }
        }
        AuthReadiness {
            is_ready: !failed && !tokens.is_empty(),
            hardcoded,
            dynamic,
        }
    }
}
