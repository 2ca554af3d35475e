//! Error types for apiforge-core.

use thiserror::Error;

/// Result type alias using apiforge-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while analyzing a recorded session.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed HAR/cookie file, missing prompt, or bad command arguments
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The recording contains no entries
    #[error("recording is empty: {0}")]
    HarQualityEmpty(String),

    /// The recording is unlikely to contain a reproducible API action
    #[error("recording quality is poor: {0}")]
    HarQualityPoor(String),

    /// No session with the given identifier
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// DAG node lookup failed
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Inserting the edge would make the dependency graph cyclic
    #[error("edge {from} -> {to} would create a cycle")]
    WouldCreateCycle { from: String, to: String },

    /// The oracle or a caller referenced a URL absent from the recording
    #[error("url not found in recording: {0}")]
    UrlNotFoundInHar(String),

    /// No primary-action candidate survived filtering and fallback
    #[error("could not identify a primary action URL ({} candidates)", available_urls.len())]
    UrlIdentificationFailed {
        available_urls: Vec<String>,
        suggested_action: String,
    },

    /// Oracle transport failure (network, 5xx, provider outage)
    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// Oracle returned a payload that does not match the function schema
    #[error("oracle response violated schema {schema}: {message}")]
    OracleSchemaViolation { schema: String, message: String },

    /// Oracle call exceeded its per-call budget
    #[error("oracle call timed out after {duration_ms}ms")]
    OracleTimeout { duration_ms: u64 },

    /// Oracle provider rejected the call due to rate limiting
    #[error("oracle rate limited: {0}")]
    OracleRateLimited(String),

    /// Oracle provider rejected the credentials
    #[error("oracle authentication failed: {0}")]
    OracleAuth(String),

    /// The operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// The session cannot reach readiness; blockers carry the failing predicates
    #[error("completion blocked: {}", blockers.join(", "))]
    CompletionBlocked {
        blockers: Vec<String>,
        recommendations: Vec<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File system error while reading a recording
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a node-not-found error from any displayable node id.
    pub fn node_not_found(id: impl std::fmt::Display) -> Self {
        Self::NodeNotFound(id.to_string())
    }

    /// Create a cycle-rejection error.
    pub fn would_create_cycle(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::WouldCreateCycle {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create an oracle-timeout error.
    pub fn oracle_timeout(duration_ms: u64) -> Self {
        Self::OracleTimeout { duration_ms }
    }

    /// Create a schema-violation error.
    pub fn schema_violation(schema: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OracleSchemaViolation {
            schema: schema.into(),
            message: message.into(),
        }
    }

    /// Machine-readable code for the host-facing command surface.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::HarQualityEmpty(_) => "har_quality_empty",
            Self::HarQualityPoor(_) => "har_quality_poor",
            Self::SessionNotFound(_) => "session_not_found",
            Self::NodeNotFound(_) => "node_not_found",
            Self::WouldCreateCycle { .. } => "would_create_cycle",
            Self::UrlNotFoundInHar(_) => "url_not_found_in_har",
            Self::UrlIdentificationFailed { .. } => "url_identification_failed",
            Self::OracleUnavailable(_) => "oracle_unavailable",
            Self::OracleSchemaViolation { .. } => "oracle_schema_violation",
            Self::OracleTimeout { .. } => "oracle_timeout",
            Self::OracleRateLimited(_) => "oracle_rate_limited",
            Self::OracleAuth(_) => "oracle_auth",
            Self::Cancelled => "cancelled",
            Self::CompletionBlocked { .. } => "completion_blocked",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }

    /// Whether this error came from the oracle boundary.
    ///
    /// Oracle errors are retried within the per-call budget and then degrade
    /// to a heuristic fallback where one exists; structural errors do not.
    pub fn is_oracle(&self) -> bool {
        matches!(
            self,
            Self::OracleUnavailable(_)
                | Self::OracleSchemaViolation { .. }
                | Self::OracleTimeout { .. }
                | Self::OracleRateLimited(_)
                | Self::OracleAuth(_)
        )
    }

    /// Whether retrying the same call can possibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OracleUnavailable(_)
                | Self::OracleSchemaViolation { .. }
                | Self::OracleTimeout { .. }
                | Self::OracleRateLimited(_)
        )
    }
}
