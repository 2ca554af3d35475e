//! # apiforge-core
//!
//! Analysis kernel that turns a recorded browser session (HTTP Archive plus
//! optional cookie jar) and a natural-language goal into a dependency graph
//! an external emitter can render as a runnable API client.
//!
//! ## Core Components
//!
//! - **har**: immutable recorded-traffic model and cookie jar
//! - **graph**: typed dependency DAG, acyclic by construction
//! - **oracle**: the language-model function-calling boundary
//! - **analysis**: URL identification, dynamic-part extraction, dependency
//!   resolution, parameter classification, auth inventory, completion
//! - **session**: the lifecycle state machine and the session store
//!
//! ## Example
//!
//! ```rust,ignore
//! use apiforge_core::{AnthropicOracle, OracleConfig, SessionStore, CancelSignal};
//! use std::sync::Arc;
//!
//! let oracle = Arc::new(AnthropicOracle::new(OracleConfig::new(api_key)));
//! let store = SessionStore::new(oracle);
//!
//! let id = store
//!     .create_session("session.har", None, "fetch my profile", Default::default())
//!     .await?;
//! while !store.is_complete(id).await?.is_complete {
//!     store.process_next_node(id, &CancelSignal::none()).await?;
//! }
//! ```

pub mod analysis;
pub mod error;
pub mod graph;
pub mod har;
pub mod oracle;
pub mod session;

// Re-exports for convenience
pub use analysis::{
    discover_workflows, is_auth_parameter, AuthAnalysis, AuthAnalyzer, AuthEndpoint,
    AuthReadiness, AuthRequirement, AuthToken, AuthType, Blocker, BootstrapInfo, BootstrapSource,
    ClassificationReport, ClassifiedParameter, ClassifierConfig, CompletionAnalysis,
    CompletionAnalyzer, ConsistencyStat, DependencyResolver, DynamicPartsExtractor,
    EndpointPurpose, ExtractorConfig, FlowComplexity, InputVariableMatcher, MatchedInputs,
    ParamClassification, ParamLocation, ParamMetadata, ParamSource, Parameter,
    ParameterClassifier, RequestAuthInfo, ResolvedSource, ScoredUrl, SecurityIssue,
    SessionPattern, TokenKind, TokenLocation, UrlIdentifier, WorkflowGroup,
};
pub use error::{Error, Result};
pub use graph::{DagEdge, DagNode, DependencyGraph, NodeAttrs, NodeContent, NodeId, NodeKind,
    NodeUpdate};
pub use har::{
    render_curl, BodyPayload, CookieJar, CookieRecord, HarArchive, HarQuality, HarValidation,
    Header, QueryParam, RequestBody, RequestId, RequestRecord, ResponseRecord, UrlInfo,
};
pub use oracle::{
    AnthropicOracle, CancelHandle, CancelSignal, ChatMessage, ChatRole, FunctionSchema, Oracle,
    OracleConfig, TokenUsage, UsageTracker,
};
pub use session::{
    LogEntry, LogLevel, ProcessReport, ProcessStatus, Session, SessionEngine, SessionEvent,
    SessionId, SessionState, SessionStore, SessionSummary, StateMachine, StoreConfig,
};
