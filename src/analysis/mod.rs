//! The analysis components: URL identification, dynamic-part extraction,
//! input-variable matching, dependency resolution, parameter
//! classification, authentication inventory, workflow discovery, and the
//! completion analyzer.

pub mod auth;
pub mod classifier;
pub mod completion;
pub mod dynamic_parts;
pub mod input_variables;
pub mod resolver;
pub mod url_identifier;
pub mod workflows;

pub use auth::{
    AuthAnalysis, AuthAnalyzer, AuthEndpoint, AuthFailure, AuthReadiness, AuthRequirement,
    AuthToken, AuthType, EndpointPurpose, FlowComplexity, RequestAuthInfo, SecurityIssue,
    TokenKind, TokenLocation,
};
pub use classifier::{
    BootstrapInfo, ClassificationReport, ClassifiedParameter, ClassifierConfig, ConsistencyStat,
    ParamClassification, ParamLocation, ParamMetadata, ParamSource, Parameter,
    ParameterClassifier,
};
pub use completion::{Blocker, CompletionAnalysis, CompletionAnalyzer};
pub use dynamic_parts::{
    is_auth_parameter, DynamicPartsExtractor, ExtractorConfig, SessionPattern,
};
pub use input_variables::{InputVariableMatcher, MatchedInputs};
pub use resolver::{BootstrapSource, DependencyResolver, ResolvedSource};
pub use url_identifier::{ScoredUrl, UrlIdentifier};
pub use workflows::{discover_workflows, WorkflowGroup};
