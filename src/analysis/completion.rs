//! Readiness-for-emission: the single source of truth on whether a session
//! can hand off to the code emitter, and what blocks it when it cannot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::graph::{DependencyGraph, NodeId, NodeKind};

use super::auth::AuthAnalysis;
use super::classifier::{ClassifiedParameter, ParamClassification};

/// A failing readiness predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Blocker {
    NoMasterNode,
    NoActionUrl,
    DagIncomplete,
    QueueNotEmpty,
    UnresolvedNodes,
    AuthNotReady,
    NodesUnclassified,
    UnresolvedSessionConstants,
}

impl std::fmt::Display for Blocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoMasterNode => "no_master_node",
            Self::NoActionUrl => "no_action_url",
            Self::DagIncomplete => "dag_incomplete",
            Self::QueueNotEmpty => "queue_not_empty",
            Self::UnresolvedNodes => "unresolved_nodes",
            Self::AuthNotReady => "auth_not_ready",
            Self::NodesUnclassified => "nodes_unclassified",
            Self::UnresolvedSessionConstants => "unresolved_session_constants",
        };
        write!(f, "{s}")
    }
}

impl Blocker {
    /// Fixed catalog of actions for each blocker.
    pub fn recommendations(&self) -> &'static [&'static str] {
        match self {
            Self::NoMasterNode => &["use setMasterNode to pick the primary request"],
            Self::NoActionUrl => &["use setActionUrl to pin the primary action URL"],
            Self::DagIncomplete => &[
                "resolve NotFound placeholders with forceDependency",
                "use injectResponse to supply a canned producer response",
            ],
            Self::QueueNotEmpty => &["call processNextNode until the queue drains"],
            Self::UnresolvedNodes => &[
                "use forceDependency to link the value to a producer",
                "use injectResponse to supply a canned response",
            ],
            Self::AuthNotReady => &["review the 401/403 responses in the recording"],
            Self::NodesUnclassified => &["call processNextNode to finish classification"],
            Self::UnresolvedSessionConstants => &[
                "use injectResponse to provide a bootstrap response",
                "use overrideParameterClassification if the value is static",
            ],
        }
    }
}

/// Aggregated readiness diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionAnalysis {
    pub has_master_node: bool,
    pub has_action_url: bool,
    pub dag_complete: bool,
    pub queue_empty: bool,
    pub total_nodes: usize,
    pub unresolved_nodes: usize,
    pub pending_in_queue: usize,
    pub auth_analysis_complete: bool,
    pub auth_ready: bool,
    pub auth_errors: Vec<String>,
    pub all_nodes_classified: bool,
    pub nodes_needing_classification: Vec<NodeId>,
    pub bootstrap_analysis_complete: bool,
    pub session_constants_count: usize,
    pub unresolved_session_constants: usize,
    pub is_complete: bool,
    pub blockers: Vec<Blocker>,
    pub recommendations: Vec<String>,
}

/// Computes readiness from the session's current state.
#[derive(Debug, Default)]
pub struct CompletionAnalyzer;

impl CompletionAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate the diagnostics.
    ///
    /// `auth_ready` here means "no authentication failures in the
    /// recording": a recording with no tokens at all can still emit; the
    /// stricter token-bearing readiness lives on
    /// [`AuthAnalysis::readiness`].
    pub fn analyze(
        &self,
        graph: &DependencyGraph,
        queue_len: usize,
        action_url: Option<&str>,
        auth: Option<&AuthAnalysis>,
        classified: &HashMap<NodeId, Vec<ClassifiedParameter>>,
        bootstrap_analysis_complete: bool,
    ) -> CompletionAnalysis {
        let has_master_node = graph.master().is_some();
        let has_action_url = action_url.is_some();
        let dag_complete = graph.is_complete();
        let queue_empty = queue_len == 0;
        let unresolved = graph.unresolved_nodes();

        let auth_errors: Vec<String> = auth
            .map(|a| a.failures().iter().map(|f| format!("{} -> {}", f.url, f.status)).collect())
            .unwrap_or_default();
        let auth_ready = auth.is_some() && auth_errors.is_empty();

        // Request-bearing nodes must all have classification results.
        let nodes_needing_classification: Vec<NodeId> = graph
            .nodes()
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Master | NodeKind::Curl))
            .filter(|n| !classified.contains_key(&n.id))
            .map(|n| n.id)
            .collect();
        let all_nodes_classified = nodes_needing_classification.is_empty();

        let session_constants: Vec<&ClassifiedParameter> = classified
            .values()
            .flatten()
            .filter(|p| p.classification == ParamClassification::SessionConstant)
            .collect();
        let unresolved_session_constants = session_constants
            .iter()
            .filter(|p| {
                let bootstrapped = p
                    .metadata
                    .bootstrap
                    .as_ref()
                    .map(|b| b.resolved)
                    .unwrap_or(bootstrap_analysis_complete);
                // A producer inside the DAG (cookie node, prior response)
                // also counts as a source for the constant.
                let produced_in_dag = graph.nodes().iter().any(|n| {
                    n.extracted_parts
                        .iter()
                        .any(|part| !part.is_empty() && p.value.contains(part))
                });
                !bootstrapped && !produced_in_dag
            })
            .count();

        let mut blockers = Vec::new();
        if !has_master_node {
            blockers.push(Blocker::NoMasterNode);
        }
        if !has_action_url {
            blockers.push(Blocker::NoActionUrl);
        }
        if !queue_empty {
            blockers.push(Blocker::QueueNotEmpty);
        }
        if !dag_complete {
            blockers.push(Blocker::DagIncomplete);
            if !unresolved.is_empty() {
                blockers.push(Blocker::UnresolvedNodes);
            }
        }
        if !auth_ready {
            blockers.push(Blocker::AuthNotReady);
        }
        if !all_nodes_classified {
            blockers.push(Blocker::NodesUnclassified);
        }
        if unresolved_session_constants > 0 {
            blockers.push(Blocker::UnresolvedSessionConstants);
        }

        let is_complete = has_master_node
            && dag_complete
            && queue_empty
            && auth_ready
            && all_nodes_classified
            && unresolved_session_constants == 0;

        let recommendations = blockers
            .iter()
            .flat_map(|b| b.recommendations().iter().map(|s| s.to_string()))
            .collect();

        CompletionAnalysis {
            has_master_node,
            has_action_url,
            dag_complete,
            queue_empty,
            total_nodes: graph.node_count(),
            unresolved_nodes: unresolved.len(),
            pending_in_queue: queue_len,
            auth_analysis_complete: auth.is_some(),
            auth_ready,
            auth_errors,
            all_nodes_classified,
            nodes_needing_classification,
            bootstrap_analysis_complete,
            session_constants_count: session_constants.len(),
            unresolved_session_constants,
            is_complete,
            blockers,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::auth::AuthAnalyzer;
    use crate::graph::{NodeAttrs, NodeContent};
    use crate::har::{HarArchive, RequestId};
    use pretty_assertions::assert_eq;

    fn plain_auth() -> AuthAnalysis {
        let archive = HarArchive::from_json(
            r#"{"log": {"entries": [
                {"request": {"method": "GET", "url": "https://api.x/v1/ping", "headers": []},
                 "response": {"status": 200, "statusText": "OK", "headers": [],
                              "content": {"mimeType": "application/json", "text": "{}"}}}
            ]}}"#,
        )
        .unwrap();
        AuthAnalyzer::new().analyze(&archive)
    }

    #[test]
    fn test_complete_single_node_session() {
        let mut graph = DependencyGraph::new();
        let master = graph.add_node(
            NodeKind::Master,
            NodeContent::Request(RequestId(0)),
            NodeAttrs::default(),
        );
        let mut classified = HashMap::new();
        classified.insert(master, Vec::new());

        let auth = plain_auth();
        let analysis = CompletionAnalyzer::new().analyze(
            &graph,
            0,
            Some("https://api.x/v1/ping"),
            Some(&auth),
            &classified,
            true,
        );
        assert!(analysis.is_complete);
        assert!(analysis.blockers.is_empty());
        assert!(analysis.recommendations.is_empty());
        assert_eq!(analysis.total_nodes, 1);
    }

    #[test]
    fn test_missing_master_blocks() {
        let graph = DependencyGraph::new();
        let auth = plain_auth();
        let analysis = CompletionAnalyzer::new().analyze(
            &graph,
            0,
            None,
            Some(&auth),
            &HashMap::new(),
            true,
        );
        assert!(!analysis.is_complete);
        assert!(analysis.blockers.contains(&Blocker::NoMasterNode));
        assert!(analysis.blockers.contains(&Blocker::NoActionUrl));
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.contains("setMasterNode")));
    }

    #[test]
    fn test_not_found_node_blocks_with_force_dependency_hint() {
        let mut graph = DependencyGraph::new();
        let master = graph.add_node(
            NodeKind::Master,
            NodeContent::Request(RequestId(0)),
            NodeAttrs::default(),
        );
        graph.add_node(
            NodeKind::NotFound,
            NodeContent::Value("deadbeef".to_string()),
            NodeAttrs::default().with_dynamic_parts(vec!["deadbeef".to_string()]),
        );
        let mut classified = HashMap::new();
        classified.insert(master, Vec::new());

        let auth = plain_auth();
        let analysis = CompletionAnalyzer::new().analyze(
            &graph,
            0,
            Some("https://api.x/v1/ping"),
            Some(&auth),
            &classified,
            true,
        );
        assert!(!analysis.is_complete);
        assert!(analysis.blockers.contains(&Blocker::UnresolvedNodes));
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.contains("forceDependency")));
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.contains("injectResponse")));
    }

    #[test]
    fn test_pending_queue_blocks() {
        let mut graph = DependencyGraph::new();
        let master = graph.add_node(
            NodeKind::Master,
            NodeContent::Request(RequestId(0)),
            NodeAttrs::default(),
        );
        let mut classified = HashMap::new();
        classified.insert(master, Vec::new());
        let auth = plain_auth();
        let analysis = CompletionAnalyzer::new().analyze(
            &graph,
            2,
            Some("https://api.x/v1/ping"),
            Some(&auth),
            &classified,
            true,
        );
        assert!(!analysis.is_complete);
        assert_eq!(analysis.pending_in_queue, 2);
        assert!(analysis.blockers.contains(&Blocker::QueueNotEmpty));
    }

    #[test]
    fn test_missing_auth_analysis_blocks() {
        let mut graph = DependencyGraph::new();
        let master = graph.add_node(
            NodeKind::Master,
            NodeContent::Request(RequestId(0)),
            NodeAttrs::default(),
        );
        let mut classified = HashMap::new();
        classified.insert(master, Vec::new());
        let analysis = CompletionAnalyzer::new().analyze(
            &graph,
            0,
            Some("https://api.x/v1/ping"),
            None,
            &classified,
            true,
        );
        assert!(!analysis.auth_analysis_complete);
        assert!(analysis.blockers.contains(&Blocker::AuthNotReady));
    }

    #[test]
    fn test_unclassified_nodes_block() {
        let mut graph = DependencyGraph::new();
        let master = graph.add_node(
            NodeKind::Master,
            NodeContent::Request(RequestId(0)),
            NodeAttrs::default(),
        );
        let auth = plain_auth();
        let analysis = CompletionAnalyzer::new().analyze(
            &graph,
            0,
            Some("https://api.x/v1/ping"),
            Some(&auth),
            &HashMap::new(),
            true,
        );
        assert!(!analysis.all_nodes_classified);
        assert_eq!(analysis.nodes_needing_classification, vec![master]);
        assert!(analysis.blockers.contains(&Blocker::NodesUnclassified));
    }
}
