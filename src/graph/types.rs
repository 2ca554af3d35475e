//! Node and edge types for the dependency graph.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::har::RequestId;

/// Lightweight index of a node inside its owning [`super::DependencyGraph`].
///
/// Nodes live in a vector; ids are never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// The role a node plays in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The primary request whose reproduction is the session goal. Exactly
    /// one exists once workflow selection completes.
    Master,
    /// An ordinary request contributing a value consumed by a descendant.
    Curl,
    /// A cookie supplying a value.
    Cookie,
    /// Placeholder for a dynamic value with no identified source. Its
    /// presence (while unresolved) keeps the graph incomplete.
    NotFound,
    /// A request parameter surfaced to the generated client's signature.
    UserInput,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Curl => write!(f, "curl"),
            Self::Cookie => write!(f, "cookie"),
            Self::NotFound => write!(f, "not_found"),
            Self::UserInput => write!(f, "user_input"),
        }
    }
}

/// Per-kind payload of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeContent {
    /// Reference into the archive (Master and Curl nodes).
    Request(RequestId),
    /// A cookie name (Cookie nodes).
    Cookie(String),
    /// A raw value (NotFound and UserInput nodes).
    Value(String),
}

impl NodeContent {
    /// The referenced request, when this node wraps one.
    pub fn request(&self) -> Option<RequestId> {
        match self {
            Self::Request(id) => Some(*id),
            _ => None,
        }
    }
}

/// A node in the dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub content: NodeContent,
    /// Values this node still needs a producer for.
    pub dynamic_parts: Vec<String>,
    /// Values this node is known to produce.
    pub extracted_parts: Vec<String>,
    /// Input-variable bindings (name → value) on this node.
    pub input_variables: HashMap<String, String>,
}

impl DagNode {
    /// A node is resolved once every dynamic part has a producer.
    pub fn is_resolved(&self) -> bool {
        self.dynamic_parts.is_empty()
    }
}

/// Initial attributes for a new node.
#[derive(Debug, Clone, Default)]
pub struct NodeAttrs {
    pub dynamic_parts: Vec<String>,
    pub extracted_parts: Vec<String>,
    pub input_variables: HashMap<String, String>,
}

impl NodeAttrs {
    pub fn with_dynamic_parts(mut self, parts: Vec<String>) -> Self {
        self.dynamic_parts = parts;
        self
    }

    pub fn with_extracted_parts(mut self, parts: Vec<String>) -> Self {
        self.extracted_parts = parts;
        self
    }

    pub fn with_input_variables(mut self, vars: HashMap<String, String>) -> Self {
        self.input_variables = vars;
        self
    }
}

/// Partial update applied through [`super::DependencyGraph::update_node`].
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub dynamic_parts: Option<Vec<String>>,
    pub extracted_parts: Option<Vec<String>>,
    pub input_variables: Option<HashMap<String, String>>,
}

/// Directed edge from a consumer node to the provider of one dynamic part.
///
/// Edges form a set under (from, to, label): re-adding an identical edge is
/// a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagEdge {
    pub from: NodeId,
    pub to: NodeId,
    /// The exact dynamic-part string being transported.
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId(7).to_string(), "n7");
    }

    #[test]
    fn test_node_resolution_predicate() {
        let node = DagNode {
            id: NodeId(0),
            kind: NodeKind::Curl,
            content: NodeContent::Request(RequestId(1)),
            dynamic_parts: vec!["tok".to_string()],
            extracted_parts: Vec::new(),
            input_variables: HashMap::new(),
        };
        assert!(!node.is_resolved());

        let resolved = DagNode {
            dynamic_parts: Vec::new(),
            ..node
        };
        assert!(resolved.is_resolved());
    }

    #[test]
    fn test_content_request_accessor() {
        assert_eq!(
            NodeContent::Request(RequestId(3)).request(),
            Some(RequestId(3))
        );
        assert_eq!(NodeContent::Cookie("sid".to_string()).request(), None);
    }
}
