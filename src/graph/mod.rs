//! Typed dependency DAG with cycle refusal, topological ordering, and the
//! completion predicate.

mod dag;
mod types;

pub use dag::DependencyGraph;
pub use types::{DagEdge, DagNode, NodeAttrs, NodeContent, NodeId, NodeKind, NodeUpdate};
