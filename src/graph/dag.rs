//! The dependency graph: acyclic by construction, stable iteration order.
//!
//! Cycle safety comes from `add_edge` running a reachability check before
//! insertion, so `detect_cycles` is a postcondition check and always returns
//! `None` in a correctly-driven session.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

use crate::error::{Error, Result};

use super::types::{DagEdge, DagNode, NodeAttrs, NodeContent, NodeId, NodeKind, NodeUpdate};

/// Typed node/edge store for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    nodes: Vec<DagNode>,
    edges: Vec<DagEdge>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Node Operations ====================

    /// Add a node; O(1). Returns the new node's id.
    pub fn add_node(&mut self, kind: NodeKind, content: NodeContent, attrs: NodeAttrs) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(DagNode {
            id,
            kind,
            content,
            dynamic_parts: attrs.dynamic_parts,
            extracted_parts: attrs.extracted_parts,
            input_variables: attrs.input_variables,
        });
        id
    }

    /// Apply a partial update to a node.
    pub fn update_node(&mut self, id: NodeId, update: NodeUpdate) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id.0 as usize)
            .ok_or_else(|| Error::node_not_found(id))?;
        if let Some(parts) = update.dynamic_parts {
            node.dynamic_parts = parts;
        }
        if let Some(parts) = update.extracted_parts {
            node.extracted_parts = parts;
        }
        if let Some(vars) = update.input_variables {
            node.input_variables = vars;
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&DagNode> {
        self.nodes.get(id.0 as usize)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut DagNode> {
        self.nodes.get_mut(id.0 as usize)
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> &[DagNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[DagEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// The master node, once workflow selection has created it.
    pub fn master(&self) -> Option<&DagNode> {
        self.nodes.iter().find(|n| n.kind == NodeKind::Master)
    }

    /// First node with the given content, if any. Used to reuse producers
    /// instead of duplicating them.
    pub fn find_by_content(&self, content: &NodeContent) -> Option<&DagNode> {
        self.nodes.iter().find(|n| &n.content == content)
    }

    // ==================== Edge Operations ====================

    /// Add a consumer → provider edge labeled with the transported value.
    ///
    /// Fails with `NodeNotFound` when either endpoint is absent and with
    /// `WouldCreateCycle` when `from` is already reachable from `to`. A
    /// duplicate (from, to, label) triple is silently ignored.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, label: impl Into<String>) -> Result<()> {
        let label = label.into();
        if self.node(from).is_none() {
            return Err(Error::node_not_found(from));
        }
        if self.node(to).is_none() {
            return Err(Error::node_not_found(to));
        }
        if self
            .edges
            .iter()
            .any(|e| e.from == from && e.to == to && e.label == label)
        {
            return Ok(());
        }
        if from == to || self.is_reachable(to, from) {
            return Err(Error::would_create_cycle(from, to));
        }
        self.edges.push(DagEdge { from, to, label });
        Ok(())
    }

    /// Whether `target` is reachable from `start` following edge direction.
    fn is_reachable(&self, start: NodeId, target: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            for edge in self.edges.iter().filter(|e| e.from == current) {
                stack.push(edge.to);
            }
        }
        false
    }

    /// Nodes with an edge into `id` (its consumers), in edge-insertion order.
    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|e| e.to == id)
            .map(|e| e.from)
            .collect()
    }

    /// Nodes `id` points at (its providers), in edge-insertion order.
    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|e| e.from == id)
            .map(|e| e.to)
            .collect()
    }

    // ==================== Ordering & Completion ====================

    /// Execution order via Kahn's algorithm: providers first, master last.
    ///
    /// Ties break on node insertion order, so the result is deterministic.
    /// The empty graph yields an empty vector.
    pub fn topological_sort(&self) -> Vec<NodeId> {
        // A node is ready once every provider it points at has been emitted.
        let mut pending: Vec<usize> = self.nodes.iter().map(|n| self.successors(n.id).len()).collect();
        let mut ready: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| pending[n.id.0 as usize] == 0)
            .map(|n| n.id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while !ready.is_empty() {
            // Stable tie-break: lowest node id first.
            ready.sort();
            let next = ready.remove(0);
            order.push(next);
            for consumer in self.predecessors(next) {
                let slot = &mut pending[consumer.0 as usize];
                *slot -= 1;
                if *slot == 0 {
                    ready.push(consumer);
                }
            }
        }

        order
    }

    /// Return a cycle witness, or `None`.
    ///
    /// Since `add_edge` refuses cycles this is a postcondition check; it
    /// exists so invariant violations surface as data instead of hangs.
    pub fn detect_cycles(&self) -> Option<Vec<NodeId>> {
        let order = self.topological_sort();
        if order.len() == self.nodes.len() {
            return None;
        }
        // Everything not emitted by Kahn sits on or behind a cycle; walk the
        // residue to produce a concrete witness.
        let emitted: HashSet<NodeId> = order.into_iter().collect();
        let start = self.nodes.iter().map(|n| n.id).find(|id| !emitted.contains(id))?;
        let mut path = Vec::new();
        let mut current = start;
        loop {
            if let Some(pos) = path.iter().position(|&id| id == current) {
                return Some(path[pos..].to_vec());
            }
            path.push(current);
            current = self
                .successors(current)
                .into_iter()
                .find(|id| !emitted.contains(id))?;
        }
    }

    /// True iff every node is resolved and no unresolved NotFound placeholder
    /// remains.
    pub fn is_complete(&self) -> bool {
        self.nodes.iter().all(|n| n.is_resolved())
    }

    /// Every node that still has dynamic parts, with the outstanding list.
    pub fn unresolved_nodes(&self) -> Vec<(NodeId, Vec<String>)> {
        self.nodes
            .iter()
            .filter(|n| !n.is_resolved())
            .map(|n| (n.id, n.dynamic_parts.clone()))
            .collect()
    }

    /// Unresolved NotFound placeholders (dynamic values with no source).
    pub fn not_found_values(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.kind == NodeKind::NotFound && !n.is_resolved())
            .filter_map(|n| match &n.content {
                NodeContent::Value(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    /// Remove one value from a node's dynamic-parts list.
    pub fn mark_part_resolved(&mut self, id: NodeId, part: &str) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id.0 as usize)
            .ok_or_else(|| Error::node_not_found(id))?;
        node.dynamic_parts.retain(|p| p != part);
        Ok(())
    }

    /// Record a value a node is known to produce.
    pub fn add_extracted_part(&mut self, id: NodeId, part: impl Into<String>) -> Result<()> {
        let part = part.into();
        let node = self
            .nodes
            .get_mut(id.0 as usize)
            .ok_or_else(|| Error::node_not_found(id))?;
        if !node.extracted_parts.contains(&part) {
            node.extracted_parts.push(part);
        }
        Ok(())
    }

    /// Content-keyed view used by the round-trip isomorphism checks: node
    /// payloads plus (from-content, to-content, label) triples.
    pub fn content_key(&self) -> (Vec<NodeContent>, Vec<(NodeContent, NodeContent, String)>) {
        let mut contents: Vec<NodeContent> = self.nodes.iter().map(|n| n.content.clone()).collect();
        contents.sort_by_key(|c| format!("{c:?}"));
        let mut edges: Vec<(NodeContent, NodeContent, String)> = self
            .edges
            .iter()
            .filter_map(|e| {
                let from = self.node(e.from)?.content.clone();
                let to = self.node(e.to)?.content.clone();
                Some((from, to, e.label.clone()))
            })
            .collect();
        edges.sort_by_key(|(f, t, l)| format!("{f:?}|{t:?}|{l}"));
        (contents, edges)
    }
}

// Keep the queue-style helper out of the inherent impl's main block so the
// breadth-first variant stays next to its only caller.
impl DependencyGraph {
    /// Breadth-first node ids reachable from `start` following edges.
    pub fn reachable_from(&self, start: NodeId) -> Vec<NodeId> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);
        let mut out = Vec::new();
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            out.push(id);
            for next in self.successors(id) {
                queue.push_back(next);
            }
        }
        out
    }
}
