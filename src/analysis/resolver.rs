//! Dependency resolution: find the producer of each dynamic value.
//!
//! Cookies win over responses; among responses the earliest recorded one
//! wins. Values with no producer become NotFound placeholders, which keep
//! the graph incomplete until a manual override supplies a source.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, NodeAttrs, NodeContent, NodeId, NodeKind};
use crate::har::{CookieJar, HarArchive, RequestId};

/// Where a dynamic value was found to come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    /// Exact match against a cookie value.
    Cookie(String),
    /// Earliest recorded response containing the value verbatim.
    Response(RequestId),
    /// No source in the recording.
    Unresolved,
}

/// A non-target response that first supplies a session constant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSource {
    pub source_url: String,
    /// Where in the response the value sits: `json_field`, `set_cookie`,
    /// `header`, or `body_text`.
    pub source_type: String,
}

/// Locates producers for dynamic values and grows the graph accordingly.
#[derive(Debug, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Find the producer for one value. Cookie pass first, then the
    /// timestamp-ordered response pass.
    pub fn locate(
        &self,
        archive: &HarArchive,
        jar: &CookieJar,
        value: &str,
        exclude: Option<RequestId>,
    ) -> ResolvedSource {
        if let Some(cookie) = jar.cookies().iter().find(|c| c.value == value) {
            return ResolvedSource::Cookie(cookie.name.clone());
        }
        match self.response_candidates(archive, value, exclude).first() {
            Some(id) => ResolvedSource::Response(*id),
            None => ResolvedSource::Unresolved,
        }
    }

    /// Requests whose recorded response contains the value, earliest first.
    /// JavaScript URLs are never producers.
    fn response_candidates(
        &self,
        archive: &HarArchive,
        value: &str,
        exclude: Option<RequestId>,
    ) -> Vec<RequestId> {
        let mut candidates: Vec<&crate::har::RequestRecord> = archive
            .requests()
            .iter()
            .filter(|r| Some(r.id) != exclude)
            .filter(|r| !r.is_javascript())
            .filter(|r| {
                r.response
                    .as_ref()
                    .map(|resp| resp.contains_value(value))
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        candidates.into_iter().map(|r| r.id).collect()
    }

    /// Resolve every outstanding dynamic part on `consumer`.
    ///
    /// Creates Cookie/Curl/NotFound nodes as needed (reusing nodes with the
    /// same content), adds one labeled edge per part, and returns the ids of
    /// newly created Curl producers so the caller can enqueue them.
    ///
    /// Cycle rejection is not retried against later candidates: when the
    /// earliest producer would close a cycle, the part becomes NotFound.
    pub fn resolve_node(
        &self,
        graph: &mut DependencyGraph,
        archive: &HarArchive,
        jar: &CookieJar,
        consumer: NodeId,
    ) -> Result<Vec<NodeId>> {
        let parts: Vec<String> = graph
            .node(consumer)
            .map(|n| n.dynamic_parts.clone())
            .unwrap_or_default();
        let consumer_request = graph.node(consumer).and_then(|n| n.content.request());

        let mut new_producers = Vec::new();
        for part in parts {
            match self.locate(archive, jar, &part, consumer_request) {
                ResolvedSource::Cookie(name) => {
                    let content = NodeContent::Cookie(name.clone());
                    let node = match graph.find_by_content(&content) {
                        Some(existing) => existing.id,
                        None => graph.add_node(NodeKind::Cookie, content, NodeAttrs::default()),
                    };
                    graph.add_extracted_part(node, part.clone())?;
                    graph.add_edge(consumer, node, part.clone())?;
                    graph.mark_part_resolved(consumer, &part)?;
                    debug!(%consumer, cookie = %name, value = %part, "resolved from cookie");
                }
                ResolvedSource::Response(candidate) => {
                    let content = NodeContent::Request(candidate);
                    let (node, created) = match graph.find_by_content(&content) {
                        Some(existing) => (existing.id, false),
                        None => (
                            graph.add_node(NodeKind::Curl, content, NodeAttrs::default()),
                            true,
                        ),
                    };
                    match graph.add_edge(consumer, node, part.clone()) {
                        Ok(()) => {
                            graph.add_extracted_part(node, part.clone())?;
                            graph.mark_part_resolved(consumer, &part)?;
                            if created {
                                new_producers.push(node);
                            }
                            debug!(%consumer, producer = %node, value = %part, "resolved from response");
                        }
                        Err(Error::WouldCreateCycle { .. }) => {
                            // The earliest producer already depends on the
                            // consumer. A later response is not the
                            // resolution for this value, so it goes
                            // unresolved.
                            debug!(
                                %consumer,
                                producer = %node,
                                value = %part,
                                "earliest producer would close a cycle"
                            );
                            self.mark_not_found(graph, consumer, &part)?;
                        }
                        Err(err) => return Err(err),
                    }
                }
                ResolvedSource::Unresolved => {
                    self.mark_not_found(graph, consumer, &part)?;
                }
            }
        }
        Ok(new_producers)
    }

    fn mark_not_found(
        &self,
        graph: &mut DependencyGraph,
        consumer: NodeId,
        part: &str,
    ) -> Result<()> {
        let content = NodeContent::Value(part.to_string());
        let node = match graph.find_by_content(&content) {
            Some(existing) => existing.id,
            None => graph.add_node(
                NodeKind::NotFound,
                content,
                // The placeholder carries the unresolved value so the
                // completion predicate keeps failing until it is supplied.
                NodeAttrs::default().with_dynamic_parts(vec![part.to_string()]),
            ),
        };
        graph.add_edge(consumer, node, part.to_string())?;
        graph.mark_part_resolved(consumer, part)?;
        debug!(%consumer, value = %part, "no producer found");
        Ok(())
    }

    /// Bootstrap lookup for session constants: the first non-target response
    /// in which the value appears, with the location it appears in.
    pub fn find_bootstrap_source(
        &self,
        archive: &HarArchive,
        value: &str,
        target_url: Option<&str>,
    ) -> Option<BootstrapSource> {
        let mut requests: Vec<&crate::har::RequestRecord> = archive
            .requests()
            .iter()
            .filter(|r| Some(r.url.as_str()) != target_url)
            .filter(|r| !r.is_javascript())
            .filter(|r| r.response.is_some())
            .collect();
        requests.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));

        for request in requests {
            let response = request.response.as_ref()?;
            let source_type = if response
                .set_cookies()
                .iter()
                .any(|payload| payload.contains(value))
            {
                Some("set_cookie")
            } else if response
                .headers
                .iter()
                .any(|h| !h.name.eq_ignore_ascii_case("set-cookie") && h.value.contains(value))
            {
                Some("header")
            } else if let Some(body) = &response.body {
                if body.contains(value) {
                    if response.is_json() {
                        Some("json_field")
                    } else {
                        Some("body_text")
                    }
                } else {
                    None
                }
            } else {
                None
            };

            if let Some(source_type) = source_type {
                return Some(BootstrapSource {
                    source_url: request.url.clone(),
                    source_type: source_type.to_string(),
                });
            }
        }
        None
    }
}
