//! One analysis session: the pipeline that drives a recording from load to
//! readiness-for-emission.
//!
//! The session owns all mutable per-recording state. Each
//! `process_next_node` call drains one queue entry through extraction,
//! input matching, resolution, and per-node classification; when the queue
//! empties the authentication inventory and completion analysis run.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;

use crate::analysis::{
    discover_workflows, AuthAnalysis, AuthAnalyzer, ClassifiedParameter, CompletionAnalysis,
    CompletionAnalyzer, DependencyResolver, DynamicPartsExtractor, InputVariableMatcher,
    ParamClassification, ParamSource, ParameterClassifier, UrlIdentifier, WorkflowGroup,
};
use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, NodeAttrs, NodeContent, NodeId, NodeKind, NodeUpdate};
use crate::har::{render_curl, CookieJar, HarArchive, HarQuality};
use crate::oracle::{CancelSignal, Oracle};

use super::machine::StateMachine;
use super::types::{
    LogEntry, LogLevel, LogRing, ProcessReport, ProcessStatus, SessionEvent, SessionId,
    SessionState, SessionSummary,
};

/// The stateless analysis components shared by every session.
pub struct SessionEngine {
    pub identifier: UrlIdentifier,
    pub extractor: DynamicPartsExtractor,
    pub matcher: InputVariableMatcher,
    pub resolver: DependencyResolver,
    pub classifier: ParameterClassifier,
    pub auth: AuthAnalyzer,
    pub completion: CompletionAnalyzer,
}

impl Default for SessionEngine {
    fn default() -> Self {
        Self {
            identifier: UrlIdentifier::new(),
            extractor: DynamicPartsExtractor::default(),
            matcher: InputVariableMatcher::new(),
            resolver: DependencyResolver::new(),
            classifier: ParameterClassifier::default(),
            auth: AuthAnalyzer::new(),
            completion: CompletionAnalyzer::new(),
        }
    }
}

/// One analysis session.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub prompt: String,
    archive: HarArchive,
    jar: CookieJar,
    graph: DependencyGraph,
    queue: VecDeque<NodeId>,
    ever_queued: HashSet<NodeId>,
    input_variables: HashMap<String, String>,
    action_url: Option<String>,
    auth: Option<AuthAnalysis>,
    classified: HashMap<NodeId, Vec<ClassifiedParameter>>,
    bootstrap_done: bool,
    machine: StateMachine,
    error: Option<String>,
    logs: LogRing,
    created_at: DateTime<Utc>,
}

impl Session {
    /// Create a session over a loaded recording.
    ///
    /// An empty recording is refused before any state transition; a poor
    /// one proceeds with a logged warning.
    pub fn create(
        id: SessionId,
        prompt: impl Into<String>,
        archive: HarArchive,
        jar: CookieJar,
        input_variables: HashMap<String, String>,
    ) -> Result<Self> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(Error::invalid_input("prompt must not be empty"));
        }

        let validation = archive.validation();
        if validation.quality == HarQuality::Empty {
            return Err(Error::HarQualityEmpty(validation.issues.join("; ")));
        }

        let mut session = Self {
            id,
            prompt,
            archive,
            jar,
            graph: DependencyGraph::new(),
            queue: VecDeque::new(),
            ever_queued: HashSet::new(),
            input_variables,
            action_url: None,
            auth: None,
            classified: HashMap::new(),
            bootstrap_done: false,
            machine: StateMachine::new(),
            error: None,
            logs: LogRing::default(),
            created_at: Utc::now(),
        };

        if validation.quality == HarQuality::Poor {
            session.log(
                LogLevel::Warn,
                format!("recording quality is poor: {}", validation.issues.join("; ")),
            );
        }
        session.machine.apply(&SessionEvent::HarLoaded);
        session.log(
            LogLevel::Info,
            format!("loaded recording with {} entries", session.archive.len()),
        );
        Ok(session)
    }

    // ==================== Accessors ====================

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn archive(&self) -> &HarArchive {
        &self.archive
    }

    pub fn action_url(&self) -> Option<&str> {
        self.action_url.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn classified_parameters(&self) -> &HashMap<NodeId, Vec<ClassifiedParameter>> {
        &self.classified
    }

    pub fn auth_analysis(&self) -> Option<&AuthAnalysis> {
        self.auth.as_ref()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.entries()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            prompt: self.prompt.clone(),
            state: self.state(),
            node_count: self.graph.node_count(),
            created_at: self.created_at,
        }
    }

    fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(level, message);
    }

    fn fail(&mut self, err: &Error) {
        self.error = Some(format!("{}: {err}", err.code()));
        self.machine.apply(&SessionEvent::Failure {
            message: err.to_string(),
        });
    }

    fn enqueue(&mut self, node: NodeId) {
        if self.ever_queued.insert(node) {
            self.queue.push_back(node);
        }
    }

    // ==================== Workflow selection ====================

    /// Candidate workflow groups for the host to inspect.
    pub fn discover_workflows(&self, engine: &SessionEngine) -> Vec<WorkflowGroup> {
        discover_workflows(&engine.identifier, &self.prompt, self.archive.urls())
    }

    /// Run the URL identifier and install the master node.
    pub async fn select_workflow(
        &mut self,
        engine: &SessionEngine,
        oracle: &dyn Oracle,
        cancel: &CancelSignal,
    ) -> Result<String> {
        if self.state() != SessionState::AwaitingWorkflowSelection {
            return Err(Error::invalid_input(format!(
                "cannot select a workflow in state {}",
                self.state()
            )));
        }

        let url = match engine
            .identifier
            .identify(oracle, &self.prompt, self.archive.urls(), cancel)
            .await
        {
            Ok(url) => url,
            Err(err) => {
                self.fail(&err);
                return Err(err);
            }
        };

        self.install_master(&url)?;
        self.machine.apply(&SessionEvent::WorkflowSelected);
        self.log(LogLevel::Info, format!("selected primary action {url}"));
        Ok(url)
    }

    fn install_master(&mut self, url: &str) -> Result<NodeId> {
        let request = self
            .archive
            .find_by_url(url, None)
            .ok_or_else(|| Error::UrlNotFoundInHar(url.to_string()))?;
        let request_id = request.id;
        let master = self.graph.add_node(
            NodeKind::Master,
            NodeContent::Request(request_id),
            NodeAttrs::default(),
        );
        self.action_url = Some(url.to_string());
        self.enqueue(master);
        Ok(master)
    }

    // ==================== Queue processing ====================

    /// Drain one node from the queue, or finish the session when empty.
    ///
    /// Idempotent once the session has reached readiness: returns
    /// `AlreadyComplete` without touching state.
    pub async fn process_next_node(
        &mut self,
        engine: &SessionEngine,
        oracle: &dyn Oracle,
        cancel: &CancelSignal,
    ) -> Result<ProcessReport> {
        match self.state() {
            SessionState::ReadyForEmission | SessionState::Emitted => {
                return Ok(ProcessReport {
                    status: ProcessStatus::AlreadyComplete,
                    remaining_nodes: 0,
                });
            }
            SessionState::AwaitingWorkflowSelection => {
                self.select_workflow(engine, oracle, cancel).await?;
            }
            SessionState::ProcessingDependencies => {}
            state => {
                return Err(Error::invalid_input(format!(
                    "cannot process nodes in state {state}"
                )));
            }
        }

        let Some(node) = self.queue.pop_front() else {
            return self.finish(engine);
        };

        if let Err(err) = self.process_node(engine, oracle, node, cancel).await {
            self.fail(&err);
            return Err(err);
        }

        self.machine.apply(&SessionEvent::NodeProcessed {
            queue_empty: self.queue.is_empty(),
            ready: false,
        });
        Ok(ProcessReport {
            status: ProcessStatus::Processed { node },
            remaining_nodes: self.queue.len(),
        })
    }

    async fn process_node(
        &mut self,
        engine: &SessionEngine,
        oracle: &dyn Oracle,
        node: NodeId,
        cancel: &CancelSignal,
    ) -> Result<()> {
        let Some(request_id) = self.graph.node(node).and_then(|n| n.content.request()) else {
            // Cookie/NotFound/UserInput nodes carry no request to analyze.
            return Ok(());
        };
        let request = self
            .archive
            .request(request_id)
            .ok_or_else(|| Error::node_not_found(node))?
            .clone();

        // C4: which values does the server validate?
        let parts = engine
            .extractor
            .extract(oracle, &self.archive, &request, &self.input_variables, cancel)
            .await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // C5: strip values the caller supplies.
        let curl = render_curl(&request);
        let matched = engine
            .matcher
            .match_inputs(oracle, &curl, &self.input_variables, &parts, cancel)
            .await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.graph.update_node(
            node,
            NodeUpdate {
                dynamic_parts: Some(matched.remaining),
                extracted_parts: None,
                input_variables: Some(matched.identified),
            },
        )?;

        // C6: locate producers and grow the graph.
        let new_producers =
            engine
                .resolver
                .resolve_node(&mut self.graph, &self.archive, &self.jar, node)?;
        for producer in new_producers {
            self.enqueue(producer);
        }

        // C7 (per node): classify this request's parameters.
        let params = ParameterClassifier::collect_parameters(&request);
        let classified = engine
            .classifier
            .classify_all(
                oracle,
                &self.archive,
                &self.prompt,
                self.action_url.as_deref(),
                params,
                cancel,
            )
            .await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.classified.insert(node, classified);

        self.log(
            LogLevel::Info,
            format!("processed {node} ({} {})", request.method, request.url),
        );
        Ok(())
    }

    /// Queue is empty: finish auth/bootstrap analysis and check readiness.
    fn finish(&mut self, engine: &SessionEngine) -> Result<ProcessReport> {
        if self.auth.is_none() {
            self.auth = Some(engine.auth.analyze(&self.archive));
            self.log(LogLevel::Info, "authentication inventory complete");
        }
        self.bootstrap_done = true;

        let analysis = self.completion_analysis(engine);
        if analysis.is_complete {
            self.machine.apply(&SessionEvent::NodeProcessed {
                queue_empty: true,
                ready: true,
            });
            self.log(LogLevel::Info, "session ready for emission");
            return Ok(ProcessReport {
                status: ProcessStatus::Ready,
                remaining_nodes: 0,
            });
        }

        let blockers: Vec<String> = analysis.blockers.iter().map(|b| b.to_string()).collect();
        warn!(session = %self.id, blockers = ?blockers, "completion blocked");
        Err(Error::CompletionBlocked {
            blockers,
            recommendations: analysis.recommendations,
        })
    }

    /// The completion analyzer's view of this session.
    pub fn completion_analysis(&self, engine: &SessionEngine) -> CompletionAnalysis {
        engine.completion.analyze(
            &self.graph,
            self.queue.len(),
            self.action_url.as_deref(),
            self.auth.as_ref(),
            &self.classified,
            self.bootstrap_done,
        )
    }

    /// Record that the external emitter produced code for this session.
    pub fn mark_emitted(&mut self) -> Result<()> {
        if self.state() != SessionState::ReadyForEmission {
            return Err(Error::invalid_input(format!(
                "cannot emit in state {}",
                self.state()
            )));
        }
        self.machine.apply(&SessionEvent::Emitted);
        self.log(LogLevel::Info, "client code emitted");
        Ok(())
    }

    // ==================== Manual overrides ====================

    /// Pin the primary action URL; creates the master node when the session
    /// is still awaiting workflow selection.
    pub fn set_action_url(&mut self, url: &str) -> Result<()> {
        if self.archive.find_by_url(url, None).is_none() {
            return Err(Error::UrlNotFoundInHar(url.to_string()));
        }
        if self.state() == SessionState::AwaitingWorkflowSelection {
            self.install_master(url)?;
            self.machine.apply(&SessionEvent::WorkflowSelected);
        } else {
            self.action_url = Some(url.to_string());
        }
        self.log(LogLevel::Info, format!("action URL set to {url}"));
        Ok(())
    }

    /// Promote an existing node to master, demoting the previous one.
    pub fn set_master_node(&mut self, node: NodeId) -> Result<()> {
        if self.graph.node(node).is_none() {
            return Err(Error::node_not_found(node));
        }
        if let Some(old) = self.graph.master().map(|n| n.id) {
            if old != node {
                if let Some(old_node) = self.graph.node_mut(old) {
                    old_node.kind = NodeKind::Curl;
                }
            }
        }
        let request_url = self
            .graph
            .node(node)
            .and_then(|n| n.content.request())
            .and_then(|id| self.archive.request(id))
            .map(|r| r.url.clone());
        if let Some(n) = self.graph.node_mut(node) {
            n.kind = NodeKind::Master;
        }
        if let Some(url) = request_url {
            self.action_url = Some(url);
        }
        self.enqueue(node);
        self.log(LogLevel::Info, format!("master node overridden to {node}"));
        Ok(())
    }

    /// Manually link a dynamic value to its producer.
    pub fn force_dependency(
        &mut self,
        consumer: NodeId,
        producer: NodeId,
        provided_part: &str,
    ) -> Result<()> {
        self.graph.add_edge(consumer, producer, provided_part)?;
        self.graph.add_extracted_part(producer, provided_part)?;
        self.graph.mark_part_resolved(consumer, provided_part)?;
        self.retire_placeholder(provided_part)?;
        self.log(
            LogLevel::Info,
            format!("forced dependency {consumer} -> {producer} for `{provided_part}`"),
        );
        Ok(())
    }

    /// Clear the NotFound placeholder carrying `value`, if one exists.
    fn retire_placeholder(&mut self, value: &str) -> Result<()> {
        let placeholder = self
            .graph
            .nodes()
            .iter()
            .find(|n| {
                n.kind == NodeKind::NotFound
                    && n.content == NodeContent::Value(value.to_string())
            })
            .map(|n| n.id);
        if let Some(id) = placeholder {
            self.graph.mark_part_resolved(id, value)?;
        }
        Ok(())
    }

    /// Replace a parameter's classification by hand.
    pub fn override_parameter_classification(
        &mut self,
        node: NodeId,
        value: &str,
        classification: ParamClassification,
        reasoning: Option<&str>,
    ) -> Result<()> {
        let params = self
            .classified
            .get_mut(&node)
            .ok_or_else(|| Error::node_not_found(node))?;
        let param = params
            .iter_mut()
            .find(|p| p.value == value)
            .ok_or_else(|| {
                Error::invalid_input(format!("no parameter with value `{value}` on {node}"))
            })?;
        param.classification = classification;
        param.confidence = 1.0;
        param.source = ParamSource::ManualOverride;
        // A manually settled parameter needs no bootstrap source.
        if let Some(bootstrap) = param.metadata.bootstrap.as_mut() {
            bootstrap.resolved = true;
        }
        self.log(
            LogLevel::Info,
            format!(
                "classification of `{value}` on {node} overridden to {classification}{}",
                reasoning.map(|r| format!(" ({r})")).unwrap_or_default()
            ),
        );
        Ok(())
    }

    /// Unblock the resolver with a canned response for a node.
    ///
    /// The response text is scanned for every outstanding dynamic value;
    /// each hit makes this node the producer of that value.
    pub fn inject_response(
        &mut self,
        node: NodeId,
        response_data: &serde_json::Value,
        extracted_parts: Option<Vec<String>>,
    ) -> Result<()> {
        if self.graph.node(node).is_none() {
            return Err(Error::node_not_found(node));
        }
        let text = match response_data {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        for part in extracted_parts.unwrap_or_default() {
            self.graph.add_extracted_part(node, part)?;
        }

        // Outstanding values: unresolved parts on any node plus NotFound
        // placeholders.
        let outstanding: Vec<(NodeId, String)> = self
            .graph
            .nodes()
            .iter()
            .flat_map(|n| {
                n.dynamic_parts
                    .iter()
                    .map(move |p| (n.id, p.clone()))
            })
            .collect();

        for (owner, value) in outstanding {
            if !text.contains(&value) {
                continue;
            }
            self.graph.add_extracted_part(node, value.clone())?;
            if self.graph.node(owner).map(|n| n.kind) == Some(NodeKind::NotFound) {
                // Re-point the placeholder's consumers at the new producer.
                for consumer in self.graph.predecessors(owner) {
                    if consumer != node {
                        self.graph.add_edge(consumer, node, value.clone())?;
                    }
                }
                self.graph.mark_part_resolved(owner, &value)?;
            } else if owner != node {
                self.graph.add_edge(owner, node, value.clone())?;
                self.graph.mark_part_resolved(owner, &value)?;
            }
        }

        self.log(LogLevel::Info, format!("injected response on {node}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::testing::FailingOracle;
    use pretty_assertions::assert_eq;

    fn single_entry_archive() -> HarArchive {
        HarArchive::from_json(
            r#"{"log": {"entries": [
                {"request": {"method": "GET", "url": "https://api.x/v1/ping", "headers": []},
                 "response": {"status": 200, "statusText": "OK", "headers": [],
                              "content": {"mimeType": "application/json", "text": "{\"pong\":true}"}}}
            ]}}"#,
        )
        .unwrap()
    }

    fn session(archive: HarArchive) -> Session {
        Session::create(
            SessionId::new(),
            "ping the service",
            archive,
            CookieJar::default(),
            HashMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_refuses_empty_prompt() {
        let err = Session::create(
            SessionId::new(),
            "  ",
            single_entry_archive(),
            CookieJar::default(),
            HashMap::new(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn test_create_refuses_empty_archive_before_any_transition() {
        let archive = HarArchive::from_json(r#"{"log": {"entries": []}}"#).unwrap();
        let err = Session::create(
            SessionId::new(),
            "anything",
            archive,
            CookieJar::default(),
            HashMap::new(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "har_quality_empty");
    }

    #[test]
    fn test_create_lands_in_awaiting_selection() {
        let session = session(single_entry_archive());
        assert_eq!(session.state(), SessionState::AwaitingWorkflowSelection);
        assert!(session.error().is_none());
    }

    #[tokio::test]
    async fn test_full_drain_single_entry() {
        let engine = SessionEngine::default();
        let oracle = FailingOracle::new();
        let mut session = session(single_entry_archive());

        // First call auto-selects the workflow (single candidate, no oracle
        // needed) and drains the master node.
        let report = session
            .process_next_node(&engine, &oracle, &CancelSignal::none())
            .await
            .unwrap();
        assert!(matches!(report.status, ProcessStatus::Processed { .. }));
        assert_eq!(session.state(), SessionState::ProcessingDependencies);

        // Second call finds the queue empty and reaches readiness.
        let report = session
            .process_next_node(&engine, &oracle, &CancelSignal::none())
            .await
            .unwrap();
        assert_eq!(report.status, ProcessStatus::Ready);
        assert_eq!(session.state(), SessionState::ReadyForEmission);

        // Further calls are idempotent.
        let report = session
            .process_next_node(&engine, &oracle, &CancelSignal::none())
            .await
            .unwrap();
        assert_eq!(report.status, ProcessStatus::AlreadyComplete);
        assert_eq!(session.state(), SessionState::ReadyForEmission);
    }

    #[tokio::test]
    async fn test_set_action_url_requires_recorded_url() {
        let mut session = session(single_entry_archive());
        let err = session.set_action_url("https://api.x/v1/other").unwrap_err();
        assert_eq!(err.code(), "url_not_found_in_har");

        session.set_action_url("https://api.x/v1/ping").unwrap();
        assert_eq!(session.state(), SessionState::ProcessingDependencies);
        assert_eq!(session.action_url(), Some("https://api.x/v1/ping"));
        assert!(session.graph().master().is_some());
    }

    #[tokio::test]
    async fn test_cancellation_fails_the_session() {
        let engine = SessionEngine::default();
        let oracle = FailingOracle::new();
        let mut session = session(single_entry_archive());
        session.set_action_url("https://api.x/v1/ping").unwrap();

        let (handle, signal) = CancelSignal::channel();
        handle.cancel();
        let err = session
            .process_next_node(&engine, &oracle, &signal)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "cancelled");
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.error().unwrap().contains("cancelled"));
    }

    #[test]
    fn test_logs_are_recorded() {
        let session = session(single_entry_archive());
        assert!(session
            .logs()
            .iter()
            .any(|entry| entry.message.contains("loaded recording")));
    }
}
