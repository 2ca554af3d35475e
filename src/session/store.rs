//! The session store: bounded, LRU-evicted ownership of every session, and
//! the command surface a host drives the kernel through.
//!
//! The store is internally synchronized; each session's mutable state is
//! only ever touched under the store lock, so one task at a time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::analysis::{CompletionAnalysis, ParamClassification, WorkflowGroup};
use crate::error::{Error, Result};
use crate::graph::NodeId;
use crate::har::{CookieJar, HarArchive};
use crate::oracle::{CancelSignal, Oracle};

use super::session::{Session, SessionEngine};
use super::types::{LogEntry, ProcessReport, SessionId, SessionSummary};

/// Store limits.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum resident sessions; the least recently used is evicted on
    /// overflow.
    pub capacity: usize,
    /// Budget for loading the recording and cookie file.
    pub init_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            init_timeout: Duration::from_secs(10),
        }
    }
}

struct StoreInner {
    sessions: HashMap<SessionId, Session>,
    /// Least recently used first.
    lru: Vec<SessionId>,
}

impl StoreInner {
    fn touch(&mut self, id: SessionId) {
        self.lru.retain(|s| *s != id);
        self.lru.push(id);
    }
}

/// Owns every session; all host commands go through here.
pub struct SessionStore {
    inner: Mutex<StoreInner>,
    oracle: Arc<dyn Oracle>,
    engine: SessionEngine,
    config: StoreConfig,
}

impl SessionStore {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self::with_config(oracle, StoreConfig::default())
    }

    pub fn with_config(oracle: Arc<dyn Oracle>, config: StoreConfig) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                sessions: HashMap::new(),
                lru: Vec::new(),
            }),
            oracle,
            engine: SessionEngine::default(),
            config,
        }
    }

    // ==================== Session lifecycle ====================

    /// Create a session from files on disk.
    pub async fn create_session(
        &self,
        har_path: impl AsRef<Path>,
        cookie_path: Option<&Path>,
        prompt: &str,
        input_variables: HashMap<String, String>,
    ) -> Result<SessionId> {
        let loaded = tokio::time::timeout(self.config.init_timeout, async {
            let archive = HarArchive::from_path(har_path).await?;
            let jar = match cookie_path {
                Some(path) => CookieJar::from_path(path).await?,
                None => CookieJar::default(),
            };
            Ok::<_, Error>((archive, jar))
        })
        .await
        .map_err(|_| {
            Error::invalid_input(format!(
                "initialization exceeded the {}s budget",
                self.config.init_timeout.as_secs()
            ))
        })??;

        self.insert_session(loaded.0, loaded.1, prompt, input_variables)
            .await
    }

    /// Create a session from already-loaded JSON text.
    pub async fn create_session_from_json(
        &self,
        har_json: &str,
        cookie_json: Option<&str>,
        prompt: &str,
        input_variables: HashMap<String, String>,
    ) -> Result<SessionId> {
        let archive = HarArchive::from_json(har_json)?;
        let jar = match cookie_json {
            Some(text) => CookieJar::from_json(text)?,
            None => CookieJar::default(),
        };
        self.insert_session(archive, jar, prompt, input_variables).await
    }

    async fn insert_session(
        &self,
        archive: HarArchive,
        jar: CookieJar,
        prompt: &str,
        input_variables: HashMap<String, String>,
    ) -> Result<SessionId> {
        let id = SessionId::new();
        let session = Session::create(id, prompt, archive, jar, input_variables)?;

        let mut inner = self.inner.lock().await;
        if inner.sessions.len() >= self.config.capacity {
            if let Some(evicted) = inner.lru.first().copied() {
                inner.sessions.remove(&evicted);
                inner.lru.retain(|s| *s != evicted);
                info!(session = %evicted, "evicted least recently used session");
            }
        }
        inner.sessions.insert(id, session);
        inner.touch(id);
        Ok(id)
    }

    /// Remove a session.
    pub async fn delete_session(&self, id: SessionId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .sessions
            .remove(&id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        inner.lru.retain(|s| *s != id);
        Ok(())
    }

    /// Summaries of every resident session, least recently used first.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let inner = self.inner.lock().await;
        inner
            .lru
            .iter()
            .filter_map(|id| inner.sessions.get(id))
            .map(|s| s.summary())
            .collect()
    }

    /// Number of resident sessions.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.sessions.is_empty()
    }

    // ==================== Pipeline commands ====================

    /// Advance a session by one node.
    pub async fn process_next_node(
        &self,
        id: SessionId,
        cancel: &CancelSignal,
    ) -> Result<ProcessReport> {
        let mut inner = self.inner.lock().await;
        inner.touch(id);
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        session
            .process_next_node(&self.engine, self.oracle.as_ref(), cancel)
            .await
    }

    /// Run workflow selection explicitly.
    pub async fn select_workflow(&self, id: SessionId, cancel: &CancelSignal) -> Result<String> {
        let mut inner = self.inner.lock().await;
        inner.touch(id);
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        session
            .select_workflow(&self.engine, self.oracle.as_ref(), cancel)
            .await
    }

    /// The completion analyzer's verdict for a session.
    pub async fn is_complete(&self, id: SessionId) -> Result<CompletionAnalysis> {
        let mut inner = self.inner.lock().await;
        inner.touch(id);
        let session = inner
            .sessions
            .get(&id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        Ok(session.completion_analysis(&self.engine))
    }

    /// Candidate workflow groups before selection.
    pub async fn discover_workflows(&self, id: SessionId) -> Result<Vec<WorkflowGroup>> {
        let mut inner = self.inner.lock().await;
        inner.touch(id);
        let session = inner
            .sessions
            .get(&id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        Ok(session.discover_workflows(&self.engine))
    }

    // ==================== Manual overrides ====================

    /// Record that the external emitter finished with a session.
    pub async fn mark_emitted(&self, id: SessionId) -> Result<()> {
        self.with_session(id, |session| session.mark_emitted()).await
    }

    pub async fn set_master_node(&self, id: SessionId, node: NodeId) -> Result<()> {
        self.with_session(id, |session| session.set_master_node(node))
            .await
    }

    pub async fn set_action_url(&self, id: SessionId, url: &str) -> Result<()> {
        self.with_session(id, |session| session.set_action_url(url))
            .await
    }

    pub async fn force_dependency(
        &self,
        id: SessionId,
        consumer: NodeId,
        producer: NodeId,
        provided_part: &str,
    ) -> Result<()> {
        self.with_session(id, |session| {
            session.force_dependency(consumer, producer, provided_part)
        })
        .await
    }

    pub async fn override_parameter_classification(
        &self,
        id: SessionId,
        node: NodeId,
        value: &str,
        classification: ParamClassification,
        reasoning: Option<&str>,
    ) -> Result<()> {
        self.with_session(id, |session| {
            session.override_parameter_classification(node, value, classification, reasoning)
        })
        .await
    }

    pub async fn inject_response(
        &self,
        id: SessionId,
        node: NodeId,
        response_data: &serde_json::Value,
        extracted_parts: Option<Vec<String>>,
    ) -> Result<()> {
        self.with_session(id, |session| {
            session.inject_response(node, response_data, extracted_parts)
        })
        .await
    }

    /// Diagnostic log entries, oldest first.
    pub async fn get_session_logs(&self, id: SessionId) -> Result<Vec<LogEntry>> {
        let mut inner = self.inner.lock().await;
        inner.touch(id);
        let session = inner
            .sessions
            .get(&id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        Ok(session.logs())
    }

    /// Run a closure against one session under the store lock.
    pub async fn with_session<T>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut Session) -> Result<T>,
    ) -> Result<T> {
        let mut inner = self.inner.lock().await;
        inner.touch(id);
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        f(session)
    }

    /// Read-only view of one session.
    pub async fn inspect<T>(
        &self,
        id: SessionId,
        f: impl FnOnce(&Session) -> T,
    ) -> Result<T> {
        let inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get(&id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        Ok(f(session))
    }
}
