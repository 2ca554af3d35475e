//! Session identifiers, lifecycle states, events, and the bounded log ring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::graph::NodeId;

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Loading the recording.
    Initializing,
    /// Loaded; waiting for the primary action to be chosen.
    AwaitingWorkflowSelection,
    /// Draining the processing queue node by node.
    ProcessingDependencies,
    /// Analysis finished; an external emitter may take over.
    ReadyForEmission,
    /// Code was emitted (outside the kernel).
    Emitted,
    /// Unrecoverable failure; see the session error.
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::AwaitingWorkflowSelection => "awaiting_workflow_selection",
            Self::ProcessingDependencies => "processing_dependencies",
            Self::ReadyForEmission => "ready_for_emission",
            Self::Emitted => "emitted",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Events driving the state machine. I/O always happens before the event is
/// sent, so applying one never suspends.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    HarLoaded,
    LoadFailed { message: String },
    WorkflowSelected,
    NodeProcessed { queue_empty: bool, ready: bool },
    Emitted,
    Failure { message: String },
}

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One diagnostic entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// FIFO log ring. Entries beyond the capacity are discarded oldest-first;
/// they carry no semantic meaning for any component.
#[derive(Debug, Clone)]
pub struct LogRing {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            at: Utc::now(),
            level,
            message: message.into(),
        });
    }

    /// Entries oldest-first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What one `process_next_node` call did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ProcessStatus {
    /// One node was drained from the queue.
    Processed { node: NodeId },
    /// The queue emptied and the session reached readiness.
    Ready,
    /// The session was already past processing; nothing changed.
    AlreadyComplete,
}

/// Report returned by `process_next_node`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
    #[serde(flatten)]
    pub status: ProcessStatus,
    pub remaining_nodes: usize,
}

/// Listing entry for `list_sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub prompt: String,
    pub state: SessionState,
    pub node_count: usize,
    pub created_at: DateTime<Utc>,
}
