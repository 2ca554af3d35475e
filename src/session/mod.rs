//! Session lifecycle: the state machine, the per-session pipeline, and the
//! bounded store that owns every session.

mod machine;
mod session;
mod store;
mod types;

pub use machine::StateMachine;
pub use session::{Session, SessionEngine};
pub use store::{SessionStore, StoreConfig};
pub use types::{
    LogEntry, LogLevel, LogRing, ProcessReport, ProcessStatus, SessionEvent, SessionId,
    SessionState, SessionSummary,
};
