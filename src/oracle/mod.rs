//! The oracle boundary: function-calling contracts, the Anthropic client,
//! and injectable test doubles.

mod client;
pub mod schemas;
pub mod testing;
mod types;

pub use client::{AnthropicOracle, Oracle, OracleConfig};
pub use types::{
    CancelHandle, CancelSignal, ChatMessage, ChatRole, FunctionSchema, TokenUsage, UsageTracker,
};
