//! Oracle doubles for tests and oracle-disabled operation.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::{Error, Result};

use super::client::Oracle;
use super::schemas::validate_against_schema;
use super::types::{CancelSignal, ChatMessage, FunctionSchema};

/// An oracle answering from a scripted queue of canned responses.
///
/// Responses are queued per function name and consumed in order. The full
/// call transcript is recorded so tests can assert which functions ran and
/// replay a transcript for determinism checks.
#[derive(Default)]
pub struct ScriptedOracle {
    responses: Mutex<HashMap<String, VecDeque<Value>>>,
    transcript: Mutex<Vec<(String, Value)>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the named function.
    pub fn push_response(&self, function: impl Into<String>, response: Value) {
        self.responses
            .lock()
            .expect("responses lock poisoned")
            .entry(function.into())
            .or_default()
            .push_back(response);
    }

    /// Builder-style variant of [`Self::push_response`].
    pub fn with_response(self, function: impl Into<String>, response: Value) -> Self {
        self.push_response(function, response);
        self
    }

    /// Every (function, returned value) pair, in call order.
    pub fn transcript(&self) -> Vec<(String, Value)> {
        self.transcript
            .lock()
            .expect("transcript lock poisoned")
            .clone()
    }

    /// Number of calls made against this oracle.
    pub fn call_count(&self) -> usize {
        self.transcript.lock().expect("transcript lock poisoned").len()
    }

    /// Number of calls made to one function.
    pub fn calls_to(&self, function: &str) -> usize {
        self.transcript
            .lock()
            .expect("transcript lock poisoned")
            .iter()
            .filter(|(name, _)| name == function)
            .count()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn call_function(
        &self,
        _messages: &[ChatMessage],
        schema: &FunctionSchema,
        cancel: &CancelSignal,
    ) -> Result<Value> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let next = self
            .responses
            .lock()
            .expect("responses lock poisoned")
            .get_mut(&schema.name)
            .and_then(|queue| queue.pop_front());
        let Some(value) = next else {
            return Err(Error::OracleUnavailable(format!(
                "no scripted response for {}",
                schema.name
            )));
        };
        validate_against_schema(&value, schema)
            .map_err(|message| Error::schema_violation(&schema.name, message))?;
        self.transcript
            .lock()
            .expect("transcript lock poisoned")
            .push((schema.name.clone(), value.clone()));
        Ok(value)
    }
}

/// An oracle where every call fails, for exercising degradation paths.
#[derive(Default)]
pub struct FailingOracle;

impl FailingOracle {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Oracle for FailingOracle {
    async fn call_function(
        &self,
        _messages: &[ChatMessage],
        schema: &FunctionSchema,
        _cancel: &CancelSignal,
    ) -> Result<Value> {
        Err(Error::OracleUnavailable(format!(
            "oracle disabled (function {})",
            schema.name
        )))
    }
}
