//! Input-variable matching: removes user-supplied values from the dynamic
//! set so they surface as function arguments instead of resolved
//! dependencies.

use serde_json::json;
use std::collections::HashMap;
use tracing::warn;

use crate::oracle::schemas::{self, InputVariablesAnswer};
use crate::oracle::{CancelSignal, ChatMessage, Oracle};

/// Result of matching declared input variables against one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchedInputs {
    /// Variables confirmed to be used by this request (name → value).
    pub identified: HashMap<String, String>,
    /// Dynamic parts left after removing identified values.
    pub remaining: Vec<String>,
}

/// Matches declared input variables against a rendered request.
#[derive(Debug, Default)]
pub struct InputVariableMatcher;

impl InputVariableMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Decide which declared variables this request uses.
    ///
    /// An empty declaration short-circuits with identity. Otherwise the map
    /// is first restricted to values textually present in the request, the
    /// oracle is asked which of those are used here, and the identified
    /// values are removed from the dynamic set. On oracle failure, textual
    /// presence is the answer.
    pub async fn match_inputs(
        &self,
        oracle: &dyn Oracle,
        curl: &str,
        input_variables: &HashMap<String, String>,
        dynamic_parts: &[String],
        cancel: &CancelSignal,
    ) -> MatchedInputs {
        if input_variables.is_empty() {
            return MatchedInputs {
                identified: HashMap::new(),
                remaining: dynamic_parts.to_vec(),
            };
        }

        let present: HashMap<String, String> = input_variables
            .iter()
            .filter(|(_, value)| !value.is_empty() && curl.contains(value.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        if present.is_empty() {
            return MatchedInputs {
                identified: HashMap::new(),
                remaining: dynamic_parts.to_vec(),
            };
        }

        let declared: Vec<serde_json::Value> = {
            let mut sorted: Vec<(&String, &String)> = present.iter().collect();
            sorted.sort();
            sorted
                .into_iter()
                .map(|(name, value)| json!({"name": name, "value": value}))
                .collect()
        };
        let messages = vec![
            ChatMessage::system(
                "You decide which of the declared input variables are actually used by \
                 the given HTTP request.",
            ),
            ChatMessage::user(format!(
                "Request:\n{curl}\n\nDeclared variables:\n{}",
                serde_json::to_string_pretty(&declared).unwrap_or_default()
            )),
        ];

        let identified = match oracle
            .call_function(&messages, &schemas::identify_input_variables(), cancel)
            .await
        {
            Ok(value) => match serde_json::from_value::<InputVariablesAnswer>(value) {
                Ok(answer) => answer
                    .identified_variables
                    .into_iter()
                    // Trust only names the caller actually declared.
                    .filter(|v| present.contains_key(&v.variable_name))
                    .map(|v| (v.variable_name, v.variable_value))
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "unparseable input-variable answer, using textual presence");
                    present.clone()
                }
            },
            Err(e) => {
                warn!(error = %e, "input-variable oracle call failed, using textual presence");
                present.clone()
            }
        };

        let remaining = dynamic_parts
            .iter()
            .filter(|part| !identified.values().any(|value| value == *part))
            .cloned()
            .collect();

        MatchedInputs {
            identified,
            remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::testing::{FailingOracle, ScriptedOracle};
    use pretty_assertions::assert_eq;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_declaration_short_circuits() {
        let matcher = InputVariableMatcher::new();
        let oracle = ScriptedOracle::new();
        let parts = vec!["tok_1".to_string()];
        let result = matcher
            .match_inputs(&oracle, "curl 'https://x'", &HashMap::new(), &parts, &CancelSignal::none())
            .await;
        assert_eq!(result.remaining, parts);
        assert!(result.identified.is_empty());
        assert_eq!(oracle.call_count(), 0);
    }

    #[tokio::test]
    async fn test_absent_values_never_reach_oracle() {
        let matcher = InputVariableMatcher::new();
        let oracle = ScriptedOracle::new();
        let result = matcher
            .match_inputs(
                &oracle,
                "curl 'https://api.example.com/search?q=term'",
                &vars(&[("city", "lisbon")]),
                &["term".to_string()],
                &CancelSignal::none(),
            )
            .await;
        assert!(result.identified.is_empty());
        assert_eq!(result.remaining, vec!["term".to_string()]);
        assert_eq!(oracle.call_count(), 0);
    }

    #[tokio::test]
    async fn test_identified_values_removed_from_dynamic_set() {
        let matcher = InputVariableMatcher::new();
        let oracle = ScriptedOracle::new().with_response(
            "identify_input_variables",
            serde_json::json!({
                "identified_variables": [
                    {"variable_name": "query", "variable_value": "term"}
                ]
            }),
        );
        let result = matcher
            .match_inputs(
                &oracle,
                "curl 'https://api.example.com/search?q=term' -H 'X-Token: tok_1'",
                &vars(&[("query", "term")]),
                &["term".to_string(), "tok_1".to_string()],
                &CancelSignal::none(),
            )
            .await;
        assert_eq!(result.identified.get("query").map(String::as_str), Some("term"));
        assert_eq!(result.remaining, vec!["tok_1".to_string()]);
    }

    #[tokio::test]
    async fn test_undeclared_names_from_oracle_are_dropped() {
        let matcher = InputVariableMatcher::new();
        let oracle = ScriptedOracle::new().with_response(
            "identify_input_variables",
            serde_json::json!({
                "identified_variables": [
                    {"variable_name": "invented", "variable_value": "term"}
                ]
            }),
        );
        let result = matcher
            .match_inputs(
                &oracle,
                "curl 'https://api.example.com/search?q=term'",
                &vars(&[("query", "term")]),
                &["term".to_string()],
                &CancelSignal::none(),
            )
            .await;
        assert!(result.identified.is_empty());
    }

    #[tokio::test]
    async fn test_oracle_failure_falls_back_to_textual_presence() {
        let matcher = InputVariableMatcher::new();
        let result = matcher
            .match_inputs(
                &FailingOracle::new(),
                "curl 'https://api.example.com/search?q=term'",
                &vars(&[("query", "term"), ("other", "absent-value")]),
                &["term".to_string(), "tok_1".to_string()],
                &CancelSignal::none(),
            )
            .await;
        assert_eq!(result.identified.len(), 1);
        assert_eq!(result.remaining, vec!["tok_1".to_string()]);
    }
}
