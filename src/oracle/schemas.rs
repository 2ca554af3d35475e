//! The five function-calling contracts the kernel holds the oracle to,
//! plus the validator every response passes through before it is trusted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::FunctionSchema;

/// Schema for primary-action URL selection.
pub fn identify_end_url() -> FunctionSchema {
    FunctionSchema::new(
        "identify_end_url",
        "Select the URL of the request that performs the user's stated goal. \
         The URL must be copied verbatim from the provided candidate list.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The chosen URL, verbatim from the candidate list"
                }
            },
            "required": ["url"]
        }),
    )
}

/// Schema for dynamic-part extraction from one request.
pub fn identify_dynamic_parts() -> FunctionSchema {
    FunctionSchema::new(
        "identify_dynamic_parts",
        "Return the values (never the keys) of tokens, session identifiers, \
         CSRF tokens, API keys, and authentication parameters the server is \
         likely to validate. Exclude arbitrary user data.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "dynamic_parts": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Server-validated values found in the request"
                }
            },
            "required": ["dynamic_parts"]
        }),
    )
}

/// Schema for the session-aware consistency pass.
pub fn analyze_session_tokens() -> FunctionSchema {
    FunctionSchema::new(
        "analyze_session_tokens",
        "Given parameters that repeat across a recorded session, distinguish \
         session-established constants from user-supplied input.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "potentialSessionTokens": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Values that are session-established constants"
                },
                "authenticationParameters": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Parameter names that carry authentication material"
                },
                "confidence": {
                    "type": "number",
                    "description": "Overall confidence in the analysis, 0.0-1.0"
                },
                "analysis": {
                    "type": "string",
                    "description": "Short reasoning summary"
                }
            },
            "required": ["potentialSessionTokens", "authenticationParameters", "confidence", "analysis"]
        }),
    )
}

/// Schema for matching declared input variables to one request.
pub fn identify_input_variables() -> FunctionSchema {
    FunctionSchema::new(
        "identify_input_variables",
        "Decide which of the declared input variables are actually used in \
         this request.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "identified_variables": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "variable_name": { "type": "string" },
                            "variable_value": { "type": "string" }
                        },
                        "required": ["variable_name", "variable_value"]
                    }
                }
            },
            "required": ["identified_variables"]
        }),
    )
}

/// Schema for batch parameter classification.
pub fn classify_parameters() -> FunctionSchema {
    FunctionSchema::new(
        "classify_parameters",
        "Classify request parameters into dynamic, sessionConstant, \
         userInput, staticConstant, or optional, with a confidence per \
         parameter.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "classified_parameters": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "parameter_name": { "type": "string" },
                            "parameter_value": { "type": "string" },
                            "classification": {
                                "type": "string",
                                "enum": ["dynamic", "sessionConstant", "userInput", "staticConstant", "optional"]
                            },
                            "confidence": { "type": "number" },
                            "reasoning": { "type": "string" },
                            "domain_context": { "type": "string" }
                        },
                        "required": ["parameter_name", "parameter_value", "classification", "confidence"]
                    }
                }
            },
            "required": ["classified_parameters"]
        }),
    )
}

// Typed views of the oracle's answers.

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndUrlAnswer {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DynamicPartsAnswer {
    pub dynamic_parts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionTokensAnswer {
    #[serde(rename = "potentialSessionTokens")]
    pub potential_session_tokens: Vec<String>,
    #[serde(rename = "authenticationParameters")]
    pub authentication_parameters: Vec<String>,
    pub confidence: f64,
    pub analysis: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentifiedVariable {
    pub variable_name: String,
    pub variable_value: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputVariablesAnswer {
    pub identified_variables: Vec<IdentifiedVariable>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifiedParameterAnswer {
    pub parameter_name: String,
    pub parameter_value: String,
    pub classification: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub domain_context: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifyParametersAnswer {
    pub classified_parameters: Vec<ClassifiedParameterAnswer>,
}

/// Validate a returned payload against a function schema.
///
/// Checks object shape, required fields, declared property types, and enum
/// membership one level into arrays. Anything deeper is the deserializer's
/// problem.
pub fn validate_against_schema(value: &Value, schema: &FunctionSchema) -> Result<(), String> {
    validate_object(value, &schema.parameters)
}

fn validate_object(value: &Value, schema: &Value) -> Result<(), String> {
    let Some(object) = value.as_object() else {
        return Err("payload is not a JSON object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(field) {
                return Err(format!("missing required field `{field}`"));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (name, prop_schema) in properties {
        let Some(actual) = object.get(name) else {
            continue;
        };
        validate_type(actual, prop_schema)
            .map_err(|e| format!("field `{name}`: {e}"))?;
    }
    Ok(())
}

fn validate_type(value: &Value, schema: &Value) -> Result<(), String> {
    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{value} is not one of the allowed values"));
        }
    }
    let Some(expected) = schema.get("type").and_then(Value::as_str) else {
        return Ok(());
    };
    let ok = match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    };
    if !ok {
        return Err(format!("expected {expected}"));
    }
    if expected == "array" {
        if let Some(item_schema) = schema.get("items") {
            for (index, item) in value.as_array().into_iter().flatten().enumerate() {
                if item_schema.get("type").and_then(Value::as_str) == Some("object") {
                    validate_object(item, item_schema)
                        .map_err(|e| format!("item {index}: {e}"))?;
                } else {
                    validate_type(item, item_schema).map_err(|e| format!("item {index}: {e}"))?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_all_schemas_have_distinct_names() {
        let names = [
            identify_end_url().name,
            identify_dynamic_parts().name,
            analyze_session_tokens().name,
            identify_input_variables().name,
            classify_parameters().name,
        ];
        let mut deduped = names.to_vec();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), names.len());
    }

    #[test]
    fn test_validate_accepts_conforming_payload() {
        let value = serde_json::json!({"url": "https://api.example.com/v1/ping"});
        assert!(validate_against_schema(&value, &identify_end_url()).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_required() {
        let value = serde_json::json!({"address": "nope"});
        let err = validate_against_schema(&value, &identify_end_url()).unwrap_err();
        assert!(err.contains("url"));
    }

    #[test]
    fn test_validate_rejects_wrong_type() {
        let value = serde_json::json!({"dynamic_parts": "not-an-array"});
        assert!(validate_against_schema(&value, &identify_dynamic_parts()).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_enum_in_array_items() {
        let value = serde_json::json!({
            "classified_parameters": [{
                "parameter_name": "q",
                "parameter_value": "x",
                "classification": "madeUp",
                "confidence": 0.5
            }]
        });
        let err = validate_against_schema(&value, &classify_parameters()).unwrap_err();
        assert!(err.contains("classification") || err.contains("allowed"));
    }

    #[test]
    fn test_validate_rejects_non_object_payload() {
        let value = serde_json::json!(["not", "an", "object"]);
        assert!(validate_against_schema(&value, &identify_end_url()).is_err());
    }

    #[test]
    fn test_session_tokens_answer_deserializes_camel_case() {
        let value = serde_json::json!({
            "potentialSessionTokens": ["tok_1"],
            "authenticationParameters": ["authorization"],
            "confidence": 0.9,
            "analysis": "one bearer token"
        });
        let answer: SessionTokensAnswer = serde_json::from_value(value).unwrap();
        assert_eq!(answer.potential_session_tokens, vec!["tok_1"]);
    }
}
