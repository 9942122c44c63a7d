//! JSON extraction from model replies
//!
//! Models wrap JSON in markdown fences or surround it with prose. Parsing
//! first strips fences and backticks, then falls back to scanning the reply
//! for an embedded object.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::AgentError;
use crate::utils::preview;

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^```(?:json|javascript|js)?\s*\n?([\s\S]*?)\n?```$").expect("valid regex")
});

static EMBEDDED_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```").expect("valid regex"));

/// Remove a surrounding markdown fence and stray backticks
pub fn strip_fences(response: &str) -> String {
    let trimmed = response.trim();
    let inner = FENCED_BLOCK
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(trimmed);
    inner.trim_matches('`').trim().to_string()
}

/// Find a JSON object inside free text
pub fn extract_json(response: &str, context: &str) -> Option<Value> {
    let cleaned = strip_fences(response);
    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        return Some(value);
    }

    for caps in EMBEDDED_FENCE.captures_iter(response) {
        if let Some(value) = caps
            .get(1)
            .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        {
            debug!("Extracted fenced JSON from mixed content in {}", context);
            return Some(value);
        }
    }

    if let (Some(first), Some(last)) = (response.find('{'), response.rfind('}')) {
        if first < last {
            if let Ok(value) = serde_json::from_str::<Value>(&response[first..=last]) {
                debug!("Extracted JSON by brace boundaries in {}", context);
                return Some(value);
            }
        }
    }

    warn!("No valid JSON found in model reply for {}", context);
    None
}

/// Parse a model reply into a JSON object
pub fn parse_json_value(response: &str, context: &str) -> Result<Value, AgentError> {
    if response.trim().is_empty() {
        return Err(AgentError::ParseError(format!(
            "Invalid response format in {}: response is empty",
            context
        )));
    }
    match extract_json(response, context) {
        Some(value @ Value::Object(_)) => Ok(value),
        Some(other) => Err(AgentError::ParseError(format!(
            "Invalid response structure in {}: expected object, got {}",
            context,
            json_kind(&other)
        ))),
        None => Err(AgentError::ParseError(format!(
            "Failed to parse JSON from model reply in {}. Response preview: {}",
            context,
            preview(response, 100)
        ))),
    }
}

/// Parse a model reply into a typed payload once `required` fields are present
pub fn parse_json_response<T: DeserializeOwned>(
    response: &str,
    required: &[&str],
    context: &str,
) -> Result<T, AgentError> {
    let value = parse_json_value(response, context)?;
    require_fields(&value, required, context)?;
    serde_json::from_value(value).map_err(|e| {
        AgentError::ParseError(format!("Unexpected payload shape in {}: {}", context, e))
    })
}

/// Check that every field in `required` is present on the object
pub fn require_fields(value: &Value, required: &[&str], context: &str) -> Result<(), AgentError> {
    let object = value.as_object().ok_or_else(|| {
        AgentError::ParseError(format!(
            "Invalid response structure in {}: expected object, got {}",
            context,
            json_kind(value)
        ))
    })?;

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|field| !object.contains_key(*field))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    let available: Vec<&str> = object.keys().map(String::as_str).collect();
    Err(AgentError::ParseError(format!(
        "Missing required fields in {}: {}. Available fields: {}",
        context,
        missing.join(", "),
        available.join(", ")
    )))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("`{\"a\":1}`"), "{\"a\":1}");
        assert_eq!(strip_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_parse_plain_and_fenced() {
        let value = parse_json_value("```json\n{\"intent\": \"chart\"}\n```", "test").unwrap();
        assert_eq!(value["intent"], "chart");
    }

    #[test]
    fn test_extract_from_prose() {
        let reply = "Sure! Here you go: {\"query\": \"SELECT 1\"} Hope that helps.";
        let value = parse_json_value(reply, "test").unwrap();
        assert_eq!(value["query"], "SELECT 1");
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(parse_json_value("[1, 2]", "test").is_err());
        assert!(parse_json_value("not json at all", "test").is_err());
        assert!(parse_json_value("   ", "test").is_err());
    }

    #[test]
    fn test_require_fields_reports_missing() {
        let value = json!({"intent": "chart"});
        assert!(require_fields(&value, &["intent"], "routing").is_ok());
        let err = require_fields(&value, &["intent", "reasoning"], "routing").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("reasoning"));
        assert!(message.contains("Available fields: intent"));
    }

    #[test]
    fn test_typed_parse() {
        #[derive(serde::Deserialize)]
        struct Verdict {
            #[serde(rename = "isValid")]
            is_valid: bool,
        }
        let verdict: Verdict =
            parse_json_response("```json\n{\"isValid\": true}\n```", &["isValid"], "test").unwrap();
        assert!(verdict.is_valid);
        assert!(parse_json_response::<Verdict>("{\"issues\": []}", &["isValid"], "test").is_err());
        assert!(parse_json_response::<Verdict>("{\"isValid\": \"yes\"}", &["isValid"], "test").is_err());
    }
}
