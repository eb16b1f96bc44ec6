//! Structured-output extraction for generation-backend responses.
//!
//! Model responses may arrive wrapped in markdown code fences with an
//! optional language tag. This module strips that noise, parses the
//! remainder as JSON and validates it against a data-driven per-stage
//! schema. Nothing is ever coerced or guessed; any failure is reported as a
//! malformed-output error for the calling stage to handle.

use serde_json::Value;
use thiserror::Error;

use crate::error::excerpt;

/// Semantic type a schema field must have.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Number,
    NumberInRange(f64, f64),
    Bool,
    Text,
    TextList,
}

/// One required field of a stage's output schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ExtractError {
    pub reason: String,
    pub excerpt: String,
}

impl ExtractError {
    fn new(reason: impl Into<String>, raw: &str) -> Self {
        Self {
            reason: reason.into(),
            excerpt: excerpt(raw),
        }
    }
}

/// Strip a surrounding fenced block marker and an optional language tag.
/// Text that does not start with a fence is returned trimmed, unchanged.
fn strip_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(inner) = text.strip_prefix("```") {
        text = inner.strip_suffix("```").unwrap_or(inner);
        // Optional language tag immediately after the opening marker.
        let tag_len = text.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        text = text[tag_len..].trim();
    }
    text
}

fn kind_matches(value: &Value, kind: FieldKind) -> std::result::Result<(), String> {
    match kind {
        FieldKind::Number => {
            if value.as_f64().is_some() {
                Ok(())
            } else {
                Err("must be a number".to_string())
            }
        }
        FieldKind::NumberInRange(min, max) => match value.as_f64() {
            Some(n) if n >= min && n <= max => Ok(()),
            Some(n) => Err(format!("must be within [{min}, {max}], got {n}")),
            None => Err("must be a number".to_string()),
        },
        FieldKind::Bool => {
            if value.is_boolean() {
                Ok(())
            } else {
                Err("must be a boolean".to_string())
            }
        }
        FieldKind::Text => {
            if value.is_string() {
                Ok(())
            } else {
                Err("must be a string".to_string())
            }
        }
        FieldKind::TextList => match value.as_array() {
            Some(items) if items.iter().all(Value::is_string) => Ok(()),
            Some(_) => Err("must be an array of strings".to_string()),
            None => Err("must be an array".to_string()),
        },
    }
}

/// Validate a parsed value against a stage schema: every required field
/// present, every field of the declared semantic type.
pub fn validate(value: &Value, schema: &[FieldSpec]) -> std::result::Result<(), String> {
    let object = value
        .as_object()
        .ok_or_else(|| "output is not a JSON object".to_string())?;

    for field in schema {
        match object.get(field.name) {
            None => return Err(format!("missing required field: {}", field.name)),
            Some(v) => {
                kind_matches(v, field.kind).map_err(|e| format!("field {} {e}", field.name))?;
            }
        }
    }
    Ok(())
}

/// Extract a validated structured record from raw backend text.
pub fn extract(raw: &str, schema: &[FieldSpec]) -> std::result::Result<Value, ExtractError> {
    let cleaned = strip_fences(raw);
    let value: Value = serde_json::from_str(cleaned)
        .map_err(|e| ExtractError::new(format!("invalid JSON: {e}"), raw))?;
    validate(&value, schema).map_err(|reason| ExtractError::new(reason, raw))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &[FieldSpec] = &[
        FieldSpec {
            name: "fraud_risk_score",
            kind: FieldKind::NumberInRange(0.0, 100.0),
        },
        FieldSpec {
            name: "identity_misuse_flag",
            kind: FieldKind::Bool,
        },
        FieldSpec {
            name: "reasons",
            kind: FieldKind::TextList,
        },
    ];

    #[test]
    fn strips_fence_with_language_tag() {
        let raw = "```json\n{\"fraud_risk_score\": 40, \"identity_misuse_flag\": false, \"reasons\": []}\n```";
        let value = extract(raw, SCHEMA).unwrap();
        assert_eq!(value["fraud_risk_score"], 40);
    }

    #[test]
    fn strips_fence_without_language_tag() {
        let raw = "```\n{\"fraud_risk_score\": 12.5, \"identity_misuse_flag\": true, \"reasons\": [\"dup\"]}\n```";
        let value = extract(raw, SCHEMA).unwrap();
        assert_eq!(value["reasons"][0], "dup");
    }

    #[test]
    fn plain_json_passes_through() {
        let raw = " {\"fraud_risk_score\": 0, \"identity_misuse_flag\": false, \"reasons\": []} ";
        assert!(extract(raw, SCHEMA).is_ok());
    }

    #[test]
    fn invalid_json_is_rejected_with_excerpt() {
        let err = extract("I think the patient looks fine", SCHEMA).unwrap_err();
        assert!(err.reason.starts_with("invalid JSON"));
        assert_eq!(err.excerpt, "I think the patient looks fine");
    }

    #[test]
    fn missing_field_is_rejected() {
        let raw = "{\"fraud_risk_score\": 40, \"reasons\": []}";
        let err = extract(raw, SCHEMA).unwrap_err();
        assert_eq!(err.reason, "missing required field: identity_misuse_flag");
    }

    #[test]
    fn wrong_type_is_never_coerced() {
        // A numeric string is not a number.
        let raw = "{\"fraud_risk_score\": \"40\", \"identity_misuse_flag\": false, \"reasons\": []}";
        let err = extract(raw, SCHEMA).unwrap_err();
        assert!(err.reason.contains("fraud_risk_score"));

        // A truthy number is not a boolean.
        let raw = "{\"fraud_risk_score\": 40, \"identity_misuse_flag\": 1, \"reasons\": []}";
        assert!(extract(raw, SCHEMA).is_err());

        // A single string is not a list of strings.
        let raw = "{\"fraud_risk_score\": 40, \"identity_misuse_flag\": false, \"reasons\": \"dup\"}";
        assert!(extract(raw, SCHEMA).is_err());
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        let raw = "{\"fraud_risk_score\": 140, \"identity_misuse_flag\": false, \"reasons\": []}";
        let err = extract(raw, SCHEMA).unwrap_err();
        assert!(err.reason.contains("within [0, 100]"));
    }

    #[test]
    fn non_object_output_is_rejected() {
        let err = extract("[1, 2, 3]", SCHEMA).unwrap_err();
        assert_eq!(err.reason, "output is not a JSON object");
    }

    #[test]
    fn long_raw_text_is_excerpted() {
        let raw = "x".repeat(500);
        let err = extract(&raw, SCHEMA).unwrap_err();
        assert!(err.excerpt.len() < raw.len());
        assert!(err.excerpt.ends_with("..."));
    }
}
