//! Verdict extraction from loosely structured model output.
//!
//! Models asked for "JSON only" still wrap it in prose or code fences. The
//! search order is fixed: a ```json fenced block wins over a bare object
//! literal even when the bare literal appears earlier in the text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```json\s*([\s\S]*?)\s*```").expect("fenced json regex is valid"));

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Failed to parse analysis JSON from model response: no JSON object found")]
    NoObjectFound,
    #[error("Failed to parse analysis JSON from model response: {detail}")]
    MalformedObject { detail: String },
    #[error("Response JSON missing 'posture' string field.")]
    MissingPostureField,
}

/// What the model said, before any normalization. `posture` keeps the
/// model's casing; `reason` is passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedVerdict {
    pub posture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub fn extract_verdict(text: &str) -> Result<ExtractedVerdict, ExtractionError> {
    let value = find_object(text)?;
    let Value::Object(map) = value else {
        return Err(ExtractionError::MalformedObject {
            detail: "expected a JSON object".to_string(),
        });
    };

    let posture = map
        .get("posture")
        .and_then(Value::as_str)
        .ok_or(ExtractionError::MissingPostureField)?
        .to_string();
    let reason = match map.get("reason") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    Ok(ExtractedVerdict { posture, reason })
}

fn find_object(text: &str) -> Result<Value, ExtractionError> {
    let candidate = FENCED_JSON
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .or_else(|| first_balanced_object(text));

    if let Some(span) = candidate {
        return serde_json::from_str(span).map_err(|e| ExtractionError::MalformedObject {
            detail: e.to_string(),
        });
    }

    // Neither pattern matched: the whole text is the last resort.
    let whole = text.trim();
    match serde_json::from_str::<Value>(whole) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Err(e) if whole.starts_with('{') => Err(ExtractionError::MalformedObject {
            detail: e.to_string(),
        }),
        _ => Err(ExtractionError::NoObjectFound),
    }
}

/// First top-level `{...}` span whose braces balance, ignoring braces inside
/// string literals.
fn first_balanced_object(text: &str) -> Option<&str> {
    let mut depth: u32 = 0;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escape = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0
                        && let Some(s) = start.take()
                    {
                        return Some(&text[s..idx + 1]);
                    }
                }
            }
            _ => {}
        }
    }

    None
}
