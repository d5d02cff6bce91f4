use crate::error::{AppError, Result};
use serde_json::{Map, Value};
use url::form_urlencoded;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

pub fn is_json(content_type: Option<&str>) -> bool {
    content_type.map_or(false, |ct| ct.contains(JSON_CONTENT_TYPE))
}

pub fn is_form(content_type: Option<&str>) -> bool {
    content_type.map_or(false, |ct| ct.contains(FORM_CONTENT_TYPE))
}

/// Decodes a request body into field/value pairs.
///
/// JSON objects map directly, JSON arrays are keyed by element index, form
/// bodies are URL-decoded. Other content types decode to nothing.
pub fn decode_body(content_type: Option<&str>, body: &[u8]) -> Result<Map<String, Value>> {
    if is_json(content_type) {
        decode_json(body)
    } else if is_form(content_type) {
        Ok(decode_form(body))
    } else {
        Ok(Map::new())
    }
}

fn decode_json(body: &[u8]) -> Result<Map<String, Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    let parsed: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Malformed JSON body: {}", e)))?;

    match parsed {
        Value::Object(map) => Ok(map),
        Value::Array(items) => Ok(items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| (idx.to_string(), item))
            .collect()),
        other => Err(AppError::Validation(format!(
            "JSON body must be an object or array, got {}",
            other
        ))),
    }
}

fn decode_form(body: &[u8]) -> Map<String, Value> {
    form_urlencoded::parse(body)
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
        .collect()
}
