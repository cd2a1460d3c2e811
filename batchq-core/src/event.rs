//! Event shape validation
//!
//! Events are arbitrary JSON objects. These checks mirror the naming rules
//! enforced server-side so obviously unacceptable events are rejected before
//! they ever hit the queue.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Maximum nesting depth of an event (layers of nested objects).
pub const MAX_EVENT_DEPTH: usize = 5;

/// Maximum length of a collection or property name.
pub const MAX_NAME_LENGTH: usize = 256;

/// Maximum length of a string property value.
pub const MAX_STRING_LENGTH: usize = 10_000;

/// Validate a collection name.
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidCollection(
            "collection name must not be empty".to_string(),
        ));
    }
    if name.starts_with('$') {
        return Err(Error::InvalidCollection(
            "collection name cannot start with the dollar sign ($) character".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(Error::InvalidCollection(format!(
            "collection name cannot be longer than {} characters",
            MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

/// Validate an event before it is queued.
///
/// The event must be a non-empty JSON object; property names and string
/// values are checked recursively.
pub fn validate_event(event: &Value) -> Result<()> {
    let map = match event {
        Value::Object(map) => map,
        _ => {
            return Err(Error::InvalidEvent(
                "event must be a JSON object".to_string(),
            ))
        }
    };
    if map.is_empty() {
        return Err(Error::InvalidEvent(
            "event must not be empty".to_string(),
        ));
    }
    validate_object(map, 0)
}

fn validate_object(map: &Map<String, Value>, depth: usize) -> Result<()> {
    if depth > MAX_EVENT_DEPTH {
        return Err(Error::InvalidEvent(format!(
            "event nesting cannot exceed {} levels",
            MAX_EVENT_DEPTH
        )));
    }

    for (key, value) in map {
        if key.contains('.') {
            return Err(Error::InvalidEvent(format!(
                "property name '{}' cannot contain the period (.) character",
                key
            )));
        }
        if key.starts_with('$') {
            return Err(Error::InvalidEvent(format!(
                "property name '{}' cannot start with the dollar sign ($) character",
                key
            )));
        }
        if key.len() > MAX_NAME_LENGTH {
            return Err(Error::InvalidEvent(format!(
                "property names cannot be longer than {} characters",
                MAX_NAME_LENGTH
            )));
        }
        validate_value(value, depth)?;
    }
    Ok(())
}

fn validate_value(value: &Value, depth: usize) -> Result<()> {
    match value {
        Value::String(s) if s.len() >= MAX_STRING_LENGTH => Err(Error::InvalidEvent(format!(
            "string property values cannot be {} characters or longer",
            MAX_STRING_LENGTH
        ))),
        Value::Object(map) => validate_object(map, depth + 1),
        Value::Array(items) => {
            for item in items {
                validate_value(item, depth)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
