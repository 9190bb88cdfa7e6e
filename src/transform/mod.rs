//! Transformation engine.
//!
//! Pure, synchronous functions shared by every stream worker:
//! - `filter` — regex pre-filter over raw bytes
//! - `hash` — entity hash over selected fields
//! - `unify` — typed field projection
//! - `enrich` — named enrichment functions and their registry
//! - `pipeline` — a rule compiled into the steps above

pub mod builtin;
pub mod enrich;
pub mod filter;
pub mod hash;
pub mod pipeline;
pub mod unify;

use serde_json::Value;

use crate::error::TransformError;

pub use enrich::{EnrichFunction, FunctionRegistry, enrich};
pub use filter::filter;
pub use hash::entity_hash;
pub use pipeline::{Outcome, Pipeline};
pub use unify::{FieldType, unify};

/// A decoded event: a JSON object.
pub type Event = serde_json::Map<String, Value>;

/// Output field holding the entity hash.
pub const ENTITY_FIELD: &str = "entity";

/// Decode a raw message into an [`Event`].
pub fn parse_event(raw: &[u8]) -> Result<Event, TransformError> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(TransformError::Parse(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(TransformError::Parse(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_is_parsed() {
        let event = parse_event(br#"{"a": 1, "b": {"c": "d"}}"#).unwrap();
        assert_eq!(event.len(), 2);
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(matches!(parse_event(b"[1,2]"), Err(TransformError::Parse(_))));
        assert!(matches!(parse_event(b"\"s\""), Err(TransformError::Parse(_))));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(parse_event(b"{oops"), Err(TransformError::Parse(_))));
    }
}
