//! Content-derived entity identifier.

use serde_json::Value;

use super::Event;

/// Compute the entity hash of `event` over `fields`.
///
/// The trimmed value of every listed field that is present and a string is
/// concatenated in list order; the MD5 of that concatenation is returned as
/// 32 lowercase hex characters. Missing and non-string fields add nothing.
pub fn entity_hash(event: &Event, fields: &[String]) -> String {
    let input: String = fields
        .iter()
        .filter_map(|field| match event.get(field) {
            Some(Value::String(s)) => Some(s.trim()),
            _ => None,
        })
        .collect();

    format!("{:x}", md5::compute(input.as_bytes()))
}
