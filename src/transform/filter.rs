//! Regex pre-filter over the raw message bytes.
//!
//! Runs before any decoding so that messages a rule is not interested in are
//! dropped without paying for JSON parsing.

use regex::bytes::Regex;

use crate::error::TransformError;

/// Compile a rule's filter pattern.
///
/// An empty pattern compiles to `None`: a rule without a filter lets nothing
/// through.
pub fn compile(pattern: &str) -> Result<Option<Regex>, TransformError> {
    if pattern.is_empty() {
        return Ok(None);
    }

    Regex::new(pattern)
        .map(Some)
        .map_err(|e| TransformError::InvalidRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// Test a raw message against a compiled filter.
pub fn matches(raw: &[u8], filter: Option<&Regex>) -> bool {
    filter.is_some_and(|re| re.is_match(raw))
}

/// One-shot filter: compile `pattern` and test `raw` against it.
pub fn filter(raw: &[u8], pattern: &str) -> Result<bool, TransformError> {
    let compiled = compile(pattern)?;
    Ok(matches(raw, compiled.as_ref()))
}
