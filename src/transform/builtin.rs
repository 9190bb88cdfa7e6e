//! Built-in enrichment functions.

use serde_json::Value;

use super::Event;
use super::enrich::EnrichFunction;
use crate::error::TransformError;

/// `__if(field, matchValue, resultValue)`: `resultValue` when the output
/// event's `field` is the string `matchValue`, otherwise `""`.
#[derive(Debug, Clone, Copy)]
pub struct IfFunction;

impl EnrichFunction for IfFunction {
    fn name(&self) -> &str {
        "__if"
    }

    fn call(&self, args: &[&str], event: &Event) -> Result<Value, TransformError> {
        let [field, expected, result, ..] = args else {
            return Err(TransformError::InvalidArguments {
                name: self.name().to_string(),
                expected: 3,
                got: args.len(),
            });
        };

        let matched = matches!(event.get(*field), Some(Value::String(v)) if v == expected);
        Ok(Value::String(if matched {
            (*result).to_string()
        } else {
            String::new()
        }))
    }
}

/// `__stringConstant(value)`: yields `value`; further arguments are ignored.
#[derive(Debug, Clone, Copy)]
pub struct StringConstantFunction;

impl EnrichFunction for StringConstantFunction {
    fn name(&self) -> &str {
        "__stringConstant"
    }

    fn call(&self, args: &[&str], _event: &Event) -> Result<Value, TransformError> {
        Ok(Value::String(
            args.first().copied().unwrap_or_default().to_string(),
        ))
    }
}
