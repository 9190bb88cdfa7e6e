//! Field unification: project and coerce source fields into the output event.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat};
use serde_json::{Number, Value};
use tracing::trace;

use super::Event;
use crate::error::TransformError;
use crate::model::UnifierSpec;

/// Target type of a unified field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Int,
    Timestamp,
}

impl FromStr for FieldType {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "int" => Ok(Self::Int),
            "timestamp" => Ok(Self::Timestamp),
            other => Err(TransformError::UnknownType(other.to_string())),
        }
    }
}

/// Unify `event` into `out` according to `specs`.
///
/// Every spec is attempted. A spec whose source field is absent is skipped.
/// Coercion failures are collected and returned; they never stop the
/// remaining specs, so `out` may be partially filled.
pub fn unify(event: &Event, specs: &[UnifierSpec], out: &mut Event) -> Vec<TransformError> {
    let mut errors = Vec::new();

    for spec in specs {
        let Some(value) = event.get(&spec.expression) else {
            continue;
        };

        match coerce(spec, value) {
            Ok(Some(v)) => {
                out.insert(spec.name.clone(), v);
            }
            Ok(None) => {
                trace!(field = %spec.name, "Source value skipped");
            }
            Err(e) => errors.push(e),
        }
    }

    errors
}

fn coerce(spec: &UnifierSpec, value: &Value) -> Result<Option<Value>, TransformError> {
    match spec.field_type.parse::<FieldType>()? {
        FieldType::String => Ok(value.as_str().map(|s| Value::String(s.to_string()))),
        FieldType::Int => to_int(&spec.name, value).map(Some),
        FieldType::Timestamp => match value {
            Value::String(s) => to_timestamp(&spec.name, s).map(Some),
            _ => Ok(None),
        },
    }
}

fn to_int(field: &str, value: &Value) -> Result<Value, TransformError> {
    let not_int = || TransformError::NotAnInteger {
        field: field.to_string(),
        value: value.to_string(),
    };

    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::Number(n.clone())),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                Ok(Value::Number(Number::from(f as i64)))
            }
            _ => Err(not_int()),
        },
        Value::String(s) => s
            .parse::<i64>()
            .map(|i| Value::Number(Number::from(i)))
            .map_err(|_| not_int()),
        _ => Err(not_int()),
    }
}

fn to_timestamp(field: &str, raw: &str) -> Result<Value, TransformError> {
    let parsed =
        DateTime::parse_from_rfc3339(raw).map_err(|e| TransformError::InvalidTimestamp {
            field: field.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })?;

    Ok(Value::String(
        parsed.to_rfc3339_opts(SecondsFormat::Secs, true),
    ))
}
