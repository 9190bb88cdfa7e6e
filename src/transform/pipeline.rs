//! Compiled per-rule pipeline: filter → parse → hash → unify → enrich.

use std::sync::Arc;

use regex::bytes::Regex;
use serde_json::Value;

use super::enrich::{FunctionRegistry, enrich};
use super::unify::{FieldType, unify};
use super::{ENTITY_FIELD, Event, entity_hash, filter, parse_event};
use crate::error::{ConfigError, TransformError};
use crate::model::RuleConfig;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The message did not match the rule's filter.
    Filtered,
    /// The message was transformed and should be published.
    Emit {
        payload: Vec<u8>,
        /// Non-fatal problems met while building the payload.
        field_errors: Vec<TransformError>,
    },
}

/// A validated rule, ready to process raw messages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Arc<RuleConfig>,
    filter: Option<Regex>,
    functions: Arc<FunctionRegistry>,
}

impl Pipeline {
    /// Validate `config` against `functions` and compile its filter.
    pub fn compile(
        config: Arc<RuleConfig>,
        functions: Arc<FunctionRegistry>,
    ) -> Result<Self, ConfigError> {
        let filter = filter::compile(&config.filter.regexp).map_err(|e| match e {
            TransformError::InvalidRegex { pattern, reason } => {
                ConfigError::InvalidRegex { pattern, reason }
            }
            other => ConfigError::InvalidValue {
                key: "filter.regexp".into(),
                message: other.to_string(),
            },
        })?;

        for spec in &config.unifier {
            if spec.name == ENTITY_FIELD {
                return Err(ConfigError::ReservedField(spec.name.clone()));
            }
            if spec.field_type.parse::<FieldType>().is_err() {
                return Err(ConfigError::UnknownType {
                    field: spec.name.clone(),
                    type_name: spec.field_type.clone(),
                });
            }
        }

        for spec in &config.extra_process {
            if spec.to == ENTITY_FIELD {
                return Err(ConfigError::ReservedField(spec.to.clone()));
            }
            if !functions.has(&spec.func) {
                return Err(ConfigError::UnknownFunction {
                    field: spec.to.clone(),
                    name: spec.func.clone(),
                });
            }
        }

        Ok(Self {
            config,
            filter,
            functions,
        })
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    /// Transform one raw message.
    ///
    /// Returns `Err` only when the message cannot be decoded or the result
    /// cannot be serialized; unify and enrich problems are reported in
    /// [`Outcome::Emit::field_errors`].
    pub fn process(&self, raw: &[u8]) -> Result<Outcome, TransformError> {
        if !filter::matches(raw, self.filter.as_ref()) {
            return Ok(Outcome::Filtered);
        }

        let event = parse_event(raw)?;

        let mut out = Event::new();
        out.insert(
            ENTITY_FIELD.to_string(),
            Value::String(entity_hash(&event, &self.config.entity_hash)),
        );

        let mut field_errors = unify(&event, &self.config.unifier, &mut out);

        if let Err(e) = enrich(&mut out, &self.config.extra_process, &self.functions) {
            field_errors.push(e);
        }

        let payload =
            serde_json::to_vec(&out).map_err(|e| TransformError::Serialize(e.to_string()))?;

        Ok(Outcome::Emit {
            payload,
            field_errors,
        })
    }
}
