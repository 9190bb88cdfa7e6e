//! Enrichment: derive output fields from already-unified fields.
//!
//! Functions are looked up by name in a [`FunctionRegistry`]; new primitives
//! are added by registering another [`EnrichFunction`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::Event;
use super::builtin::{IfFunction, StringConstantFunction};
use crate::error::TransformError;
use crate::model::ExtraProcessSpec;

/// A named enrichment primitive.
pub trait EnrichFunction: Send + Sync + fmt::Debug {
    /// Name used in `extraProcess[].func`.
    fn name(&self) -> &str;

    /// Compute the derived value from the trimmed argument list and the
    /// output event built so far.
    fn call(&self, args: &[&str], event: &Event) -> Result<Value, TransformError>;
}

/// Registry of enrichment functions.
#[derive(Debug, Default, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn EnrichFunction>>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `__if` and `__stringConstant`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(IfFunction));
        registry.register(Arc::new(StringConstantFunction));
        registry
    }

    /// Register a function, replacing any previous one with the same name.
    pub fn register(&mut self, function: Arc<dyn EnrichFunction>) {
        let name = function.name().to_string();
        if self.functions.insert(name.clone(), function).is_some() {
            debug!(function = %name, "Replaced enrichment function");
        } else {
            debug!(function = %name, "Registered enrichment function");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn EnrichFunction>> {
        self.functions.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// List all function names.
    pub fn list(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.functions.len()
    }
}

/// Split a comma-separated argument string, trimming each argument.
pub fn split_args(args: &str) -> Vec<&str> {
    args.split(',').map(str::trim).collect()
}

/// Apply `specs` to `out` in order.
///
/// Stops at the first unknown function or failing call; steps already
/// applied stay in `out`.
pub fn enrich(
    out: &mut Event,
    specs: &[ExtraProcessSpec],
    registry: &FunctionRegistry,
) -> Result<(), TransformError> {
    for spec in specs {
        let function = registry
            .get(&spec.func)
            .ok_or_else(|| TransformError::UnknownFunction(spec.func.clone()))?;

        let args = split_args(&spec.args);
        let value = function.call(&args, out)?;
        out.insert(spec.to.clone(), value);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> Event {
        value.as_object().cloned().unwrap()
    }

    fn step(func: &str, args: &str, to: &str) -> ExtraProcessSpec {
        ExtraProcessSpec {
            func: func.into(),
            args: args.into(),
            to: to.into(),
        }
    }

    #[test]
    fn if_writes_result_on_match() {
        let registry = FunctionRegistry::with_builtins();
        let mut out = event(json!({"testFrom": "123"}));
        enrich(&mut out, &[step("__if", "testFrom, 123, 321", "testTo")], &registry).unwrap();
        assert_eq!(out["testTo"], json!("321"));
    }

    #[test]
    fn if_writes_empty_string_on_mismatch() {
        let registry = FunctionRegistry::with_builtins();
        let mut out = event(json!({"testFrom": "999"}));
        enrich(&mut out, &[step("__if", "testFrom, 123, 321", "testTo")], &registry).unwrap();
        assert_eq!(out["testTo"], json!(""));
    }

    #[test]
    fn string_constant_writes_value() {
        let registry = FunctionRegistry::with_builtins();
        let mut out = event(json!({"testFrom": "123"}));
        enrich(&mut out, &[step("__stringConstant", "test", "testTo")], &registry).unwrap();
        assert_eq!(out["testTo"], json!("test"));
    }

    #[test]
    fn unknown_function_fails_fast() {
        let registry = FunctionRegistry::with_builtins();
        let mut out = event(json!({"testFrom": "123"}));
        let err = enrich(
            &mut out,
            &[
                step("__stringConstant", "first", "a"),
                step("__testFunc", "test", "testTo"),
                step("__stringConstant", "never", "b"),
            ],
            &registry,
        )
        .unwrap_err();

        assert_eq!(err, TransformError::UnknownFunction("__testFunc".into()));
        assert_eq!(out["a"], json!("first"));
        assert_eq!(out["testFrom"], json!("123"));
        assert!(!out.contains_key("testTo"));
        assert!(!out.contains_key("b"));
    }

    #[test]
    fn later_steps_see_earlier_results() {
        let registry = FunctionRegistry::with_builtins();
        let mut out = Event::new();
        enrich(
            &mut out,
            &[
                step("__stringConstant", "web", "source"),
                step("__if", "source, web, online", "channel"),
            ],
            &registry,
        )
        .unwrap();
        assert_eq!(out["channel"], json!("online"));
    }

    #[derive(Debug)]
    struct Upper;

    impl EnrichFunction for Upper {
        fn name(&self) -> &str {
            "__upper"
        }

        fn call(&self, args: &[&str], event: &Event) -> Result<Value, TransformError> {
            let field = args.first().copied().unwrap_or_default();
            let value = event.get(field).and_then(Value::as_str).unwrap_or_default();
            Ok(Value::String(value.to_uppercase()))
        }
    }

    #[test]
    fn custom_function_is_dispatched_by_name() {
        let mut registry = FunctionRegistry::with_builtins();
        registry.register(Arc::new(Upper));
        assert!(registry.has("__upper"));
        assert_eq!(registry.count(), 3);

        let mut out = event(json!({"name": "bob"}));
        enrich(&mut out, &[step("__upper", "name", "loud")], &registry).unwrap();
        assert_eq!(out["loud"], json!("BOB"));
    }

    #[test]
    fn args_are_split_and_trimmed() {
        assert_eq!(split_args(" a ,b,  c "), vec!["a", "b", "c"]);
        assert_eq!(split_args(""), vec![""]);
    }
}
