//! Rule and user records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque worker registry key.
///
/// Storage assigns integer ids; the pool only ever addresses workers by this
/// string form, which is also used as the consumer group id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for RuleId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for RuleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub rule: RuleConfig,
    pub owner: Option<i64>,
}

impl Rule {
    /// Registry key for this rule's worker.
    pub fn rule_id(&self) -> RuleId {
        RuleId::from(self.id)
    }
}

/// Declarative transformation of one source topic into one destination topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    pub topic_from: String,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub entity_hash: Vec<String>,
    #[serde(default)]
    pub unifier: Vec<UnifierSpec>,
    #[serde(default)]
    pub extra_process: Vec<ExtraProcessSpec>,
    pub topic_to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub regexp: String,
}

/// Projects `expression` from the source event into `name`, coerced to `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifierSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub expression: String,
}

/// Enrichment step: `to = func(args...)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraProcessSpec {
    pub func: String,
    #[serde(default)]
    pub args: String,
    pub to: String,
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub password_hash: String,
}
