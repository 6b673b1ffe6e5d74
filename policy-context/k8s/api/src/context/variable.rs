use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value computed from a literal and/or an expression over the context.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Evaluated over `value` when it is set, otherwise over the context.
    ///
    /// The expression is evaluated by the configured query engine. The default engine reads
    /// JSONPath, where a path without a leading `$` starts at the root; JMESPath functions and
    /// quoted keys are not supported.
    #[serde(
        default,
        rename = "jmesPath",
        skip_serializing_if = "Option::is_none"
    )]
    pub query: Option<String>,

    /// Used when the value resolves to nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Variable {
    pub fn from_value(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    pub fn from_query(query: impl ToString) -> Self {
        Self {
            query: Some(query.to_string()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.query.is_none() && self.default.is_none()
    }
}
