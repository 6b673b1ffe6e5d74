use serde_json::Value;
use serde_json_path::JsonPath;
use std::borrow::Cow;
use thiserror::Error;

/// Evaluates query-language expressions over JSON documents.
pub trait QueryEngine: Send + Sync {
    /// Returns `None` when the expression selects nothing.
    fn search(&self, expr: &str, data: &Value) -> Result<Option<Value>, SearchError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid expression {expr:?}: {message}")]
pub struct SearchError {
    pub expr: String,
    pub message: String,
}

/// A [`QueryEngine`] backed by JSONPath.
///
/// Expressions that do not start at the root (`$`) are treated as dotted paths from the root, so
/// `request.object.metadata.name` and `$.request.object.metadata.name` are equivalent. A query
/// that selects a single node yields that node; one that selects several yields an array.
#[derive(Copy, Clone, Debug, Default)]
pub struct JsonPathEngine(());

impl JsonPathEngine {
    pub fn new() -> Self {
        Self(())
    }
}

impl QueryEngine for JsonPathEngine {
    fn search(&self, expr: &str, data: &Value) -> Result<Option<Value>, SearchError> {
        let expr = expr.trim();
        let path = if expr.starts_with('$') {
            Cow::Borrowed(expr)
        } else {
            Cow::Owned(format!("$.{expr}"))
        };
        let path = JsonPath::parse(&path).map_err(|error| SearchError {
            expr: expr.to_string(),
            message: error.to_string(),
        })?;

        let mut nodes = path.query(data).all();
        let value = match nodes.len() {
            0 => None,
            1 => nodes.pop().cloned(),
            _ => Some(Value::Array(nodes.into_iter().cloned().collect())),
        };
        Ok(value)
    }
}
