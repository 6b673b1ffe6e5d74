//! `{{ expr }}` substitution in entry fields.

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use policy_context_core::{JsonContext, QueryEngine};
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("placeholder pattern must compile"));

pub(crate) fn has_placeholders(s: &str) -> bool {
    PLACEHOLDER.is_match(s)
}

/// Substitutes placeholders in a string field, rendering every result as a string.
pub(crate) async fn substitute_str(
    context: &JsonContext,
    engine: &dyn QueryEngine,
    s: &str,
) -> Result<String> {
    match substitute(context, engine, &Value::String(s.to_string())).await? {
        Value::String(s) => Ok(s),
        value => Ok(value.to_string()),
    }
}

/// Substitutes placeholders in every string of `value`.
///
/// A string that is exactly one placeholder is replaced by the placeholder's value; otherwise
/// each placeholder is replaced by its string rendering.
pub(crate) async fn substitute(
    context: &JsonContext,
    engine: &dyn QueryEngine,
    value: &Value,
) -> Result<Value> {
    let mut exprs = Vec::new();
    collect(value, &mut exprs);
    if exprs.is_empty() {
        return Ok(value.clone());
    }

    let mut resolved = HashMap::with_capacity(exprs.len());
    for expr in exprs {
        if resolved.contains_key(&expr) {
            continue;
        }
        let v = context
            .query(engine, &expr)
            .await
            .with_context(|| format!("failed to substitute variable {expr}"))?
            .ok_or_else(|| anyhow!("variable {expr} is not defined"))?;
        resolved.insert(expr, v);
    }

    Ok(replace(value, &resolved))
}

fn collect(value: &Value, exprs: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for caps in PLACEHOLDER.captures_iter(s) {
                exprs.push(caps[1].to_string());
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect(v, exprs)),
        Value::Object(map) => map.values().for_each(|v| collect(v, exprs)),
        _ => {}
    }
}

fn replace(value: &Value, resolved: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => replace_str(s, resolved),
        Value::Array(items) => Value::Array(items.iter().map(|v| replace(v, resolved)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), replace(v, resolved)))
                .collect(),
        ),
        v => v.clone(),
    }
}

fn replace_str(s: &str, resolved: &HashMap<String, Value>) -> Value {
    if let Some(caps) = PLACEHOLDER.captures(s) {
        if caps.get(0).map(|m| m.as_str().len()) == Some(s.len()) {
            if let Some(v) = resolved.get(&caps[1]) {
                return v.clone();
            }
        }
    }

    let replaced = PLACEHOLDER.replace_all(s, |caps: &Captures<'_>| match resolved.get(&caps[1]) {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => caps[0].to_string(),
    });
    Value::String(replaced.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_context_core::JsonPathEngine;
    use serde_json::json;

    fn context() -> JsonContext {
        let context = JsonContext::new();
        context.add_entry(
            "request",
            json!({
                "namespace": "web",
                "object": {"spec": {"replicas": 3, "labels": {"app": "web"}}},
            }),
        );
        context
    }

    #[tokio::test]
    async fn whole_placeholder_keeps_type() {
        let value = substitute(
            &context(),
            &JsonPathEngine::new(),
            &json!({"n": "{{ request.object.spec.replicas }}", "l": "{{request.object.spec.labels}}"}),
        )
        .await
        .expect("substitution must succeed");
        assert_eq!(value, json!({"n": 3, "l": {"app": "web"}}));
    }

    #[tokio::test]
    async fn embedded_placeholders_render_as_strings() {
        let s = substitute_str(
            &context(),
            &JsonPathEngine::new(),
            "/api/v1/namespaces/{{request.namespace}}/pods?limit={{ request.object.spec.replicas }}",
        )
        .await
        .expect("substitution must succeed");
        assert_eq!(s, "/api/v1/namespaces/web/pods?limit=3");
    }

    #[tokio::test]
    async fn literals_are_unchanged() {
        let value = json!({"a": [1, "two", null]});
        assert_eq!(
            substitute(&context(), &JsonPathEngine::new(), &value)
                .await
                .unwrap(),
            value
        );
    }

    #[tokio::test]
    async fn undefined_placeholder_fails() {
        let err = substitute_str(&context(), &JsonPathEngine::new(), "{{ request.missing }}")
            .await
            .expect_err("undefined variables must fail");
        assert_eq!(err.to_string(), "variable request.missing is not defined");
    }

    #[test]
    fn detects_placeholders() {
        assert!(has_placeholders("{{request.namespace}}"));
        assert!(has_placeholders("ghcr.io/{{ org }}/app"));
        assert!(!has_placeholders("ghcr.io/org/app:v1"));
    }
}
