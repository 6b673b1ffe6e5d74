use crate::variables::substitute_str;
use anyhow::{Context, Result};
use policy_context_core::{client::ConfigMapResolver, JsonContext, Loader, QueryEngine};
use policy_context_k8s_api::context::ConfigMapReference;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Stores a ConfigMap's `data` and `metadata`.
pub struct ConfigMapLoader {
    name: String,
    reference: ConfigMapReference,
    resolver: Arc<dyn ConfigMapResolver>,
    engine: Arc<dyn QueryEngine>,
}

impl ConfigMapLoader {
    pub fn new(
        name: impl ToString,
        reference: ConfigMapReference,
        resolver: Arc<dyn ConfigMapResolver>,
        engine: Arc<dyn QueryEngine>,
    ) -> Self {
        Self {
            name: name.to_string(),
            reference,
            resolver,
            engine,
        }
    }
}

#[async_trait::async_trait]
impl Loader for ConfigMapLoader {
    async fn load_data(&self, context: &JsonContext) -> Result<()> {
        let name = substitute_str(context, &*self.engine, &self.reference.name).await?;
        let namespace = match self.reference.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => substitute_str(context, &*self.engine, ns).await?,
            _ => ConfigMapReference::DEFAULT_NAMESPACE.to_string(),
        };

        debug!(%namespace, %name, "Fetching ConfigMap");
        let cm = self
            .resolver
            .get(&namespace, &name)
            .await
            .with_context(|| format!("failed to get ConfigMap {namespace}/{name}"))?;

        let data = cm
            .data
            .map(|data| {
                data.into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect()
            })
            .unwrap_or_default();
        let metadata = serde_json::to_value(&cm.metadata)?;
        context.add_entry(
            &self.name,
            json!({
                "data": Value::Object(data),
                "metadata": metadata,
            }),
        );
        Ok(())
    }
}
