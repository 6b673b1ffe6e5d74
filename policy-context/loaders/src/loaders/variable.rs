use crate::variables::{substitute, substitute_str};
use anyhow::{anyhow, bail, Result};
use policy_context_core::{JsonContext, Loader, QueryEngine};
use policy_context_k8s_api::context::Variable;
use std::sync::Arc;

/// Stores a literal and/or an expression evaluated over the context.
pub struct VariableLoader {
    name: String,
    variable: Variable,
    engine: Arc<dyn QueryEngine>,
}

impl VariableLoader {
    /// Fails if the variable sets none of `value`, `jmesPath`, or `default`.
    pub fn new(name: impl ToString, variable: Variable, engine: Arc<dyn QueryEngine>) -> Result<Self> {
        if variable.is_empty() {
            bail!("variable must set at least one of value, jmesPath, or default");
        }
        Ok(Self {
            name: name.to_string(),
            variable,
            engine,
        })
    }
}

#[async_trait::async_trait]
impl Loader for VariableLoader {
    async fn load_data(&self, context: &JsonContext) -> Result<()> {
        let engine = &*self.engine;
        let value = match self.variable.value.as_ref() {
            Some(value) => Some(substitute(context, engine, value).await?),
            None => None,
        };

        let value = match self.variable.query.as_deref() {
            None => value,
            Some(query) => {
                let query = substitute_str(context, engine, query).await?;
                match value {
                    Some(value) => engine.search(&query, &value)?,
                    None => context.query(engine, &query).await?,
                }
            }
        };

        let value = match value.filter(|v| !v.is_null()) {
            Some(value) => value,
            None => {
                let default = self
                    .variable
                    .default
                    .as_ref()
                    .ok_or_else(|| anyhow!("variable {} is not defined", self.name))?;
                substitute(context, engine, default).await?
            }
        };

        context.add_entry(&self.name, value);
        Ok(())
    }
}
