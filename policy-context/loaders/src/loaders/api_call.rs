use crate::variables::{substitute, substitute_str};
use anyhow::{bail, Context, Result};
use policy_context_core::{
    client::{ApiRequest, CallTarget, RawClient},
    JsonContext, Loader, QueryEngine,
};
use policy_context_k8s_api::context::{ApiCall, Method};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Stores the JSON response of an API call.
pub struct ApiCallLoader {
    name: String,
    call: ApiCall,
    client: Arc<dyn RawClient>,
    engine: Arc<dyn QueryEngine>,
}

impl ApiCallLoader {
    /// Fails unless exactly one of `urlPath` or `service` is set.
    pub fn new(
        name: impl ToString,
        call: ApiCall,
        client: Arc<dyn RawClient>,
        engine: Arc<dyn QueryEngine>,
    ) -> Result<Self> {
        match (&call.url_path, &call.service) {
            (Some(_), Some(_)) => bail!("apiCall must not set both urlPath and service"),
            (None, None) => bail!("apiCall must set either urlPath or service"),
            _ => {}
        }
        Ok(Self {
            name: name.to_string(),
            call,
            client,
            engine,
        })
    }

    async fn fetch(&self, context: &JsonContext) -> Result<Value> {
        let request = self.request(context).await?;
        debug!(method = %request.method, target = %request.target, "Calling API");
        let body = self
            .client
            .call(&request)
            .await
            .with_context(|| format!("{} {} failed", request.method, request.target))?;
        let response = serde_json::from_slice::<Value>(&body)
            .with_context(|| format!("{} {} returned invalid JSON", request.method, request.target))?;

        let Some(query) = self.call.query.as_deref() else {
            return Ok(response);
        };
        let query = substitute_str(context, &*self.engine, query).await?;
        let value = self.engine.search(&query, &response)?;
        Ok(value.unwrap_or(Value::Null))
    }

    async fn request(&self, context: &JsonContext) -> Result<ApiRequest> {
        let engine = &*self.engine;
        let target = match (&self.call.url_path, &self.call.service) {
            (Some(path), _) => CallTarget::Cluster {
                path: substitute_str(context, engine, path).await?,
            },
            (None, Some(service)) => {
                let mut headers = Vec::with_capacity(service.headers.len());
                for header in &service.headers {
                    let value = match substitute(context, engine, &header.value).await? {
                        Value::String(s) => s,
                        v => v.to_string(),
                    };
                    headers.push((header.key.clone(), value));
                }
                CallTarget::Service {
                    url: substitute_str(context, engine, &service.url).await?,
                    ca_bundle: service.ca_bundle.clone(),
                    headers,
                }
            }
            (None, None) => bail!("apiCall must set either urlPath or service"),
        };

        let body = if self.call.method == Method::Post && !self.call.data.is_empty() {
            let mut body = Map::with_capacity(self.call.data.len());
            for data in &self.call.data {
                body.insert(
                    data.key.clone(),
                    substitute(context, engine, &data.value).await?,
                );
            }
            Some(Value::Object(body))
        } else {
            None
        };

        Ok(ApiRequest {
            method: self.call.method,
            target,
            body,
        })
    }
}

#[async_trait::async_trait]
impl Loader for ApiCallLoader {
    async fn load_data(&self, context: &JsonContext) -> Result<()> {
        let value = match self.fetch(context).await {
            Ok(value) => value,
            Err(error) => {
                let Some(default) = self.call.default.as_ref() else {
                    return Err(error);
                };
                if super::is_cancelled(&error) {
                    return Err(error);
                }
                debug!(error = %format_args!("{error:#}"), "Using default value");
                substitute(context, &*self.engine, default).await?
            }
        };
        context.add_entry(&self.name, value);
        Ok(())
    }
}
