//! Collaborators backed by a Kubernetes API client.

use anyhow::{anyhow, bail, Context, Result};
use policy_context_core::client::{ApiRequest, CallTarget, ConfigMapResolver, RawClient};
use policy_context_k8s_api::ConfigMap;

/// Reads ConfigMaps from the API server.
#[derive(Clone)]
pub struct KubeConfigMapResolver {
    client: kube::Client,
}

/// Issues API calls against the cluster's API server.
///
/// Calls to other services are not supported.
#[derive(Clone)]
pub struct KubeRawClient {
    client: kube::Client,
}

// === impl KubeConfigMapResolver ===

impl KubeConfigMapResolver {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ConfigMapResolver for KubeConfigMapResolver {
    async fn get(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
        kube::Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await?
            .ok_or_else(|| anyhow!("ConfigMap {namespace}/{name} not found"))
    }
}

// === impl KubeRawClient ===

impl KubeRawClient {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl RawClient for KubeRawClient {
    async fn call(&self, request: &ApiRequest) -> Result<Vec<u8>> {
        let CallTarget::Cluster { path } = &request.target else {
            bail!("service calls are not supported by the Kubernetes client");
        };

        let mut builder = http::Request::builder()
            .method(request.method.to_string().as_str())
            .uri(path.as_str());
        let body = match request.body.as_ref() {
            Some(body) => {
                builder = builder.header(http::header::CONTENT_TYPE, "application/json");
                serde_json::to_vec(body)?
            }
            None => Vec::new(),
        };
        let req = builder.body(body).context("invalid API request")?;

        let text = self.client.request_text(req).await?;
        Ok(text.into_bytes())
    }
}
