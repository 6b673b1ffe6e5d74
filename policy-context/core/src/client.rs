//! Collaborators that fetch context data from a cluster.

use anyhow::Result;
use policy_context_k8s_api::{context::Method, ConfigMap};
use serde_json::Value;

/// Looks up ConfigMaps.
#[async_trait::async_trait]
pub trait ConfigMapResolver: Send + Sync {
    /// Fails if the ConfigMap does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<ConfigMap>;
}

/// Issues API calls, returning the raw response body.
///
/// Implementations must fail on transport errors and on non-success responses.
#[async_trait::async_trait]
pub trait RawClient: Send + Sync {
    async fn call(&self, request: &ApiRequest) -> Result<Vec<u8>>;
}

/// A fully substituted API call.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub target: CallTarget,
    pub body: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallTarget {
    /// A path on the cluster's API server.
    Cluster { path: String },

    Service {
        url: String,
        ca_bundle: Option<String>,
        headers: Vec<(String, String)>,
    },
}

impl std::fmt::Display for CallTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cluster { path } => path.fmt(f),
            Self::Service { url, .. } => url.fmt(f),
        }
    }
}
