use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Describes a request whose JSON response is added to the context.
///
/// Either `url_path` (a path on the cluster's API server) or `service` (an arbitrary HTTP
/// endpoint) must be set.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,

    #[serde(default)]
    pub method: Method,

    /// Key/value pairs sent as a JSON object body with `POST` requests.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<RequestData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceCall>,

    /// An expression applied to the response before it is stored.
    /// Written in the query engine's dialect; see [`Variable::query`](super::Variable::query).
    #[serde(
        default,
        rename = "jmesPath",
        skip_serializing_if = "Option::is_none"
    )]
    pub query: Option<String>,

    /// Stored instead of the response when the call fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct RequestData {
    pub key: String,
    pub value: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCall {
    pub url: String,

    /// PEM-encoded CA bundle used to verify the service's certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<RequestData>,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => "GET".fmt(f),
            Self::Post => "POST".fmt(f),
        }
    }
}
