use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Requests metadata about an OCI image.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageRegistry {
    /// An image reference, e.g. `ghcr.io/org/app:v1` or `nginx@sha256:...`.
    pub reference: String,

    /// Selects the fields of the image data that are stored.
    /// Written in the query engine's dialect; see [`Variable::query`](super::Variable::query).
    #[serde(
        default,
        rename = "jmesPath",
        skip_serializing_if = "Option::is_none"
    )]
    pub query: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_registry_credentials: Option<ImageRegistryCredentials>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageRegistryCredentials {
    #[serde(default)]
    pub allow_insecure_registry: bool,

    /// Names of image pull secrets a registry client may use.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
}
