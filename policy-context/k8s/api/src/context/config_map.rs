use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// References a ConfigMap by name.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapReference {
    pub name: String,

    /// Defaults to the `default` namespace when unset or empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ConfigMapReference {
    pub const DEFAULT_NAMESPACE: &'static str = "default";
}
