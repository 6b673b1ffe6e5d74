use crate::ContextEntry;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The parts of a policy rule that drive context resolution.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,

    /// Entries are resolved in declaration order.
    #[serde(default)]
    pub context: Vec<ContextEntry>,
}
