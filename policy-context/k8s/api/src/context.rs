pub mod api_call;
pub mod config_map;
pub mod image_registry;
pub mod variable;

pub use self::{
    api_call::{ApiCall, Method, RequestData, ServiceCall},
    config_map::ConfigMapReference,
    image_registry::{ImageRegistry, ImageRegistryCredentials},
    variable::Variable,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Requests that a single named value be added to a rule's evaluation context.
///
/// Exactly one of the source fields must be set. The wire form keeps the sources as optional
/// fields so that policies round-trip unchanged; loaders only ever consume an entry through
/// [`ContextEntry::variant`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_call: Option<ApiCall>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_registry: Option<ImageRegistry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<Variable>,
}

/// The single source of a validated [`ContextEntry`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Variant<'e> {
    ConfigMap(&'e ConfigMapReference),
    ApiCall(&'e ApiCall),
    ImageRegistry(&'e ImageRegistry),
    Variable(&'e Variable),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvalidEntry {
    #[error("context entry at index {index} has an empty name")]
    EmptyName { index: usize },

    #[error("missing ConfigMap|APICall|ImageRegistry|Variable in context entry {name}")]
    MissingVariant { name: String },

    #[error("context entry {name} sets more than one source: {}", variants.join(", "))]
    MultipleVariants {
        name: String,
        variants: Vec<&'static str>,
    },
}

// === impl ContextEntry ===

impl ContextEntry {
    pub fn config_map(name: impl ToString, config_map: ConfigMapReference) -> Self {
        Self {
            name: name.to_string(),
            config_map: Some(config_map),
            ..Self::default()
        }
    }

    pub fn api_call(name: impl ToString, api_call: ApiCall) -> Self {
        Self {
            name: name.to_string(),
            api_call: Some(api_call),
            ..Self::default()
        }
    }

    pub fn image_registry(name: impl ToString, image_registry: ImageRegistry) -> Self {
        Self {
            name: name.to_string(),
            image_registry: Some(image_registry),
            ..Self::default()
        }
    }

    pub fn variable(name: impl ToString, variable: Variable) -> Self {
        Self {
            name: name.to_string(),
            variable: Some(variable),
            ..Self::default()
        }
    }

    /// Returns the entry's only source, failing when zero or several are set.
    pub fn variant(&self) -> Result<Variant<'_>, InvalidEntry> {
        let mut set = Vec::with_capacity(1);
        if let Some(cm) = self.config_map.as_ref() {
            set.push(("configMap", Variant::ConfigMap(cm)));
        }
        if let Some(call) = self.api_call.as_ref() {
            set.push(("apiCall", Variant::ApiCall(call)));
        }
        if let Some(image) = self.image_registry.as_ref() {
            set.push(("imageRegistry", Variant::ImageRegistry(image)));
        }
        if let Some(var) = self.variable.as_ref() {
            set.push(("variable", Variant::Variable(var)));
        }

        match set.len() {
            0 => Err(InvalidEntry::MissingVariant {
                name: self.name.clone(),
            }),
            1 => Ok(set.remove(0).1),
            _ => Err(InvalidEntry::MultipleVariants {
                name: self.name.clone(),
                variants: set.into_iter().map(|(kind, _)| kind).collect(),
            }),
        }
    }
}

// === impl Variant ===

impl Variant<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigMap(_) => "ConfigMap",
            Self::ApiCall(_) => "APICall",
            Self::ImageRegistry(_) => "ImageRegistry",
            Self::Variable(_) => "Variable",
        }
    }
}
