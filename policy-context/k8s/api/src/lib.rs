#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod context;
mod rule;

pub use self::{
    context::{ContextEntry, InvalidEntry, Variant},
    rule::Rule,
};
pub use k8s_openapi::{
    api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
