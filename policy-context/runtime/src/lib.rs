#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use policy_context_core as core;
pub use policy_context_k8s_api as k8s;
pub use policy_context_loaders as loaders;
pub use policy_context_registry as registry;

mod args;

pub use self::args::Args;
