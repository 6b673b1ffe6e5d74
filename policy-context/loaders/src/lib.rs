//! Loads a policy rule's context entries.
//!
//! A [`DefaultContextLoaderFactory`] builds a [`ContextLoader`] per policy rule. Loading a rule's
//! entries first runs the factory's initializers and then turns each entry into one of the entry
//! loaders (see [`loaders`]). Depending on the call's toggles, loaders are either run immediately
//! or registered on the context and run the first time their value is read.
//!
//! Entry fields may refer to other context values with `{{ expr }}` placeholders, which are
//! substituted when the entry is loaded.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod factory;
pub mod k8s;
pub mod loaders;
mod variables;


pub use self::factory::{
    Clients, ContextLoader, DefaultContextLoaderFactory, Error, Initializer,
};
