//! Evaluation context for policy rules.
//!
//! A rule's context is a named store of JSON values consulted by expressions while the rule is
//! evaluated. Values are either added directly (e.g. by initializers seeding request metadata) or
//! produced by a [`DeferredLoader`], which runs a single entry [`Loader`] at most once:
//!
//! ```text
//! [ ContextEntry ] -> [ Loader ] -> [ DeferredLoader ] -> [ JsonContext ] <- query(expr)
//! ```
//!
//! A deferred loader that has been registered on a [`JsonContext`] runs the first time something
//! reads its name, either directly via [`JsonContext::get`] or through an expression passed to
//! [`JsonContext::query`]. Its outcome, success or failure, is memoized so that the underlying
//! fetch is never repeated. Cancellation is the exception: a load interrupted by the call's
//! cancellation token leaves the entry pending.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod client;
mod context;
mod deferred;
pub mod query;
mod toggle;

#[cfg(test)]
mod tests;

pub use self::{
    context::{JsonContext, QueryError, WeakContext},
    deferred::{DeferredLoader, LoadError, Loader},
    query::{JsonPathEngine, QueryEngine, SearchError},
    toggle::{CallContext, Toggles},
};
pub use tokio_util::sync::CancellationToken;
