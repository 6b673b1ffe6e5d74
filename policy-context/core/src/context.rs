use crate::{DeferredLoader, LoadError, QueryEngine, SearchError};
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{Map, Value};
use std::{
    fmt,
    sync::{Arc, Weak},
};
use thiserror::Error;
use tracing::trace;

/// A rule's evaluation context.
///
/// Cloning a `JsonContext` produces another handle to the same store.
#[derive(Clone, Default)]
pub struct JsonContext(Arc<RwLock<Inner>>);

/// A handle that does not keep the context alive.
#[derive(Clone, Debug, Default)]
pub struct WeakContext(Weak<RwLock<Inner>>);

#[derive(Default)]
struct Inner {
    /// Realized values, in insertion order.
    values: Map<String, Value>,

    /// Loaders that have not yet produced a value, in registration order.
    deferred: Vec<Arc<DeferredLoader>>,
}

#[derive(Clone, Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

// === impl JsonContext ===

impl JsonContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakContext {
        WeakContext(Arc::downgrade(&self.0))
    }

    /// Adds a realized value, replacing any existing value with the same name.
    pub fn add_entry(&self, name: impl Into<String>, value: Value) {
        let name = name.into();
        trace!(%name, "Adding context entry");
        self.0.write().values.insert(name, value);
    }

    /// Registers a loader to run the first time its name is read.
    ///
    /// A realized value with the same name is shadowed by the loader.
    pub fn add_deferred_loader(&self, loader: Arc<DeferredLoader>) {
        let mut inner = self.0.write();
        inner.values.shift_remove(loader.name());
        inner.deferred.retain(|l| l.name() != loader.name());
        trace!(name = %loader.name(), "Adding deferred loader");
        inner.deferred.push(loader);
    }

    /// Indicates whether a realized value exists for `name`. Never triggers a load.
    pub fn contains(&self, name: &str) -> bool {
        self.0.read().values.contains_key(name)
    }

    /// Indicates whether `name` is backed by a loader that has not yet succeeded.
    pub fn is_deferred(&self, name: &str) -> bool {
        self.0.read().deferred.iter().any(|l| l.name() == name)
    }

    pub fn deferred_names(&self) -> Vec<String> {
        self.0
            .read()
            .deferred
            .iter()
            .map(|l| l.name().to_string())
            .collect()
    }

    /// Reads a value, running its deferred loader first if necessary.
    pub async fn get(&self, name: &str) -> Result<Option<Value>, LoadError> {
        let loader = self.deferred(name);
        if let Some(loader) = loader {
            loader.load_data().await?;
        }
        Ok(self.0.read().values.get(name).cloned())
    }

    /// Runs the deferred loaders for every name `expr` refers to.
    pub async fn load_references(&self, expr: &str) -> Result<(), LoadError> {
        let loaders = self
            .0
            .read()
            .deferred
            .iter()
            .filter(|l| references(expr, l.name()))
            .cloned()
            .collect::<Vec<_>>();
        for loader in loaders {
            loader.load_data().await?;
        }
        Ok(())
    }

    /// Evaluates an expression over the context.
    ///
    /// Returns `None` when the expression selects nothing.
    pub async fn query(
        &self,
        engine: &dyn QueryEngine,
        expr: &str,
    ) -> Result<Option<Value>, QueryError> {
        self.load_references(expr).await?;
        let snapshot = self.snapshot();
        Ok(engine.search(expr, &snapshot)?)
    }

    /// Runs all pending loaders and returns the realized values.
    pub async fn load_all(&self) -> Result<Value, LoadError> {
        let loaders = self.0.read().deferred.clone();
        for loader in loaders {
            loader.load_data().await?;
        }
        Ok(self.snapshot())
    }

    /// Copies the realized values. Pending loaders are not run.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.0.read().values.clone())
    }

    fn deferred(&self, name: &str) -> Option<Arc<DeferredLoader>> {
        self.0
            .read()
            .deferred
            .iter()
            .find(|l| l.name() == name)
            .cloned()
    }

    /// Drops a loader once it has stored its value.
    pub(crate) fn resolved(&self, name: &str) {
        self.0.write().deferred.retain(|l| l.name() != name);
    }
}

impl fmt::Debug for JsonContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.read();
        f.debug_struct("JsonContext")
            .field("values", &inner.values)
            .field("deferred", &inner.deferred)
            .finish()
    }
}

// === impl WeakContext ===

impl WeakContext {
    pub fn upgrade(&self) -> Option<JsonContext> {
        self.0.upgrade().map(JsonContext)
    }
}

/// Tests whether `name` occurs in `expr` as a top-level identifier.
///
/// A name that follows a `.` is a nested field, unless the `.` belongs to the `$.` root.
fn references(expr: &str, name: &str) -> bool {
    if !expr.contains(name) {
        return false;
    }
    // If the pattern can't be built, err on the side of loading.
    Regex::new(&format!(r"(^|\$\.|[^.\w]){}([^\w]|$)", regex::escape(name)))
        .map(|re| re.is_match(expr))
        .unwrap_or(true)
}
