use crate::{JsonContext, WeakContext};
use std::{fmt, sync::Arc};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, Instrument};

/// Produces a single entry's value into a context.
///
/// Implementations must write at most one value, and only once they have succeeded.
#[async_trait::async_trait]
pub trait Loader: Send + Sync {
    async fn load_data(&self, context: &JsonContext) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl<L: Loader + ?Sized> Loader for Box<L> {
    async fn load_data(&self, context: &JsonContext) -> anyhow::Result<()> {
        (**self).load_data(context).await
    }
}

/// Runs a [`Loader`] at most once, memoizing its outcome.
///
/// Concurrent callers serialize on the loader: the first runs the underlying load and the rest
/// wait for, and then observe, its outcome. Once the load completes the inner loader is dropped.
pub struct DeferredLoader {
    name: String,
    context: WeakContext,
    token: CancellationToken,
    span: tracing::Span,
    state: Mutex<State>,
}

enum State {
    Pending(Box<dyn Loader>),
    Done(Result<(), LoadError>),
}

#[derive(Clone, Debug, Error)]
pub enum LoadError {
    #[error("loading context entry {name} was cancelled")]
    Cancelled { name: String },

    #[error("context entry {name} depends on its own value")]
    Cycle { name: String },

    #[error("context for entry {name} no longer exists")]
    ContextDropped { name: String },

    #[error("failed to load context entry {name}: {error:#}")]
    Failed {
        name: String,
        error: Arc<anyhow::Error>,
    },
}

tokio::task_local! {
    /// Names of the deferred loaders executing on the current task, outermost first.
    static LOADING: Vec<String>;
}

// === impl DeferredLoader ===

impl DeferredLoader {
    pub fn new(
        name: impl Into<String>,
        loader: impl Loader + 'static,
        context: &JsonContext,
        token: CancellationToken,
        span: tracing::Span,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            context: context.downgrade(),
            token,
            span,
            state: Mutex::new(State::Pending(Box::new(loader))),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Loads the entry's value, or returns the outcome of the prior load.
    pub async fn load_data(&self) -> Result<(), LoadError> {
        let mut loading = LOADING.try_with(Clone::clone).unwrap_or_default();
        if loading.iter().any(|n| *n == self.name) {
            return Err(LoadError::Cycle {
                name: self.name.clone(),
            });
        }
        loading.push(self.name.clone());

        LOADING
            .scope(loading, self.load_once())
            .instrument(self.span.clone())
            .await
    }

    async fn load_once(&self) -> Result<(), LoadError> {
        let mut state = self.state.lock().await;
        let loader = match &*state {
            State::Done(outcome) => {
                trace!("Already loaded");
                return outcome.clone();
            }
            State::Pending(loader) => loader,
        };

        if self.token.is_cancelled() {
            return Err(self.cancelled());
        }
        let context = self
            .context
            .upgrade()
            .ok_or_else(|| LoadError::ContextDropped {
                name: self.name.clone(),
            })?;

        debug!("Loading");
        let res = tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            res = loader.load_data(&context) => Some(res),
        };
        let outcome = match res {
            None => {
                debug!("Cancelled");
                return Err(self.cancelled());
            }
            // Nested loads observe the same token; report their cancellation as our own.
            Some(Err(_)) if self.token.is_cancelled() => return Err(self.cancelled()),
            Some(Ok(())) => Ok(()),
            Some(Err(error)) => {
                debug!(%error, "Failed");
                Err(LoadError::Failed {
                    name: self.name.clone(),
                    error: Arc::new(error),
                })
            }
        };

        *state = State::Done(outcome.clone());
        if outcome.is_ok() {
            context.resolved(&self.name);
        }
        outcome
    }

    fn cancelled(&self) -> LoadError {
        LoadError::Cancelled {
            name: self.name.clone(),
        }
    }
}

impl fmt::Debug for DeferredLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredLoader")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// === impl LoadError ===

impl LoadError {
    pub fn name(&self) -> &str {
        match self {
            Self::Cancelled { name }
            | Self::Cycle { name }
            | Self::ContextDropped { name }
            | Self::Failed { name, .. } => name,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
