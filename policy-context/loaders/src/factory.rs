use crate::loaders::{ApiCallLoader, ConfigMapLoader, ImageDataLoader, VariableLoader};
use policy_context_core::{
    client::{ConfigMapResolver, RawClient},
    CallContext, DeferredLoader, JsonContext, LoadError, Loader, QueryEngine,
};
use policy_context_k8s_api::{ContextEntry, InvalidEntry, Rule, Variant};
use policy_context_registry::{ImageVerifyCache, RegistryClientFactory};
use std::{collections::HashSet, fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, info_span};

/// Seeds a context before any of its entries are loaded.
pub type Initializer = Arc<dyn Fn(&JsonContext) -> anyhow::Result<()> + Send + Sync>;

/// Builds a [`ContextLoader`] for each policy rule.
#[derive(Clone)]
pub struct DefaultContextLoaderFactory {
    config_maps: Option<Arc<dyn ConfigMapResolver>>,
    initializers: Vec<Initializer>,
    span: tracing::Span,
}

/// Populates a rule's context from its entries.
#[derive(Clone)]
pub struct ContextLoader {
    config_maps: Option<Arc<dyn ConfigMapResolver>>,
    initializers: Arc<[Initializer]>,
    span: tracing::Span,
}

/// Per-call collaborators. Entries whose collaborator is absent are skipped.
#[derive(Clone, Default)]
pub struct Clients {
    pub raw: Option<Arc<dyn RawClient>>,
    pub registry: Option<Arc<dyn RegistryClientFactory>>,
    pub image_verify_cache: Option<Arc<dyn ImageVerifyCache>>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    InvalidEntry(#[from] InvalidEntry),

    #[error("duplicate context entry name {name}")]
    DuplicateName { name: String },

    #[error("failed to initialize context: {0:#}")]
    Initializer(anyhow::Error),

    #[error("failed to build {kind} loader for context entry {name}: {error:#}")]
    Construct {
        name: String,
        kind: &'static str,
        error: anyhow::Error,
    },

    #[error(transparent)]
    Load(#[from] LoadError),
}

// === impl DefaultContextLoaderFactory ===

impl DefaultContextLoaderFactory {
    pub fn new(config_maps: Option<Arc<dyn ConfigMapResolver>>) -> Self {
        Self {
            config_maps,
            initializers: Vec::new(),
            span: tracing::Span::current(),
        }
    }

    /// Adds an initializer. Initializers run in the order they're added.
    pub fn with_initializer(
        mut self,
        init: impl Fn(&JsonContext) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.initializers.push(Arc::new(init));
        self
    }

    /// Sets the parent span of every loader this factory builds.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn loader(&self, policy: &str, rule: &Rule) -> ContextLoader {
        ContextLoader {
            config_maps: self.config_maps.clone(),
            initializers: self.initializers.clone().into(),
            span: info_span!(parent: &self.span, "context", %policy, rule = %rule.name),
        }
    }
}

impl fmt::Debug for DefaultContextLoaderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultContextLoaderFactory")
            .field("config_maps", &self.config_maps.is_some())
            .field("initializers", &self.initializers.len())
            .finish()
    }
}

// === impl ContextLoader ===

impl ContextLoader {
    /// Populates `context` from `entries`.
    ///
    /// Initializers run first. Each entry is then either registered on the context as a deferred
    /// loader or loaded immediately, in declaration order, depending on the call's toggles.
    /// Entries are validated before anything is written, so an invalid entry leaves `context`
    /// untouched.
    pub async fn load(
        &self,
        cx: &CallContext,
        engine: &Arc<dyn QueryEngine>,
        clients: &Clients,
        entries: &[ContextEntry],
        context: &JsonContext,
    ) -> Result<(), Error> {
        let variants = validate(entries)?;

        self.span.in_scope(|| {
            self.initializers
                .iter()
                .try_for_each(|init| init(context).map_err(Error::Initializer))
        })?;

        let deferred = cx.toggles().enable_deferred_loading();
        for (entry, variant) in entries.iter().zip(variants) {
            let kind = variant.kind();
            let span = info_span!(parent: &self.span, "entry", name = %entry.name, %kind);

            let loader = self
                .build(entry, variant, engine, clients)
                .map_err(|error| Error::Construct {
                    name: entry.name.clone(),
                    kind,
                    error,
                })?;
            let Some(loader) = loader else {
                span.in_scope(|| info!("No client configured; skipping"));
                continue;
            };

            let loader =
                DeferredLoader::new(&entry.name, loader, context, cx.token().clone(), span.clone());
            if deferred {
                span.in_scope(|| debug!("Deferring load"));
                context.add_deferred_loader(loader);
            } else {
                loader.load_data().await?;
            }
        }

        Ok(())
    }

    /// Builds the entry's loader, or returns `None` when the collaborator it needs is absent.
    fn build(
        &self,
        entry: &ContextEntry,
        variant: Variant<'_>,
        engine: &Arc<dyn QueryEngine>,
        clients: &Clients,
    ) -> anyhow::Result<Option<Box<dyn Loader>>> {
        let engine = engine.clone();
        let name = &entry.name;
        let loader: Box<dyn Loader> = match variant {
            Variant::ConfigMap(cm) => {
                let Some(resolver) = self.config_maps.clone() else {
                    return Ok(None);
                };
                Box::new(ConfigMapLoader::new(name, cm.clone(), resolver, engine))
            }
            Variant::ApiCall(call) => {
                let Some(client) = clients.raw.clone() else {
                    return Ok(None);
                };
                Box::new(ApiCallLoader::new(name, call.clone(), client, engine)?)
            }
            Variant::ImageRegistry(image) => {
                let Some(factory) = clients.registry.clone() else {
                    return Ok(None);
                };
                Box::new(ImageDataLoader::new(
                    name,
                    image.clone(),
                    factory,
                    clients.image_verify_cache.clone(),
                    engine,
                )?)
            }
            Variant::Variable(var) => Box::new(VariableLoader::new(name, var.clone(), engine)?),
        };
        Ok(Some(loader))
    }
}

impl fmt::Debug for ContextLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextLoader")
            .field("config_maps", &self.config_maps.is_some())
            .field("initializers", &self.initializers.len())
            .finish()
    }
}

/// Checks that every entry has a unique, non-empty name and exactly one source.
fn validate(entries: &[ContextEntry]) -> Result<Vec<Variant<'_>>, Error> {
    let mut names = HashSet::with_capacity(entries.len());
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            if entry.name.is_empty() {
                return Err(InvalidEntry::EmptyName { index }.into());
            }
            let variant = entry.variant()?;
            if !names.insert(entry.name.as_str()) {
                return Err(Error::DuplicateName {
                    name: entry.name.clone(),
                });
            }
            Ok(variant)
        })
        .collect()
}
