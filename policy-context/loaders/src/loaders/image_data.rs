use crate::variables::{has_placeholders, substitute_str};
use anyhow::{anyhow, Context, Result};
use policy_context_core::{JsonContext, Loader, QueryEngine};
use policy_context_k8s_api::context::ImageRegistry;
use policy_context_registry::{ImageReference, ImageVerifyCache, RegistryClientFactory};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Stores an image's manifest and config.
pub struct ImageDataLoader {
    name: String,
    image: ImageRegistry,

    /// Set when the reference is fixed and could be parsed up front.
    parsed: Option<ImageReference>,

    factory: Arc<dyn RegistryClientFactory>,
    verify_cache: Option<Arc<dyn ImageVerifyCache>>,
    engine: Arc<dyn QueryEngine>,
}

impl ImageDataLoader {
    /// Fails if the reference has no placeholders and can't be parsed.
    pub fn new(
        name: impl ToString,
        image: ImageRegistry,
        factory: Arc<dyn RegistryClientFactory>,
        verify_cache: Option<Arc<dyn ImageVerifyCache>>,
        engine: Arc<dyn QueryEngine>,
    ) -> Result<Self> {
        let parsed = if has_placeholders(&image.reference) {
            None
        } else {
            let parsed = image.reference.parse::<ImageReference>()?;
            Some(parsed)
        };
        Ok(Self {
            name: name.to_string(),
            image,
            parsed,
            factory,
            verify_cache,
            engine,
        })
    }

    async fn fetch(&self, context: &JsonContext) -> Result<Value> {
        let (image, reference) = match self.parsed.as_ref() {
            Some(r) => (self.image.reference.clone(), r.clone()),
            None => {
                let image = substitute_str(context, &*self.engine, &self.image.reference).await?;
                let reference = image.parse::<ImageReference>()?;
                (image, reference)
            }
        };

        let client = self.factory.client(
            &reference,
            self.image.image_registry_credentials.as_ref(),
            self.verify_cache.as_deref(),
        )?;

        debug!(%reference, "Fetching image manifest");
        let fetched = client
            .manifest(&reference)
            .await
            .with_context(|| format!("failed to fetch manifest for {reference}"))?;
        let config_digest = fetched
            .manifest
            .pointer("/config/digest")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("manifest for {reference} has no config digest"))?;
        let config = client
            .blob(&reference, config_digest)
            .await
            .with_context(|| format!("failed to fetch config {config_digest} for {reference}"))?;

        let mut data = json!({
            "image": image,
            "resolvedImage": reference.with_digest(&fetched.digest).to_string(),
            "registry": reference.registry(),
            "repository": reference.repository(),
            "identifier": reference.identifier(),
        });
        if let Some(index) = fetched.index {
            data["manifestList"] = index;
        }
        data["manifest"] = fetched.manifest;
        data["configData"] = config;
        Ok(data)
    }
}

#[async_trait::async_trait]
impl Loader for ImageDataLoader {
    async fn load_data(&self, context: &JsonContext) -> Result<()> {
        let data = self.fetch(context).await?;
        let value = match self.image.query.as_deref() {
            None => data,
            Some(query) => {
                let query = substitute_str(context, &*self.engine, query).await?;
                self.engine
                    .search(&query, &data)?
                    .ok_or_else(|| anyhow!("{query} selects nothing in the image data"))?
            }
        };
        context.add_entry(&self.name, value);
        Ok(())
    }
}
