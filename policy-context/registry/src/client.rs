use crate::{Authenticator, ImageReference, Keychain};
use anyhow::{Context, Result};
use policy_context_k8s_api::context::ImageRegistryCredentials;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Reports whether an image has already been verified.
///
/// Opaque to context loading; it is only handed through to registry clients.
pub trait ImageVerifyCache: Send + Sync {
    fn is_verified(&self, image: &str) -> bool;
}

/// Reads image metadata from a registry.
#[async_trait::async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetches the image's manifest, resolving an index to the platform manifest.
    async fn manifest(&self, image: &ImageReference) -> Result<FetchedManifest>;

    /// Fetches a JSON blob from the image's repository.
    async fn blob(&self, image: &ImageReference, digest: &str) -> Result<Value>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchedManifest {
    /// The digest of the resolved manifest.
    pub digest: String,
    pub manifest: Value,

    /// The manifest list or index the manifest was selected from, if any.
    pub index: Option<Value>,
}

/// Builds a registry client with the given credentials.
pub trait RegistryConnector: Send + Sync {
    fn connect(
        &self,
        auth: Authenticator,
        image: &ImageReference,
        allow_insecure: bool,
    ) -> Result<Arc<dyn RegistryClient>>;
}

/// Builds an authenticated registry client for an image.
pub trait RegistryClientFactory: Send + Sync {
    fn client(
        &self,
        image: &ImageReference,
        credentials: Option<&ImageRegistryCredentials>,
        verify_cache: Option<&dyn ImageVerifyCache>,
    ) -> Result<Arc<dyn RegistryClient>>;
}

/// A [`RegistryClientFactory`] that authenticates with credentials resolved by a [`Keychain`].
#[derive(Clone, Debug)]
pub struct KeychainClientFactory<K, C> {
    keychain: K,
    connector: C,
}

// === impl KeychainClientFactory ===

impl<K, C> KeychainClientFactory<K, C> {
    pub fn new(keychain: K, connector: C) -> Self {
        Self {
            keychain,
            connector,
        }
    }
}

impl<K: Keychain, C: RegistryConnector> RegistryClientFactory for KeychainClientFactory<K, C> {
    fn client(
        &self,
        image: &ImageReference,
        credentials: Option<&ImageRegistryCredentials>,
        verify_cache: Option<&dyn ImageVerifyCache>,
    ) -> Result<Arc<dyn RegistryClient>> {
        let auth = self
            .keychain
            .resolve(image.registry())
            .with_context(|| format!("failed to resolve credentials for {}", image.registry()))?;
        let allow_insecure = credentials.is_some_and(|c| c.allow_insecure_registry);
        debug!(
            registry = %image.registry(),
            anonymous = auth.is_anonymous(),
            allow_insecure,
            verified = verify_cache.is_some_and(|c| c.is_verified(&image.to_string())),
            "Connecting to registry",
        );
        self.connector.connect(auth, image, allow_insecure)
    }
}
