//! Image registry access for context loading.
//!
//! Registry clients are authenticated with credentials found by a [`Keychain`]. The default
//! [`RegistryKeychain`] resolves a registry host to an [`Authenticator`] by trying, in order:
//!
//! - `ghcr.io`: the CI-provided `GITHUB_ACTOR`/`GITHUB_TOKEN` pair;
//! - the default registry (`docker.io`): the local docker credential files, or the credential
//!   helper they name;
//! - anything else: anonymous access.
//!
//! [`HttpConnector`] speaks the OCI distribution API with the resolved credentials, exchanging
//! them for a bearer token when the registry asks for one.
//!
//! Resolution degrades to anonymous access whenever credentials are unavailable, so public images
//! remain readable. A credential file that exists but can't be parsed is an error.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod authn;
mod client;
mod credential_helper;
mod docker_config;
mod http;
mod keychain;
mod reference;

pub use self::{
    authn::{AuthConfig, Authenticator},
    client::{
        FetchedManifest, ImageVerifyCache, KeychainClientFactory, RegistryClient,
        RegistryClientFactory, RegistryConnector,
    },
    credential_helper::CredentialHelperError,
    docker_config::InvalidAuth,
    http::{HttpConnector, InvalidPlatform, Platform},
    keychain::{Environment, Keychain, KeychainError, ProcessEnv, RegistryKeychain},
    reference::{ImageReference, ReferenceError},
};

/// The registry used for references that don't name one.
pub const DEFAULT_REGISTRY: &str = "docker.io";
