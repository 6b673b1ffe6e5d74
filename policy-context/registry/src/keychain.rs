use crate::{
    credential_helper::{CredentialHelper, CredentialHelperError},
    docker_config::{ConfigFile, InvalidAuth, DEFAULT_AUTH_KEY},
    AuthConfig, Authenticator, DEFAULT_REGISTRY,
};
use std::{
    ffi::OsStr,
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

const GHCR_HOSTNAME: &str = "ghcr.io";
const DEFAULT_HOSTNAME_ALIAS: &str = "index.docker.io";

/// Resolves a registry to the credentials used to access it.
///
/// Resolution may read credential files and run credential helpers, blocking the caller.
pub trait Keychain: Send + Sync {
    fn resolve(&self, resource: &str) -> Result<Authenticator, KeychainError>;
}

/// Reads environment variables.
pub trait Environment: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;

    /// The current user's home directory.
    fn home_dir(&self) -> Option<PathBuf> {
        self.var("HOME")
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
    }
}

/// Reads the process's environment.
#[derive(Copy, Clone, Debug, Default)]
pub struct ProcessEnv(());

/// The default [`Keychain`].
///
/// The keychain holds no state between resolutions and may be shared freely.
#[derive(Clone, Debug, Default)]
pub struct RegistryKeychain<E = ProcessEnv> {
    env: E,
}

#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("failed to read registry credentials from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse registry credentials in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse registry credentials in {}: {source}", path.display())]
    Auth {
        path: PathBuf,
        #[source]
        source: InvalidAuth,
    },

    #[error(transparent)]
    Helper(#[from] CredentialHelperError),
}

// === impl ProcessEnv ===

impl Environment for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    /// Falls back to the user database when `HOME` is unset.
    fn home_dir(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }
}

// === impl RegistryKeychain ===

impl RegistryKeychain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<E: Environment> RegistryKeychain<E> {
    pub const GITHUB_ACTOR_ENV: &'static str = "GITHUB_ACTOR";
    pub const GITHUB_TOKEN_ENV: &'static str = "GITHUB_TOKEN";
    pub const DOCKER_CONFIG_ENV: &'static str = "DOCKER_CONFIG";
    pub const XDG_RUNTIME_DIR_ENV: &'static str = "XDG_RUNTIME_DIR";
    pub const PATH_ENV: &'static str = "PATH";

    pub fn with_env(env: E) -> Self {
        Self { env }
    }

    fn var(&self, key: &str) -> Option<String> {
        self.env.var(key).filter(|v| !v.is_empty())
    }

    fn github(&self) -> Authenticator {
        let Some(token) = self.var(Self::GITHUB_TOKEN_ENV) else {
            debug!("No GitHub token");
            return Authenticator::Anonymous;
        };
        let username = self
            .var(Self::GITHUB_ACTOR_ENV)
            .unwrap_or_else(|| "unset".to_string());
        Authenticator::from(AuthConfig::basic(username, token))
    }

    fn docker(&self, host: &str) -> Result<Authenticator, KeychainError> {
        let Some((path, bytes)) = self.read_credentials()? else {
            info!("No registry credential file found");
            return Ok(Authenticator::Anonymous);
        };
        let cf = ConfigFile::parse(&bytes).map_err(|source| KeychainError::Parse {
            path: path.clone(),
            source,
        })?;

        for key in [host, DEFAULT_AUTH_KEY] {
            let mut config = match cf.credential_helper(key) {
                Some(helper) => self.helper_credentials(helper, key)?,
                None => None,
            };
            if config.is_none() {
                config = cf.auth_config(key).map_err(|source| KeychainError::Auth {
                    path: path.clone(),
                    source,
                })?;
            }
            if let Some(config) = config {
                debug!(%key, path = %path.display(), "Found registry credentials");
                return Ok(Authenticator::Config(config));
            }
        }

        debug!(path = %path.display(), "No registry credentials for host");
        Ok(Authenticator::Anonymous)
    }

    /// Asks a credential helper for `key`'s credentials.
    ///
    /// A helper that isn't installed holds no credentials.
    fn helper_credentials(
        &self,
        helper: &str,
        key: &str,
    ) -> Result<Option<AuthConfig>, KeychainError> {
        let Some(search_path) = self.var(Self::PATH_ENV) else {
            debug!(%helper, "No search path for credential helpers");
            return Ok(None);
        };
        let Some(helper) = CredentialHelper::find(helper, OsStr::new(&search_path)) else {
            return Ok(None);
        };
        Ok(helper.get(key)?)
    }

    /// Reads the first credential file that exists.
    fn read_credentials(&self) -> Result<Option<(PathBuf, Vec<u8>)>, KeychainError> {
        let candidates = [
            self.env
                .home_dir()
                .map(|home| home.join(".docker").join("config.json")),
            self.var(Self::DOCKER_CONFIG_ENV)
                .map(|dir| Path::new(&dir).join("config.json")),
            self.var(Self::XDG_RUNTIME_DIR_ENV)
                .map(|dir| Path::new(&dir).join("containers").join("auth.json")),
        ];

        for path in candidates.into_iter().flatten() {
            if !path.is_file() {
                continue;
            }
            return match std::fs::read(&path) {
                Ok(bytes) => Ok(Some((path, bytes))),
                // Raced with a removal.
                Err(error) if error.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => Err(KeychainError::Read { path, source }),
            };
        }
        Ok(None)
    }
}

impl<E: Environment> Keychain for RegistryKeychain<E> {
    fn resolve(&self, resource: &str) -> Result<Authenticator, KeychainError> {
        match hostname(resource).as_deref() {
            Some(GHCR_HOSTNAME) => Ok(self.github()),
            Some(host @ (DEFAULT_REGISTRY | DEFAULT_HOSTNAME_ALIAS)) => self.docker(host),
            _ => Ok(Authenticator::Anonymous),
        }
    }
}

/// Extracts the hostname from a registry or repository reference, e.g. `ghcr.io:443/org/app`.
fn hostname(resource: &str) -> Option<String> {
    let url = url::Url::parse(&format!("https://{}", resource.trim())).ok()?;
    url.host_str().map(str::to_ascii_lowercase)
}
