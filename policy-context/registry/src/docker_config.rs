//! Docker-style credential files (`config.json`, `containers/auth.json`).

use crate::AuthConfig;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use std::collections::BTreeMap;

/// The key docker uses for the default registry.
pub(crate) const DEFAULT_AUTH_KEY: &str = "https://index.docker.io/v1/";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ConfigFile {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,

    /// The credential helper used for every registry without its own helper.
    #[serde(default, rename = "credsStore")]
    creds_store: Option<String>,

    /// Credential helpers by registry.
    #[serde(default, rename = "credHelpers")]
    cred_helpers: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    auth: Option<String>,
    #[serde(default, rename = "identitytoken")]
    identity_token: Option<String>,
    #[serde(default, rename = "registrytoken")]
    registry_token: Option<String>,
    // `serveraddress` is often stale and is never carried over.
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
/// A credential entry whose `auth` blob cannot be decoded.
#[error("invalid auth for {key}: {reason}")]
pub struct InvalidAuth {
    pub key: String,
    pub reason: &'static str,
}

// === impl ConfigFile ===

impl ConfigFile {
    pub(crate) fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Names the credential helper that holds credentials for `key`, if one is configured.
    pub(crate) fn credential_helper(&self, key: &str) -> Option<&str> {
        self.cred_helpers
            .get(key)
            .or_else(|| {
                self.cred_helpers
                    .iter()
                    .find(|(stored, _)| to_hostname(stored) == key)
                    .map(|(_, helper)| helper)
            })
            .or(self.creds_store.as_ref())
            .map(String::as_str)
            .filter(|helper| !helper.is_empty())
    }

    /// Finds credentials stored under `key`.
    ///
    /// Stored keys are also matched by hostname, so `index.docker.io` finds an entry stored under
    /// `https://index.docker.io/v1/`.
    pub(crate) fn auth_config(&self, key: &str) -> Result<Option<AuthConfig>, InvalidAuth> {
        let found = self.auths.get_key_value(key).or_else(|| {
            self.auths
                .iter()
                .find(|(stored, _)| to_hostname(stored) == key)
        });
        let Some((stored, entry)) = found else {
            return Ok(None);
        };

        let config = entry.clone().into_config(stored)?;
        if config.is_empty() {
            return Ok(None);
        }
        Ok(Some(config))
    }
}

// === impl AuthEntry ===

impl AuthEntry {
    fn into_config(self, key: &str) -> Result<AuthConfig, InvalidAuth> {
        let AuthEntry {
            mut username,
            mut password,
            auth,
            identity_token,
            registry_token,
        } = self;

        let auth = auth.filter(|a| !a.is_empty());
        if let Some(blob) = auth.as_deref() {
            if username.is_none() && password.is_none() {
                let (user, pass) = decode_auth(blob).map_err(|reason| InvalidAuth {
                    key: key.to_string(),
                    reason,
                })?;
                username = Some(user);
                password = Some(pass);
            }
        }

        Ok(AuthConfig {
            username: username.filter(|v| !v.is_empty()),
            password: password.filter(|v| !v.is_empty()),
            auth,
            identity_token: identity_token.filter(|v| !v.is_empty()),
            registry_token: registry_token.filter(|v| !v.is_empty()),
        })
    }
}

fn decode_auth(blob: &str) -> Result<(String, String), &'static str> {
    let decoded = STANDARD
        .decode(blob.trim())
        .map_err(|_| "auth is not valid base64")?;
    let decoded = String::from_utf8(decoded).map_err(|_| "auth is not valid UTF-8")?;
    let (user, pass) = decoded
        .split_once(':')
        .ok_or("auth must be formatted as username:password")?;
    Ok((user.to_string(), pass.trim_end_matches('\0').to_string()))
}

/// Strips a credential key down to its hostname, e.g. `https://index.docker.io/v1/` to
/// `index.docker.io`.
fn to_hostname(key: &str) -> &str {
    let key = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    key.split('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ConfigFile {
        ConfigFile::parse(json.as_bytes()).expect("config must parse")
    }

    #[test]
    fn exact_key() {
        let cf = parse(
            r#"{"auths": {"docker.io": {"username": "u", "password": "p", "serveraddress": "old"}}}"#,
        );
        assert_eq!(
            cf.auth_config("docker.io"),
            Ok(Some(AuthConfig::basic("u", "p")))
        );
        assert_eq!(cf.auth_config("quay.io"), Ok(None));
    }

    #[test]
    fn hostname_key() {
        let cf = parse(r#"{"auths": {"https://index.docker.io/v1/": {"registrytoken": "t"}}}"#);
        let config = cf
            .auth_config("index.docker.io")
            .unwrap()
            .expect("entry must be found by hostname");
        assert_eq!(config.registry_token.as_deref(), Some("t"));
    }

    #[test]
    fn decodes_auth_blob() {
        // base64("user:secret")
        let cf = parse(r#"{"auths": {"docker.io": {"auth": "dXNlcjpzZWNyZXQ="}}}"#);
        let config = cf.auth_config("docker.io").unwrap().unwrap();
        assert_eq!(config.username.as_deref(), Some("user"));
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.auth.as_deref(), Some("dXNlcjpzZWNyZXQ="));
    }

    #[test]
    fn invalid_auth_blob() {
        let cf = parse(r#"{"auths": {"docker.io": {"auth": "not base64!"}}}"#);
        assert_eq!(
            cf.auth_config("docker.io"),
            Err(InvalidAuth {
                key: "docker.io".to_string(),
                reason: "auth is not valid base64",
            })
        );
    }

    #[test]
    fn empty_entry_is_absent() {
        let cf = parse(r#"{"auths": {"docker.io": {}}, "credsStore": "desktop"}"#);
        assert_eq!(cf.auth_config("docker.io"), Ok(None));
    }

    #[test]
    fn credential_helpers() {
        let cf = parse(
            r#"{"credsStore": "desktop", "credHelpers": {"https://index.docker.io/v1/": "pass", "quay.io": ""}}"#,
        );
        assert_eq!(cf.credential_helper("index.docker.io"), Some("pass"));
        assert_eq!(cf.credential_helper("docker.io"), Some("desktop"));
        assert_eq!(cf.credential_helper("quay.io"), None);

        let cf = parse(r#"{"auths": {"docker.io": {"username": "u", "password": "p"}}}"#);
        assert_eq!(cf.credential_helper("docker.io"), None);
    }

    #[test]
    fn hostnames() {
        assert_eq!(to_hostname("https://index.docker.io/v1/"), "index.docker.io");
        assert_eq!(to_hostname("http://localhost:5000"), "localhost:5000");
        assert_eq!(to_hostname("ghcr.io"), "ghcr.io");
    }
}
