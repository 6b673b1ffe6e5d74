//! Docker credential helpers (`docker-credential-<name>`).

use crate::AuthConfig;
use serde::Deserialize;
use std::{
    ffi::OsStr,
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use thiserror::Error;
use tracing::{debug, trace};

/// The username helpers report when the secret is an identity token.
const TOKEN_USERNAME: &str = "<token>";

/// Printed by helpers that hold no credentials for a server.
const NOT_FOUND: &str = "credentials not found in native keychain";

/// A credential helper found on the search path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CredentialHelper {
    program: PathBuf,
}

#[derive(Debug, Error)]
pub enum CredentialHelperError {
    #[error("failed to run {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} failed: {message}", program.display())]
    Failed { program: PathBuf, message: String },

    #[error("{} returned invalid credentials: {source}", program.display())]
    Reply {
        program: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
struct Reply {
    #[serde(default, rename = "Username")]
    username: String,
    #[serde(default, rename = "Secret")]
    secret: String,
}

// === impl CredentialHelper ===

impl CredentialHelper {
    /// Finds `docker-credential-<name>` in the `search_path` directories.
    pub(crate) fn find(name: &str, search_path: &OsStr) -> Option<Self> {
        let binary = format!("docker-credential-{name}");
        match which::which_in(&binary, Some(search_path), Path::new(".")) {
            Ok(program) => Some(Self { program }),
            Err(error) => {
                debug!(%binary, %error, "Credential helper not found");
                None
            }
        }
    }

    /// Runs `<helper> get` for `server`.
    ///
    /// Returns `None` when the helper holds no credentials for the server.
    pub(crate) fn get(&self, server: &str) -> Result<Option<AuthConfig>, CredentialHelperError> {
        let spawn = |source| CredentialHelperError::Spawn {
            program: self.program.clone(),
            source,
        };

        trace!(program = %self.program.display(), %server, "Running credential helper");
        let mut child = Command::new(&self.program)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn)?;
        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(server.as_bytes()) {
                // The helper may exit without reading its input.
                Err(error) if error.kind() != io::ErrorKind::BrokenPipe => {
                    return Err(spawn(error));
                }
                _ => {}
            }
        }
        let output = child.wait_with_output().map_err(spawn)?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let message = match stdout.trim() {
                "" => String::from_utf8_lossy(&output.stderr).trim().to_string(),
                out => out.to_string(),
            };
            if message.contains(NOT_FOUND) {
                return Ok(None);
            }
            return Err(CredentialHelperError::Failed {
                program: self.program.clone(),
                message,
            });
        }

        let Reply { username, secret } =
            serde_json::from_slice(&output.stdout).map_err(|source| {
                CredentialHelperError::Reply {
                    program: self.program.clone(),
                    source,
                }
            })?;
        Ok(into_config(username, secret))
    }
}

fn into_config(username: String, secret: String) -> Option<AuthConfig> {
    if secret.is_empty() {
        return None;
    }
    if username == TOKEN_USERNAME {
        return Some(AuthConfig {
            identity_token: Some(secret),
            ..AuthConfig::default()
        });
    }
    Some(AuthConfig::basic(username, secret))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_replies() {
        assert_eq!(
            into_config("<token>".to_string(), "idt".to_string()),
            Some(AuthConfig {
                identity_token: Some("idt".to_string()),
                ..AuthConfig::default()
            })
        );
        assert_eq!(
            into_config("user".to_string(), "pass".to_string()),
            Some(AuthConfig::basic("user", "pass"))
        );
        assert_eq!(into_config("user".to_string(), String::new()), None);
    }

    #[test]
    fn missing_helper() {
        let empty = tempfile::tempdir().unwrap();
        assert_eq!(
            CredentialHelper::find("desktop", empty.path().as_os_str()),
            None
        );
    }
}
