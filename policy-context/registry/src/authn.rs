use base64::{engine::general_purpose::STANDARD, Engine};
use std::fmt;

/// Credentials for a registry. Any subset of the fields may be set.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,

    /// An opaque, base64-encoded `username:password` blob.
    pub auth: Option<String>,

    /// A refresh token exchanged for registry access tokens.
    pub identity_token: Option<String>,

    /// A bearer token sent to the registry as-is.
    pub registry_token: Option<String>,
}

/// Authenticates requests to a registry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Authenticator {
    #[default]
    Anonymous,
    Config(AuthConfig),
}

// === impl AuthConfig ===

impl AuthConfig {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(v: &Option<String>) -> Option<&'static str> {
            v.as_ref().map(|_| "<redacted>")
        }

        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("auth", &redact(&self.auth))
            .field("identity_token", &redact(&self.identity_token))
            .field("registry_token", &redact(&self.registry_token))
            .finish()
    }
}

// === impl Authenticator ===

impl Authenticator {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    pub fn config(&self) -> Option<&AuthConfig> {
        match self {
            Self::Anonymous => None,
            Self::Config(config) => Some(config),
        }
    }

    /// The OAuth2 refresh token to exchange at the registry's token service, if any.
    pub fn identity_token(&self) -> Option<&str> {
        self.config()?.identity_token.as_deref()
    }

    /// Returns an `Authorization` header value, if the credentials can be sent directly.
    ///
    /// Identity tokens must first be exchanged for an access token, so they produce no header;
    /// see [`Authenticator::identity_token`].
    pub fn authorization(&self) -> Option<String> {
        let config = self.config()?;
        if let Some(token) = config.registry_token.as_deref() {
            return Some(format!("Bearer {token}"));
        }
        if let (Some(user), Some(pass)) = (config.username.as_deref(), config.password.as_deref())
        {
            return Some(format!("Basic {}", STANDARD.encode(format!("{user}:{pass}"))));
        }
        config.auth.as_deref().map(|auth| format!("Basic {auth}"))
    }
}

impl From<AuthConfig> for Authenticator {
    fn from(config: AuthConfig) -> Self {
        if config.is_empty() {
            return Self::Anonymous;
        }
        Self::Config(config)
    }
}
