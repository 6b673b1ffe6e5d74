use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Runtime feature toggles.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Toggles {
    enable_deferred_loading: bool,
}

/// Per-call state threaded through context loading.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    token: CancellationToken,
    toggles: Toggles,
}

// === impl Toggles ===

impl Toggles {
    pub const ENABLE_DEFERRED_LOADING_ENV: &'static str = "FLAG_ENABLE_DEFERRED_LOADING";

    const ENABLE_DEFERRED_LOADING_DEFAULT: bool = true;

    /// Reads toggles from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            enable_deferred_loading: parse_flag(
                Self::ENABLE_DEFERRED_LOADING_ENV,
                lookup(Self::ENABLE_DEFERRED_LOADING_ENV),
                Self::ENABLE_DEFERRED_LOADING_DEFAULT,
            ),
        }
    }

    pub fn with_deferred_loading(mut self, enabled: bool) -> Self {
        self.enable_deferred_loading = enabled;
        self
    }

    pub fn enable_deferred_loading(&self) -> bool {
        self.enable_deferred_loading
    }
}

impl Default for Toggles {
    fn default() -> Self {
        Self {
            enable_deferred_loading: Self::ENABLE_DEFERRED_LOADING_DEFAULT,
        }
    }
}

fn parse_flag(name: &str, value: Option<String>, default: bool) -> bool {
    let Some(value) = value else {
        return default;
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "" => default,
        "1" | "true" => true,
        "0" | "false" => false,
        _ => {
            warn!(%name, %value, %default, "Invalid toggle value");
            default
        }
    }
}

// === impl CallContext ===

impl CallContext {
    pub fn new(token: CancellationToken, toggles: Toggles) -> Self {
        Self { token, toggles }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn toggles(&self) -> Toggles {
        self.toggles
    }
}
