//! Model access configuration.
//!
//! Built explicitly and handed to the clients that need it. Binaries load a
//! `.env` file first and then call [`ModelConfig::from_env`].

use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Upper bound on a single model call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);
/// Total attempts, including the first one.
pub const MAX_RETRIES: u32 = 2;
/// Backoff unit. Attempt `n` waits `n * RETRY_DELAY_BASE` before the next one.
pub const RETRY_DELAY_BASE: Duration = Duration::from_secs(1);
/// Low temperature keeps multi-step decomposition stable.
pub const RESOLVE_TEMPERATURE: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// `None` when no credential was found. Heuristics still work without one.
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay_base: Duration,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: REQUEST_TIMEOUT,
            max_attempts: MAX_RETRIES,
            retry_delay_base: RETRY_DELAY_BASE,
            temperature: RESOLVE_TEMPERATURE,
        }
    }
}

impl ModelConfig {
    /// Read configuration from the process environment.
    ///
    /// Key: `OPENAI_API_KEY`, falling back to `API_KEY`.
    /// Optional: `POM_PILOT_API_URL`, `POM_PILOT_MODEL`.
    pub fn from_env() -> Self {
        let api_key = non_empty_var("OPENAI_API_KEY").or_else(|| non_empty_var("API_KEY"));
        let mut config = Self::default().with_api_key(api_key);
        if let Some(url) = non_empty_var("POM_PILOT_API_URL") {
            config.api_url = url;
        }
        if let Some(model) = non_empty_var("POM_PILOT_MODEL") {
            config.model = model;
        }
        config
    }

    /// Blank keys count as missing.
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
