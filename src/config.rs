//! Configuration management.
//!
//! Loads settings from environment variables and .env file.

use std::time::Duration;

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Settings {
    // Endpoints
    pub socket_url: String,
    pub api_url: String,
    pub auth_token: Option<String>,

    // Room
    pub display_name: String,
    pub match_id: Option<String>,
    pub max_messages: Option<usize>,

    // Reconnection
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,

    // REST client
    pub http_timeout_secs: u64,
    pub http_max_retries: u32,
    pub http_rate_limit: u32,

    // Logging
    pub log_level: String,
    pub log_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            socket_url: "ws://localhost:5000/ws".to_string(),
            api_url: "http://localhost:5000/api".to_string(),
            auth_token: None,
            display_name: "anonymous".to_string(),
            match_id: None,
            max_messages: None,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            http_timeout_secs: 10,
            http_max_retries: 3,
            http_rate_limit: 10,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Settings {
    /// Load settings from environment variables (and .env file).
    pub fn from_env() -> Self {
        // Try to load .env file (ignore if not found).
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Missing or unparseable
    /// values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let env = Env(&lookup);

        Self {
            socket_url: env.str("CHAT_SOCKET_URL", &d.socket_url),
            api_url: env.str("CHAT_API_URL", &d.api_url),
            auth_token: env.opt_str("CHAT_AUTH_TOKEN"),

            display_name: env.str("CHAT_DISPLAY_NAME", &d.display_name),
            match_id: env.opt_str("CHAT_MATCH_ID"),
            max_messages: env.parsed::<usize>("CHAT_MAX_MESSAGES").filter(|n| *n > 0),

            reconnect_attempts: env.parsed("CHAT_RECONNECT_ATTEMPTS").unwrap_or(d.reconnect_attempts),
            reconnect_delay_ms: env.parsed("CHAT_RECONNECT_DELAY_MS").unwrap_or(d.reconnect_delay_ms),

            http_timeout_secs: env.parsed("CHAT_HTTP_TIMEOUT_SECS").unwrap_or(d.http_timeout_secs),
            http_max_retries: env.parsed("CHAT_HTTP_MAX_RETRIES").unwrap_or(d.http_max_retries),
            http_rate_limit: env.parsed("CHAT_HTTP_RATE_LIMIT").unwrap_or(d.http_rate_limit),

            log_level: env.str("LOG_LEVEL", &d.log_level),
            log_json: env.bool("LOG_JSON", d.log_json),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Validate configuration for critical requirements.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !has_scheme(&self.socket_url, &["ws://", "wss://"]) {
            errors.push(format!(
                "CHAT_SOCKET_URL must start with ws:// or wss:// (got {})",
                self.socket_url
            ));
        }
        if !has_scheme(&self.api_url, &["http://", "https://"]) {
            errors.push(format!(
                "CHAT_API_URL must start with http:// or https:// (got {})",
                self.api_url
            ));
        }
        if self.display_name.trim().is_empty() {
            errors.push("CHAT_DISPLAY_NAME must not be blank".to_string());
        }
        if self.http_max_retries == 0 {
            errors.push("CHAT_HTTP_MAX_RETRIES must be at least 1".to_string());
        }
        if self.http_rate_limit == 0 {
            errors.push("CHAT_HTTP_RATE_LIMIT must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn has_scheme(url: &str, schemes: &[&str]) -> bool {
    let lower = url.to_ascii_lowercase();
    schemes
        .iter()
        .any(|s| lower.starts_with(s) && lower.len() > s.len())
}

// =============================================================================
// Environment helpers
// =============================================================================

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn str(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_string())
    }

    /// Unset and blank both mean "not configured".
    fn opt_str(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        (self.0)(key)
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(default)
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        (self.0)(key).and_then(|v| v.trim().parse().ok())
    }
}
