//! Async REST client for the scores backend.
//!
//! Features:
//! - Optional bearer token (the stored session token)
//! - Rate limiting (configurable, default 10 req/sec)
//! - Automatic retries with exponential backoff
//! - Typed responses

use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::data::models::{MatchSummary, UserProfile};

use super::errors::ApiError;

/// Async REST client for the scores backend.
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    client: Client,
    rate_limiter: Arc<RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>>,
    max_retries: u32,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout_secs: u64,
        max_retries: u32,
        rate_limit: u32,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let quota = Quota::per_second(NonZeroU32::new(rate_limit).unwrap_or(NonZeroU32::MIN));
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            client,
            rate_limiter,
            max_retries: max_retries.max(1),
        })
    }

    /// Create with default settings.
    pub fn with_defaults(base_url: &str, token: Option<String>) -> Result<Self, ApiError> {
        Self::new(base_url, token, 10, 3, 10)
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Join a path onto the base URL, tolerating a missing leading slash.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    // =========================================================================
    // Core request method
    // =========================================================================

    async fn request(&self, method: reqwest::Method, path: &str) -> Result<serde_json::Value, ApiError> {
        let url = self.url(path);
        let mut last_error: Option<ApiError> = None;

        for attempt in 0..self.max_retries {
            self.rate_limiter.until_ready().await;

            debug!(
                method = %method,
                path = %path,
                attempt = attempt + 1,
                "API request"
            );

            let result = self
                .client
                .request(method.clone(), &url)
                .headers(self.auth_headers()?)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let text = response
                            .text()
                            .await
                            .map_err(|e| ApiError::Network(e.to_string()))?;
                        let json: serde_json::Value = serde_json::from_str(&text)
                            .map_err(|e| ApiError::Deserialization(e.to_string()))?;
                        return Ok(json);
                    }

                    // Rate limited: wait and retry
                    if status.as_u16() == 429 {
                        let retry_after = response
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(1);
                        warn!(retry_after, attempt = attempt + 1, "Rate limited");
                        tokio::time::sleep(Duration::from_secs(retry_after)).await;
                        last_error = Some(ApiError::RateLimited { retry_after });
                        continue;
                    }

                    // 5xx: retry with backoff
                    if status.is_server_error() {
                        let delay_ms = backoff_delay_ms(attempt);
                        warn!(
                            status_code = status.as_u16(),
                            delay_ms,
                            attempt = attempt + 1,
                            "Server error, retrying"
                        );
                        let body_text = response.text().await.unwrap_or_default();
                        last_error = Some(ApiError::from_response(status.as_u16(), &body_text));
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        continue;
                    }

                    // 4xx: give up
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(ApiError::from_response(status.as_u16(), &body_text));
                }
                Err(e) => {
                    let delay_ms = backoff_delay_ms(attempt);
                    warn!(
                        error = %e,
                        delay_ms,
                        attempt = attempt + 1,
                        "Network error, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                    if e.is_timeout() {
                        last_error = Some(ApiError::Timeout(e.to_string()));
                    } else {
                        last_error = Some(ApiError::Network(e.to_string()));
                    }
                    continue;
                }
            }
        }

        Err(ApiError::MaxRetriesExceeded {
            attempts: self.max_retries,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
        })
    }

    fn auth_headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    // =========================================================================
    // Match Endpoints
    // =========================================================================

    /// All matches the backend currently lists.
    pub async fn list_matches(&self) -> Result<Vec<MatchSummary>, ApiError> {
        let data = self.request(reqwest::Method::GET, "/matches").await?;
        Ok(parse_match_list(data))
    }

    /// Matches in progress, i.e. the rooms worth joining.
    pub async fn live_matches(&self) -> Result<Vec<MatchSummary>, ApiError> {
        let matches = self.list_matches().await?;
        Ok(matches.into_iter().filter(MatchSummary::is_live).collect())
    }

    /// Match details by id.
    pub async fn get_match(&self, match_id: &str) -> Result<MatchSummary, ApiError> {
        let path = format!("/matches/{}", match_id);
        let data = self.request(reqwest::Method::GET, &path).await?;
        let match_val = data.get("match").filter(|v| v.is_object()).unwrap_or(&data);
        serde_json::from_value(match_val.clone()).map_err(|e| ApiError::Deserialization(e.to_string()))
    }

    // =========================================================================
    // Account Endpoints
    // =========================================================================

    /// Profile of the user owning the session token.
    pub async fn get_profile(&self) -> Result<UserProfile, ApiError> {
        if self.token.is_none() {
            return Err(ApiError::Unauthorized("no session token".to_string()));
        }
        let data = self.request(reqwest::Method::GET, "/auth/profile").await?;
        let user_val = data.get("user").filter(|v| v.is_object()).unwrap_or(&data);
        serde_json::from_value(user_val.clone()).map_err(|e| ApiError::Deserialization(e.to_string()))
    }
}

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_MAX_MS: u64 = 30_000;

/// Exponential backoff for retry `attempt` (0-based), capped at 30s.
fn backoff_delay_ms(attempt: u32) -> u64 {
    2u64.saturating_pow(attempt)
        .saturating_mul(BACKOFF_BASE_MS)
        .min(BACKOFF_MAX_MS)
}

/// Accepts a bare array or `{"matches": [...]}` / `{"data": [...]}`.
/// Entries that fail to parse are skipped.
fn parse_match_list(data: serde_json::Value) -> Vec<MatchSummary> {
    let entries = match data {
        serde_json::Value::Array(arr) => arr,
        serde_json::Value::Object(mut map) => match map
            .remove("matches")
            .or_else(|| map.remove("data"))
        {
            Some(serde_json::Value::Array(arr)) => arr,
            _ => {
                warn!("Could not parse matches response");
                return Vec::new();
            }
        },
        _ => {
            warn!("Could not parse matches response");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|m| match serde_json::from_value::<MatchSummary>(m) {
            Ok(summary) => Some(summary),
            Err(e) => {
                debug!(error = %e, "Skipping unparseable match");
                None
            }
        })
        .collect()
}
