//! Configuration for the Tradera client.

use std::time::Duration;

use crate::error::{ClientError, ClientResult};

/// API configuration constants.
pub mod api {
    use std::time::Duration;

    /// Base URL for the Tradera v3 SOAP services.
    pub const BASE_URL: &str = "https://api.tradera.com/v3";

    /// XML namespace for Tradera SOAP actions and headers.
    pub const NAMESPACE: &str = "http://api.tradera.com";

    /// Default request timeout.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection timeout.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Default number of retries after the first attempt.
    pub const MAX_RETRIES: u32 = 3;

    /// Default base delay for exponential backoff.
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

    /// Default cap on a single backoff delay.
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

    /// Default backoff growth factor.
    pub const RETRY_MULTIPLIER: f64 = 2.0;

    /// Default jitter fraction applied to each backoff delay.
    pub const RETRY_JITTER: f64 = 0.2;
}

/// Client configuration.
///
/// Rate limiting, retry and caching are all disabled by default.
#[derive(Debug, Clone)]
pub struct Config {
    /// Tradera application ID (required).
    pub app_id: i32,

    /// Tradera application key (required).
    pub app_key: String,

    /// User ID for Restricted, Order and Buyer services.
    pub user_id: i32,

    /// User authorization token for Restricted, Order and Buyer services.
    pub token: Option<String>,

    /// Maximum requests per second (0 = disabled).
    pub rate_limit: f64,

    /// Burst capacity of the rate limiter (None = same as `rate_limit`).
    pub rate_burst: Option<f64>,

    /// Retry transient failures with exponential backoff.
    pub retry_enabled: bool,

    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff.
    pub retry_base_delay: Duration,

    /// Cap on a single backoff delay.
    pub retry_max_delay: Duration,

    /// Backoff growth factor.
    pub retry_multiplier: f64,

    /// Jitter fraction (0..=1) applied to each backoff delay.
    pub retry_jitter: f64,

    /// Cache TTL (zero = disabled).
    pub cache_ttl: Duration,

    /// Request timeout.
    pub request_timeout: Duration,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Base URL for the SOAP services (for testing with mock servers).
    pub base_url: String,
}

impl Config {
    /// Create a configuration with default settings for the given application.
    #[must_use]
    pub fn new(app_id: i32, app_key: impl Into<String>) -> Self {
        Self {
            app_id,
            app_key: app_key.into(),
            user_id: 0,
            token: None,
            rate_limit: 0.0,
            rate_burst: None,
            retry_enabled: false,
            max_retries: api::MAX_RETRIES,
            retry_base_delay: api::RETRY_BASE_DELAY,
            retry_max_delay: api::RETRY_MAX_DELAY,
            retry_multiplier: api::RETRY_MULTIPLIER,
            retry_jitter: api::RETRY_JITTER,
            cache_ttl: Duration::ZERO,
            request_timeout: api::REQUEST_TIMEOUT,
            connect_timeout: api::CONNECT_TIMEOUT,
            base_url: api::BASE_URL.to_string(),
        }
    }

    /// Create a test configuration pointing at a mock server.
    #[must_use]
    pub fn for_testing(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            ..Self::new(1, "test-app-key")
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Reads `TRADERA_APP_ID` and `TRADERA_APP_KEY` (required) plus the
    /// optional `TRADERA_USER_ID`, `TRADERA_TOKEN`, `TRADERA_RATE_LIMIT`,
    /// `TRADERA_CACHE_TTL_SECS` and `TRADERA_RETRY`.
    ///
    /// # Errors
    ///
    /// Returns error if environment variables are missing or invalid.
    pub fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;

        let app_id = std::env::var("TRADERA_APP_ID")
            .context("TRADERA_APP_ID is not set")?
            .parse()
            .context("TRADERA_APP_ID must be an integer")?;
        let app_key = std::env::var("TRADERA_APP_KEY").context("TRADERA_APP_KEY is not set")?;

        let mut config = Self::new(app_id, app_key);

        if let (Ok(user_id), Ok(token)) =
            (std::env::var("TRADERA_USER_ID"), std::env::var("TRADERA_TOKEN"))
        {
            let user_id = user_id.parse().context("TRADERA_USER_ID must be an integer")?;
            config = config.with_user_auth(user_id, token);
        }
        if let Ok(rate) = std::env::var("TRADERA_RATE_LIMIT") {
            let rate = rate.parse().context("TRADERA_RATE_LIMIT must be a number")?;
            config = config.with_rate_limit(rate);
        }
        if let Ok(ttl) = std::env::var("TRADERA_CACHE_TTL_SECS") {
            let secs = ttl.parse().context("TRADERA_CACHE_TTL_SECS must be an integer")?;
            config = config.with_cache(Duration::from_secs(secs));
        }
        if let Ok(retry) = std::env::var("TRADERA_RETRY") {
            config.retry_enabled = matches!(retry.as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    /// Return a copy with user authorization set.
    #[must_use]
    pub fn with_user_auth(mut self, user_id: i32, token: impl Into<String>) -> Self {
        self.user_id = user_id;
        self.token = Some(token.into());
        self
    }

    /// Return a copy with rate limiting enabled.
    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_second: f64) -> Self {
        self.rate_limit = requests_per_second;
        self
    }

    /// Return a copy with rate limiting and a custom burst capacity.
    #[must_use]
    pub fn with_rate_limit_burst(mut self, requests_per_second: f64, burst: f64) -> Self {
        self.rate_limit = requests_per_second;
        self.rate_burst = Some(burst);
        self
    }

    /// Return a copy with retry enabled.
    #[must_use]
    pub fn with_retry(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.retry_enabled = true;
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    /// Return a copy with caching enabled.
    #[must_use]
    pub fn with_cache(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Return a copy with the given request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Check if user authorization is configured.
    #[must_use]
    pub fn has_user_auth(&self) -> bool {
        self.user_id > 0 && self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Check the configuration for obviously invalid values.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> ClientResult<()> {
        if self.app_id <= 0 {
            return Err(ClientError::InvalidAppId);
        }
        if self.app_key.trim().is_empty() {
            return Err(ClientError::InvalidAppKey);
        }
        if !self.rate_limit.is_finite() || self.rate_limit < 0.0 {
            return Err(ClientError::invalid_config(
                "rate_limit",
                format!("must be a non-negative number, got {}", self.rate_limit),
            ));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| ClientError::invalid_config("base_url", e.to_string()))?;
        Ok(())
    }
}
