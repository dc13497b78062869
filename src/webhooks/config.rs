//! Webhook delivery configuration.
//!
//! Stored in the `[webhook]` section of `config.toml`. Targets come from the
//! rules themselves; this section only controls how deliveries are made:
//!
//! ```toml
//! [webhook]
//! signing_secret = "${DOCWATCH_WEBHOOK_SECRET}"
//!
//! [webhook.retry]
//! max_retries = 3
//! base_delay_ms = 1000
//! timeout_secs = 30
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Delivery settings shared by every webhook action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Shared secret for `X-Docwatch-Signature`. Unsigned when absent.
    #[serde(default, with = "optional_secret")]
    pub signing_secret: Option<SecretString>,

    /// Bearer token sent as `Authorization`, if the receivers require one.
    #[serde(default, with = "optional_secret")]
    pub bearer_token: Option<SecretString>,
}

impl WebhookConfig {
    /// Sets the signing secret.
    #[must_use]
    pub fn with_signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = Some(SecretString::from(secret.into()));
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the signing secret, ignoring an empty one.
    #[must_use]
    pub fn hmac_secret(&self) -> Option<&SecretString> {
        self.signing_secret
            .as_ref()
            .filter(|s| !s.expose_secret().is_empty())
    }
}

/// Retry configuration for webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RetryConfig {
    /// Creates a policy with no retries and no delay.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            timeout_secs: 30,
        }
    }

    /// Calculates the delay for a given attempt using exponential backoff.
    ///
    /// Formula: `base_delay_ms` * 2^(attempt - 1), with the exponent capped at 10.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The attempt number (1-based)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        self.base_delay_ms
            .saturating_mul(1 << (attempt - 1).min(10))
    }
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1000
}

const fn default_timeout_secs() -> u64 {
    30
}

/// Serde adapter for `Option<SecretString>`.
///
/// Secrets never serialize; a present value is written as a placeholder.
pub(crate) mod optional_secret {
    use secrecy::SecretString;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(secret: &Option<SecretString>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match secret {
            Some(_) => serializer.serialize_some("***REDACTED***"),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.map(SecretString::from))
    }
}
