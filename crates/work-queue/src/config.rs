//! Adapter and backend configuration.

use crate::error::{ConfigurationError, QueueError};
use crate::message::QueueEndpoint;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest visibility timeout the backend accepts (12 hours)
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: i64 = 43_200;

/// Longest per-message delivery delay the backend accepts (15 minutes)
pub const MAX_DELIVERY_DELAY_SECONDS: i64 = 900;

/// Long-poll ceiling enforced by the backend on every receive call
pub const MAX_WAIT_TIME_SECONDS: i64 = 20;

/// Most messages a single receive call may return
pub const MAX_RECEIVE_BATCH: u32 = 10;

/// Configuration for a queue adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Delay applied by `release` when the caller does not give one
    #[serde(with = "duration_seconds", default = "default_release_delay")]
    pub default_timeout: Duration,

    /// Window a received message stays hidden; also provisioned on create
    #[serde(with = "duration_seconds", default = "default_visibility_timeout")]
    pub default_visibility_timeout: Duration,

    /// Pre-existing endpoint; when absent the queue is provisioned by name
    #[serde(default)]
    pub endpoint: Option<QueueEndpoint>,
}

fn default_release_delay() -> Duration {
    Duration::seconds(60)
}

fn default_visibility_timeout() -> Duration {
    Duration::seconds(300)
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_release_delay(),
            default_visibility_timeout: default_visibility_timeout(),
            endpoint: None,
        }
    }
}

impl AdapterConfig {
    /// Use a pre-provisioned endpoint instead of creating the queue
    pub fn with_endpoint(mut self, endpoint: QueueEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_default_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.default_visibility_timeout = timeout;
        self
    }

    /// Check the configured durations against backend limits
    pub fn validate(&self) -> Result<(), QueueError> {
        check_visibility_range("default_timeout", self.default_timeout)?;
        check_visibility_range(
            "default_visibility_timeout",
            self.default_visibility_timeout,
        )?;
        Ok(())
    }
}

/// Reject a visibility duration outside `0..=MAX_VISIBILITY_TIMEOUT_SECONDS`
pub(crate) fn check_visibility_range(field: &str, value: Duration) -> Result<(), QueueError> {
    let seconds = value.num_seconds();
    if !(0..=MAX_VISIBILITY_TIMEOUT_SECONDS).contains(&seconds) {
        return Err(ConfigurationError::Invalid {
            message: format!(
                "{} must be between 0 and {} seconds, got {}",
                field, MAX_VISIBILITY_TIMEOUT_SECONDS, seconds
            ),
        }
        .into());
    }
    Ok(())
}

/// Serde helpers storing a `chrono::Duration` as whole seconds
pub mod duration_seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        let seconds = i64::try_from(seconds).map_err(serde::de::Error::custom)?;
        Ok(Duration::seconds(seconds))
    }
}

// ============================================================================
// Backend Configuration
// ============================================================================

/// Backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Sqs(SqsConfig),
    InMemory(InMemoryConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Sqs(SqsConfig::default())
    }
}

/// Amazon SQS configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct SqsConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Overrides `https://sqs.{region}.amazonaws.com` (LocalStack, tests)
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// HTTP timeout per request; must exceed the long-poll ceiling
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

impl Default for SqsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
            endpoint_url: None,
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl fmt::Debug for SqsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("endpoint_url", &self.endpoint_url)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// In-memory backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Redrive emulation: a message that would be received more often than
    /// this is moved to the queue's dead letters instead
    #[serde(default)]
    pub max_receive_count: Option<u32>,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_max_message_size() -> usize {
    256 * 1024
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_receive_count: None,
            max_message_size: default_max_message_size(),
        }
    }
}

impl InMemoryConfig {
    /// Reject a redrive limit of zero, which SQS does not allow either
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_receive_count == Some(0) {
            return Err(ConfigurationError::Invalid {
                message: "max_receive_count must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
