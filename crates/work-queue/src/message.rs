//! Message types for queue operations including core domain identifiers.

use crate::error::{QueueError, SerializationError, ValidationError};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Maximum queue name length accepted by the backend
const MAX_QUEUE_NAME_LENGTH: usize = 80;

const FIFO_SUFFIX: &str = ".fifo";

/// Validated logical queue name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > MAX_QUEUE_NAME_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: format!("must be 1-{} characters", MAX_QUEUE_NAME_LENGTH),
            });
        }

        let base = name.strip_suffix(FIFO_SUFFIX).unwrap_or(&name);
        if base.is_empty()
            || !base
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, underscores and a '.fifo' suffix allowed"
                    .to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name designates an ordered (FIFO) queue
    pub fn is_fifo(&self) -> bool {
        self.0.ends_with(FIFO_SUFFIX)
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

/// Backend-specific location of a provisioned queue (for SQS, the queue URL)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueEndpoint(String);

impl QueueEndpoint {
    /// Create a new endpoint identifier; it must not be blank
    pub fn new(endpoint: String) -> Result<Self, ValidationError> {
        if endpoint.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "endpoint".to_string(),
            });
        }

        Ok(Self(endpoint))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueEndpoint {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueueEndpoint {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueEndpoint> for String {
    fn from(endpoint: QueueEndpoint) -> Self {
        endpoint.0
    }
}

/// Client-side correlation identifier assigned on submit.
///
/// It is never sent back by the backend and cannot be used to act on a
/// message; only a [`ReceiptHandle`] can.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap a UUID as a message ID
    pub fn from_uuid(id: uuid::Uuid) -> Self {
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Timestamp `offset` after this one
    pub fn plus(&self, offset: Duration) -> Self {
        Self(self.0 + offset)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Delivery Handle
// ============================================================================

/// Opaque token for acting on one delivery attempt of a message.
///
/// A new handle is issued every time the message becomes visible and is
/// received again. The expiry is advisory: it is computed locally from the
/// visibility timeout requested at receive time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptHandle {
    handle: String,
    expires_at: Option<Timestamp>,
}

impl ReceiptHandle {
    /// Create new receipt handle with a known visibility expiry
    pub fn new(handle: String, expires_at: Timestamp) -> Self {
        Self {
            handle,
            expires_at: Some(expires_at),
        }
    }

    /// Wrap a raw backend handle whose expiry is unknown
    pub fn from_raw(handle: String) -> Self {
        Self {
            handle,
            expires_at: None,
        }
    }

    /// Get handle string
    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn expires_at(&self) -> Option<&Timestamp> {
        self.expires_at.as_ref()
    }

    /// Check if the visibility window is known to have elapsed
    pub fn is_expired(&self) -> bool {
        match &self.expires_at {
            Some(expires_at) => Timestamp::now() >= *expires_at,
            None => false,
        }
    }

    /// Get time until expiry, zero when expired or unknown
    pub fn time_until_expiry(&self) -> Duration {
        match &self.expires_at {
            Some(expires_at) => {
                let now = Timestamp::now();
                if now >= *expires_at {
                    Duration::zero()
                } else {
                    expires_at.as_datetime() - now.as_datetime()
                }
            }
            None => Duration::zero(),
        }
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.handle)
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Wire envelope wrapping the producer's payload: `{"payload": <value>}`
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub payload: Value,
}

impl Envelope {
    /// Serialize a payload into a message body
    pub(crate) fn encode(payload: Value) -> Result<String, QueueError> {
        serde_json::to_string(&Envelope { payload })
            .map_err(|e| QueueError::SerializationError(SerializationError::JsonError(e)))
    }

    /// Parse a message body back into its payload
    pub(crate) fn decode(body: &str) -> Result<Value, QueueError> {
        serde_json::from_str::<Envelope>(body)
            .map(|envelope| envelope.payload)
            .map_err(|e| {
                QueueError::SerializationError(SerializationError::MalformedEnvelope {
                    message: e.to_string(),
                })
            })
    }
}

/// A message delivered to a consumer
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Handle for this delivery attempt only
    pub handle: ReceiptHandle,
    pub payload: Value,
    /// Times the message has been made visible to a consumer, this one included
    pub delivery_count: u32,
    /// Identifier assigned by the backend, if it reports one
    pub backend_message_id: Option<String>,
    pub received_at: Timestamp,
}

impl QueueMessage {
    /// Deserialize the payload into a concrete type
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| QueueError::SerializationError(SerializationError::JsonError(e)))
    }
}

// ============================================================================
// Operation Options
// ============================================================================

/// Options for submitting a message
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Time before the message first becomes visible; none means immediately
    pub delay: Option<Duration>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay the first delivery
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Options for releasing a reserved message
#[derive(Debug, Clone, Default)]
pub struct ReleaseOptions {
    /// New remaining invisibility; none means the queue's default timeout
    pub delay: Option<Duration>,
}

impl ReleaseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the message visible again after `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
