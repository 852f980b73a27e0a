//! The queue backend seam.
//!
//! A [`QueueBackend`] is the managed queue service the adapter delegates to:
//! it owns storage, visibility windows and delivery counting. The adapter only
//! translates contract operations into these calls. Implementations live in
//! [`crate::backends`].

use crate::backends::{InMemoryBackend, SqsBackend};
use crate::config::BackendConfig;
use crate::error::QueueError;
use crate::message::{QueueEndpoint, QueueName};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Backend attribute names understood by every implementation
pub mod attributes {
    /// Queue attribute: default visibility timeout in seconds
    pub const VISIBILITY_TIMEOUT: &str = "VisibilityTimeout";
    /// Message attribute: number of times the message has been received
    pub const APPROXIMATE_RECEIVE_COUNT: &str = "ApproximateReceiveCount";
    /// Queue attribute: messages available for retrieval
    pub const APPROXIMATE_NUMBER_OF_MESSAGES: &str = "ApproximateNumberOfMessages";
    /// Queue attribute: messages received but not yet deleted or expired
    pub const APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE: &str =
        "ApproximateNumberOfMessagesNotVisible";
}

/// Parameters of a single receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveRequest {
    /// Upper bound on returned messages (backend maximum is 10)
    pub max_messages: u32,
    /// Long-poll duration (backend maximum is 20)
    pub wait_time_seconds: u32,
    /// How long returned messages stay hidden from other consumers
    pub visibility_timeout_seconds: u32,
    /// Message attributes to include in the response
    pub attribute_names: Vec<String>,
}

/// A message as returned by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendMessage {
    pub message_id: Option<String>,
    pub receipt_handle: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
}

/// Operations the managed queue service must offer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Create the queue if needed and return its endpoint; idempotent by name
    async fn create_queue(
        &self,
        name: &QueueName,
        attributes: &HashMap<String, String>,
    ) -> Result<QueueEndpoint, QueueError>;

    /// Enqueue one message body
    async fn send_message(
        &self,
        endpoint: &QueueEndpoint,
        body: &str,
        delay_seconds: u32,
    ) -> Result<(), QueueError>;

    /// Receive up to `request.max_messages` messages, hiding them for the
    /// requested visibility timeout
    async fn receive_messages(
        &self,
        endpoint: &QueueEndpoint,
        request: &ReceiveRequest,
    ) -> Result<Vec<BackendMessage>, QueueError>;

    /// Delete the message a receipt handle refers to
    async fn delete_message(
        &self,
        endpoint: &QueueEndpoint,
        receipt_handle: &str,
    ) -> Result<(), QueueError>;

    /// Reset the remaining invisibility of a received message
    async fn change_message_visibility(
        &self,
        endpoint: &QueueEndpoint,
        receipt_handle: &str,
        visibility_timeout_seconds: u32,
    ) -> Result<(), QueueError>;

    /// Remove every message in the queue
    async fn purge_queue(&self, endpoint: &QueueEndpoint) -> Result<(), QueueError>;

    /// Read queue attributes by name
    async fn get_queue_attributes(
        &self,
        endpoint: &QueueEndpoint,
        names: &[String],
    ) -> Result<HashMap<String, String>, QueueError>;

    /// Short backend name used in logs and errors
    fn provider_name(&self) -> &'static str;
}

/// Build a backend from configuration
pub async fn create_backend(config: BackendConfig) -> Result<Arc<dyn QueueBackend>, QueueError> {
    let backend: Arc<dyn QueueBackend> = match config {
        BackendConfig::Sqs(sqs_config) => Arc::new(
            SqsBackend::new(sqs_config)
                .await
                .map_err(|e| e.into_queue_error())?,
        ),
        BackendConfig::InMemory(memory_config) => Arc::new(InMemoryBackend::new(memory_config)?),
    };

    Ok(backend)
}
