//! The uniform work-queue contract and its adapter over a queue backend.
//!
//! [`QueueAdapter`] translates each [`WorkQueue`] operation into one or more
//! [`QueueBackend`] calls. It holds no locks and no in-process queue: the
//! backend's visibility timeout is the only thing keeping concurrent
//! consumers apart, and every backend failure is returned to the caller
//! without retrying.
//!
//! ## Consumption modes
//!
//! | operation          | backend calls          | guarantee      |
//! |--------------------|------------------------|----------------|
//! | `wait_and_take`    | receive, then delete   | at-most-once   |
//! | `wait_and_reserve` | receive                | at-least-once  |
//!
//! A reserved message must later be passed to `finish` or `release`, or it
//! reappears once its visibility window expires.

use crate::backend::{attributes, BackendMessage, QueueBackend, ReceiveRequest};
use crate::config::{
    AdapterConfig, MAX_DELIVERY_DELAY_SECONDS, MAX_RECEIVE_BATCH, MAX_VISIBILITY_TIMEOUT_SECONDS,
    MAX_WAIT_TIME_SECONDS,
};
use crate::error::{QueueError, ValidationError};
use crate::id::{IdGenerator, UuidGenerator};
use crate::message::{
    Envelope, MessageId, QueueEndpoint, QueueMessage, QueueName, ReceiptHandle, ReleaseOptions,
    SubmitOptions, Timestamp,
};
use async_trait::async_trait;
use chrono::Duration;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;

/// Reservations always wait the full long-poll ceiling
const LONG_POLL_SECONDS: u32 = MAX_WAIT_TIME_SECONDS as u32;

/// Uniform queue contract shared by every queue implementation
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Logical queue name
    fn name(&self) -> &QueueName;

    /// One-time provisioning hook
    async fn set_up(&self) -> Result<(), QueueError>;

    /// Enqueue a payload and return a client-side correlation identifier.
    ///
    /// The identifier is for producer-side logging only; it cannot be used to
    /// act on the message later.
    async fn submit(&self, payload: Value, options: SubmitOptions)
        -> Result<MessageId, QueueError>;

    /// Receive one message and delete it before returning it.
    ///
    /// The wait is capped at the backend's 20 second long-poll ceiling. If the
    /// caller fails after this returns, the message is lost.
    async fn wait_and_take(&self, timeout: Duration) -> Result<Option<QueueMessage>, QueueError>;

    /// Receive one message and hide it for `timeout` (or the default
    /// visibility timeout) without deleting it
    async fn wait_and_reserve(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<QueueMessage>, QueueError>;

    /// Reset the remaining invisibility of a reserved message
    async fn release(
        &self,
        handle: &ReceiptHandle,
        options: ReleaseOptions,
    ) -> Result<(), QueueError>;

    /// Give up on a reserved message
    async fn abort(&self, handle: &ReceiptHandle) -> Result<(), QueueError>;

    /// Delete a reserved message permanently
    async fn finish(&self, handle: &ReceiptHandle) -> Result<bool, QueueError>;

    /// Best-effort look at up to `limit` ready messages without hiding them
    async fn peek(&self, limit: u32) -> Result<Vec<QueueMessage>, QueueError>;

    /// Approximate number of messages ready for delivery
    async fn count_ready(&self) -> Result<u64, QueueError>;

    /// Messages currently reserved, where the queue can tell
    async fn count_reserved(&self) -> Result<u64, QueueError>;

    /// Messages marked failed, where the queue can tell
    async fn count_failed(&self) -> Result<u64, QueueError>;

    /// Remove every message in the queue
    async fn flush(&self) -> Result<(), QueueError>;
}

/// Adapter implementing [`WorkQueue`] over a visibility-timeout backend
pub struct QueueAdapter {
    backend: Arc<dyn QueueBackend>,
    id_generator: Arc<dyn IdGenerator>,
    name: QueueName,
    endpoint: QueueEndpoint,
    config: AdapterConfig,
}

impl QueueAdapter {
    /// Connect to a queue, provisioning it if no endpoint is configured
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConfigurationError`] for invalid timeouts before
    /// any backend call is made, or the backend's error if provisioning fails.
    pub async fn connect(
        name: QueueName,
        config: AdapterConfig,
        backend: Arc<dyn QueueBackend>,
    ) -> Result<Self, QueueError> {
        Self::connect_with_id_generator(name, config, backend, Arc::new(UuidGenerator)).await
    }

    /// Connect with a caller-supplied correlation identifier source
    pub async fn connect_with_id_generator(
        name: QueueName,
        config: AdapterConfig,
        backend: Arc<dyn QueueBackend>,
        id_generator: Arc<dyn IdGenerator>,
    ) -> Result<Self, QueueError> {
        config.validate()?;

        let endpoint = match &config.endpoint {
            Some(endpoint) => {
                debug!(queue = %name, endpoint = %endpoint, "Using configured queue endpoint");
                endpoint.clone()
            }
            None => {
                let mut queue_attributes = HashMap::new();
                queue_attributes.insert(
                    attributes::VISIBILITY_TIMEOUT.to_string(),
                    config.default_visibility_timeout.num_seconds().to_string(),
                );
                if name.is_fifo() {
                    queue_attributes.insert("FifoQueue".to_string(), "true".to_string());
                }

                let endpoint = backend.create_queue(&name, &queue_attributes).await?;
                info!(
                    queue = %name,
                    endpoint = %endpoint,
                    provider = backend.provider_name(),
                    "Queue provisioned"
                );
                endpoint
            }
        };

        Ok(Self {
            backend,
            id_generator,
            name,
            endpoint,
            config,
        })
    }

    /// Endpoint resolved at construction
    pub fn endpoint(&self) -> &QueueEndpoint {
        &self.endpoint
    }

    /// Serialize `payload` to JSON and submit it
    pub async fn submit_json<T: Serialize + Sync>(
        &self,
        payload: &T,
        options: SubmitOptions,
    ) -> Result<MessageId, QueueError> {
        let value = serde_json::to_value(payload).map_err(|e| {
            QueueError::SerializationError(crate::error::SerializationError::JsonError(e))
        })?;
        self.submit(value, options).await
    }

    /// One receive call, always asking for the receive count
    async fn receive(
        &self,
        max_messages: u32,
        wait_time_seconds: u32,
        visibility_timeout_seconds: u32,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let request = ReceiveRequest {
            max_messages,
            wait_time_seconds,
            visibility_timeout_seconds,
            attribute_names: vec![attributes::APPROXIMATE_RECEIVE_COUNT.to_string()],
        };

        let received = self
            .backend
            .receive_messages(&self.endpoint, &request)
            .await?;

        received
            .into_iter()
            .map(|message| to_queue_message(message, visibility_timeout_seconds))
            .collect()
    }

    fn default_visibility_seconds(&self) -> u32 {
        // validate() bounds the default to 0..=43200
        clamp_seconds(self.config.default_visibility_timeout, MAX_VISIBILITY_TIMEOUT_SECONDS)
    }
}

/// Convert a backend message into the caller-facing representation
fn to_queue_message(
    message: BackendMessage,
    visibility_timeout_seconds: u32,
) -> Result<QueueMessage, QueueError> {
    let payload = Envelope::decode(&message.body)?;

    let delivery_count = message
        .attributes
        .get(attributes::APPROXIMATE_RECEIVE_COUNT)
        .and_then(|count| count.parse::<u32>().ok())
        .unwrap_or(1);

    let received_at = Timestamp::now();
    let expires_at = received_at.plus(Duration::seconds(i64::from(visibility_timeout_seconds)));

    Ok(QueueMessage {
        handle: ReceiptHandle::new(message.receipt_handle, expires_at),
        payload,
        delivery_count,
        backend_message_id: message.message_id,
        received_at,
    })
}

/// Whole seconds within `0..=max`, saturating at both ends
fn clamp_seconds(duration: Duration, max: i64) -> u32 {
    let seconds = duration.num_seconds().clamp(0, max);
    u32::try_from(seconds).unwrap_or(u32::MAX)
}

/// Whole seconds within `0..=max`, rejecting anything outside
fn checked_seconds(field: &str, duration: Duration, max: i64) -> Result<u32, QueueError> {
    let seconds = duration.num_seconds();
    if duration < Duration::zero() || seconds > max {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: format!("must be between 0 and {} seconds", max),
        }
        .into());
    }
    Ok(clamp_seconds(duration, max))
}

#[async_trait]
impl WorkQueue for QueueAdapter {
    fn name(&self) -> &QueueName {
        &self.name
    }

    async fn set_up(&self) -> Result<(), QueueError> {
        // Redrive policy provisioning belongs here once it is configurable
        debug!(queue = %self.name, "Queue set-up has nothing to do");
        Ok(())
    }

    async fn submit(
        &self,
        payload: Value,
        options: SubmitOptions,
    ) -> Result<MessageId, QueueError> {
        let delay_seconds = match options.delay {
            Some(delay) => checked_seconds("delay", delay, MAX_DELIVERY_DELAY_SECONDS)?,
            None => 0,
        };

        let message_id = self.id_generator.next_id();
        let body = Envelope::encode(payload)?;

        self.backend
            .send_message(&self.endpoint, &body, delay_seconds)
            .await?;

        debug!(
            queue = %self.name,
            message_id = %message_id,
            delay_seconds,
            "Message submitted"
        );
        Ok(message_id)
    }

    async fn wait_and_take(&self, timeout: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let wait_seconds = clamp_seconds(timeout, MAX_WAIT_TIME_SECONDS);

        let mut messages = self
            .receive(1, wait_seconds, self.default_visibility_seconds())
            .await?;
        let Some(message) = messages.pop() else {
            return Ok(None);
        };

        self.backend
            .delete_message(&self.endpoint, message.handle.handle())
            .await?;

        debug!(
            queue = %self.name,
            delivery_count = message.delivery_count,
            "Message taken"
        );
        Ok(Some(message))
    }

    async fn wait_and_reserve(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let visibility_seconds = match timeout {
            Some(timeout) => {
                checked_seconds("visibility timeout", timeout, MAX_VISIBILITY_TIMEOUT_SECONDS)?
            }
            None => self.default_visibility_seconds(),
        };

        let mut messages = self
            .receive(1, LONG_POLL_SECONDS, visibility_seconds)
            .await?;
        let message = messages.pop();

        if let Some(message) = &message {
            debug!(
                queue = %self.name,
                handle = %message.handle,
                delivery_count = message.delivery_count,
                visibility_seconds,
                "Message reserved"
            );
        }
        Ok(message)
    }

    async fn release(
        &self,
        handle: &ReceiptHandle,
        options: ReleaseOptions,
    ) -> Result<(), QueueError> {
        let delay = options.delay.unwrap_or(self.config.default_timeout);
        let delay_seconds = checked_seconds("delay", delay, MAX_VISIBILITY_TIMEOUT_SECONDS)?;

        self.backend
            .change_message_visibility(&self.endpoint, handle.handle(), delay_seconds)
            .await?;

        debug!(queue = %self.name, handle = %handle, delay_seconds, "Message released");
        Ok(())
    }

    async fn abort(&self, handle: &ReceiptHandle) -> Result<(), QueueError> {
        // No failure-marking primitive exists; a backend redrive policy routes
        // over-delivered messages to a dead-letter queue
        warn!(
            queue = %self.name,
            handle = %handle,
            "Abort has no effect; the message reappears when its visibility window expires"
        );
        Ok(())
    }

    async fn finish(&self, handle: &ReceiptHandle) -> Result<bool, QueueError> {
        self.backend
            .delete_message(&self.endpoint, handle.handle())
            .await?;

        debug!(queue = %self.name, handle = %handle, "Message finished");
        Ok(true)
    }

    async fn peek(&self, limit: u32) -> Result<Vec<QueueMessage>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let ready = self.count_ready().await?;
        let batch = u64::from(limit.min(MAX_RECEIVE_BATCH)).min(ready);
        if batch == 0 {
            return Ok(Vec::new());
        }

        // Zero visibility leaves the messages available to other consumers
        let messages = self.receive(batch as u32, 0, 0).await?;

        debug!(
            queue = %self.name,
            requested = limit,
            returned = messages.len(),
            "Peeked at queue"
        );
        Ok(messages)
    }

    async fn count_ready(&self) -> Result<u64, QueueError> {
        let name = attributes::APPROXIMATE_NUMBER_OF_MESSAGES;
        let queue_attributes = self
            .backend
            .get_queue_attributes(&self.endpoint, &[name.to_string()])
            .await?;

        let value = queue_attributes
            .get(name)
            .ok_or_else(|| QueueError::ProviderError {
                provider: self.backend.provider_name().to_string(),
                code: "MissingAttribute".to_string(),
                message: format!("{} not returned", name),
            })?;

        value.parse::<u64>().map_err(|e| QueueError::ProviderError {
            provider: self.backend.provider_name().to_string(),
            code: "InvalidAttribute".to_string(),
            message: format!("{} = '{}': {}", name, value, e),
        })
    }

    async fn count_reserved(&self) -> Result<u64, QueueError> {
        Ok(0)
    }

    async fn count_failed(&self) -> Result<u64, QueueError> {
        Ok(0)
    }

    async fn flush(&self) -> Result<(), QueueError> {
        self.backend.purge_queue(&self.endpoint).await?;

        info!(queue = %self.name, endpoint = %self.endpoint, "Queue flushed");
        Ok(())
    }
}
