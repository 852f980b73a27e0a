//! In-memory queue backend for testing and development.
//!
//! This backend keeps the visibility-timeout semantics of a managed queue
//! service:
//! - Messages are hidden for the requested visibility timeout when received
//! - Every delivery issues a fresh receipt handle; older handles go stale
//! - Receive counts drive `ApproximateReceiveCount`
//! - Long polls wait up to the requested time for a message to appear
//! - Optional redrive: messages received too often move to dead letters
//!
//! Time is measured with [`tokio::time::Instant`], so tests can drive it with
//! a paused runtime clock.

use crate::backend::{attributes, BackendMessage, QueueBackend, ReceiveRequest};
use crate::config::{
    InMemoryConfig, MAX_DELIVERY_DELAY_SECONDS, MAX_RECEIVE_BATCH, MAX_VISIBILITY_TIMEOUT_SECONDS,
    MAX_WAIT_TIME_SECONDS,
};
use crate::error::QueueError;
use crate::message::{QueueEndpoint, QueueName};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const PROVIDER_NAME: &str = "InMemory";

const ENDPOINT_SCHEME: &str = "memory://";

/// Queue attribute: messages still inside their initial delivery delay
pub const APPROXIMATE_NUMBER_OF_MESSAGES_DELAYED: &str = "ApproximateNumberOfMessagesDelayed";

const ALL_ATTRIBUTES: &str = "All";

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Storage for all queues, keyed by endpoint
struct QueueStorage {
    queues: HashMap<String, InMemoryQueue>,
}

/// Internal queue state for a single queue
struct InMemoryQueue {
    /// Every live message, in send order
    messages: VecDeque<StoredMessage>,
    /// Bodies of messages moved aside by redrive
    dead_letters: Vec<String>,
    attributes: HashMap<String, String>,
}

impl InMemoryQueue {
    fn new(attributes: HashMap<String, String>) -> Self {
        Self {
            messages: VecDeque::new(),
            dead_letters: Vec::new(),
            attributes,
        }
    }

    /// Find the in-flight message that `receipt_handle` currently refers to
    fn in_flight_mut(&mut self, receipt_handle: &str, now: Instant) -> Option<&mut StoredMessage> {
        self.messages
            .iter_mut()
            .find(|m| m.is_in_flight(now) && m.receipt_handle.as_deref() == Some(receipt_handle))
    }

    fn earliest_visible_at(&self, now: Instant) -> Option<Instant> {
        self.messages
            .iter()
            .map(|m| m.visible_at)
            .filter(|at| *at > now)
            .min()
    }
}

/// A message stored in the queue with its delivery state
struct StoredMessage {
    message_id: String,
    body: String,
    /// The message is hidden until this instant (delay or visibility window)
    visible_at: Instant,
    receive_count: u32,
    /// Handle of the latest delivery, if it has ever been received
    receipt_handle: Option<String>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        now >= self.visible_at
    }

    /// Received and still inside its visibility window
    fn is_in_flight(&self, now: Instant) -> bool {
        self.receipt_handle.is_some() && !self.is_visible(now)
    }

    /// Never received and still inside its delivery delay
    fn is_delayed(&self, now: Instant) -> bool {
        self.receipt_handle.is_none() && !self.is_visible(now)
    }
}

// ============================================================================
// InMemoryBackend
// ============================================================================

/// In-memory queue backend implementation
///
/// # Example
///
/// ```rust
/// use std::collections::HashMap;
/// use work_queue::{InMemoryBackend, QueueBackend, QueueName, ReceiveRequest};
///
/// # tokio_test::block_on(async {
/// let backend = InMemoryBackend::default();
/// let name = QueueName::new("jobs".to_string()).unwrap();
/// let endpoint = backend.create_queue(&name, &HashMap::new()).await.unwrap();
/// assert_eq!(endpoint.as_str(), "memory://jobs");
///
/// backend.send_message(&endpoint, r#"{"payload":1}"#, 0).await.unwrap();
/// let request = ReceiveRequest {
///     max_messages: 1,
///     wait_time_seconds: 0,
///     visibility_timeout_seconds: 30,
///     attribute_names: Vec::new(),
/// };
/// let received = backend.receive_messages(&endpoint, &request).await.unwrap();
/// assert_eq!(received.len(), 1);
/// # });
/// ```
pub struct InMemoryBackend {
    storage: Arc<RwLock<QueueStorage>>,
    /// Wakes long-polling receivers when a message may have become visible
    activity: Arc<Notify>,
    config: InMemoryConfig,
}

impl InMemoryBackend {
    /// Create new in-memory backend with configuration
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConfigurationError`] if `max_receive_count` is zero.
    pub fn new(config: InMemoryConfig) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(QueueStorage {
                queues: HashMap::new(),
            })),
            activity: Arc::new(Notify::new()),
            config,
        }
    }

    /// Bodies of the messages that redrive moved out of the queue
    pub fn dead_letters(&self, endpoint: &QueueEndpoint) -> Result<Vec<String>, QueueError> {
        let storage = self.read()?;
        let queue = lookup(&storage.queues, endpoint)?;
        Ok(queue.dead_letters.clone())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, QueueStorage>, QueueError> {
        self.storage.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, QueueStorage>, QueueError> {
        self.storage.write().map_err(|_| poisoned())
    }

    /// One non-blocking receive pass; also reports when to look again
    fn try_receive(
        &self,
        endpoint: &QueueEndpoint,
        request: &ReceiveRequest,
    ) -> Result<(Vec<BackendMessage>, Option<Instant>), QueueError> {
        let mut storage = self.write()?;
        let queue = lookup_mut(&mut storage.queues, endpoint)?;

        let now = Instant::now();
        let max_messages = request.max_messages.clamp(1, MAX_RECEIVE_BATCH) as usize;
        let visibility = Duration::from_secs(u64::from(request.visibility_timeout_seconds));
        let include_receive_count = request.attribute_names.iter().any(|name| {
            name == attributes::APPROXIMATE_RECEIVE_COUNT || name == ALL_ATTRIBUTES
        });

        let mut received = Vec::new();
        let mut index = 0;
        while index < queue.messages.len() && received.len() < max_messages {
            if !queue.messages[index].is_visible(now) {
                index += 1;
                continue;
            }

            let exceeds_redrive = self
                .config
                .max_receive_count
                .is_some_and(|max| queue.messages[index].receive_count >= max);
            if exceeds_redrive {
                if let Some(message) = queue.messages.remove(index) {
                    debug!(
                        endpoint = %endpoint,
                        message_id = %message.message_id,
                        receive_count = message.receive_count,
                        "Moving message to dead letters"
                    );
                    queue.dead_letters.push(message.body);
                }
                continue;
            }

            let message = &mut queue.messages[index];
            let receipt_handle = uuid::Uuid::new_v4().to_string();
            message.receive_count += 1;
            message.visible_at = now + visibility;
            message.receipt_handle = Some(receipt_handle.clone());

            let mut message_attributes = HashMap::new();
            if include_receive_count {
                message_attributes.insert(
                    attributes::APPROXIMATE_RECEIVE_COUNT.to_string(),
                    message.receive_count.to_string(),
                );
            }

            received.push(BackendMessage {
                message_id: Some(message.message_id.clone()),
                receipt_handle,
                body: message.body.clone(),
                attributes: message_attributes,
            });
            index += 1;
        }

        Ok((received, queue.earliest_visible_at(now)))
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::with_valid_config(InMemoryConfig::default())
    }
}

fn poisoned() -> QueueError {
    QueueError::ProviderError {
        provider: PROVIDER_NAME.to_string(),
        code: "LockPoisoned".to_string(),
        message: "queue storage lock poisoned".to_string(),
    }
}

fn invalid_parameter(message: String) -> QueueError {
    QueueError::ProviderError {
        provider: PROVIDER_NAME.to_string(),
        code: "InvalidParameterValue".to_string(),
        message,
    }
}

fn check_seconds(field: &str, value: u32, max: i64) -> Result<(), QueueError> {
    if i64::from(value) > max {
        return Err(invalid_parameter(format!(
            "{} must be between 0 and {} seconds, got {}",
            field, max, value
        )));
    }
    Ok(())
}

fn lookup<'a>(
    queues: &'a HashMap<String, InMemoryQueue>,
    endpoint: &QueueEndpoint,
) -> Result<&'a InMemoryQueue, QueueError> {
    queues
        .get(endpoint.as_str())
        .ok_or_else(|| QueueError::QueueNotFound {
            queue_name: endpoint.to_string(),
        })
}

fn lookup_mut<'a>(
    queues: &'a mut HashMap<String, InMemoryQueue>,
    endpoint: &QueueEndpoint,
) -> Result<&'a mut InMemoryQueue, QueueError> {
    queues
        .get_mut(endpoint.as_str())
        .ok_or_else(|| QueueError::QueueNotFound {
            queue_name: endpoint.to_string(),
        })
}

fn stale_handle(receipt_handle: &str) -> QueueError {
    QueueError::MessageNotFound {
        receipt: receipt_handle.to_string(),
    }
}

#[async_trait]
impl QueueBackend for InMemoryBackend {
    async fn create_queue(
        &self,
        name: &QueueName,
        attributes: &HashMap<String, String>,
    ) -> Result<QueueEndpoint, QueueError> {
        let endpoint = QueueEndpoint::new(format!("{}{}", ENDPOINT_SCHEME, name))
            .map_err(QueueError::ValidationError)?;

        let mut storage = self.write()?;
        storage
            .queues
            .entry(endpoint.as_str().to_string())
            .or_insert_with(|| InMemoryQueue::new(attributes.clone()));

        debug!(queue = %name, endpoint = %endpoint, "In-memory queue ready");
        Ok(endpoint)
    }

    async fn send_message(
        &self,
        endpoint: &QueueEndpoint,
        body: &str,
        delay_seconds: u32,
    ) -> Result<(), QueueError> {
        if body.len() > self.config.max_message_size {
            return Err(QueueError::MessageTooLarge {
                size: body.len(),
                max_size: self.config.max_message_size,
            });
        }
        check_seconds("DelaySeconds", delay_seconds, MAX_DELIVERY_DELAY_SECONDS)?;

        {
            let mut storage = self.write()?;
            let queue = lookup_mut(&mut storage.queues, endpoint)?;
            queue.messages.push_back(StoredMessage {
                message_id: uuid::Uuid::new_v4().to_string(),
                body: body.to_string(),
                visible_at: Instant::now() + Duration::from_secs(u64::from(delay_seconds)),
                receive_count: 0,
                receipt_handle: None,
            });
        }

        self.activity.notify_waiters();
        Ok(())
    }

    async fn receive_messages(
        &self,
        endpoint: &QueueEndpoint,
        request: &ReceiveRequest,
    ) -> Result<Vec<BackendMessage>, QueueError> {
        check_seconds(
            "VisibilityTimeout",
            request.visibility_timeout_seconds,
            MAX_VISIBILITY_TIMEOUT_SECONDS,
        )?;

        let wait_seconds = i64::from(request.wait_time_seconds).min(MAX_WAIT_TIME_SECONDS);
        let deadline = Instant::now() + Duration::from_secs(wait_seconds.unsigned_abs());

        loop {
            // Register for wakeups before looking, so a send between the
            // look and the wait is not missed
            let activity = self.activity.notified();
            tokio::pin!(activity);
            activity.as_mut().enable();

            let (received, next_visible_at) = self.try_receive(endpoint, request)?;
            if !received.is_empty() || Instant::now() >= deadline {
                return Ok(received);
            }

            let wake_at = next_visible_at.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = activity => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete_message(
        &self,
        endpoint: &QueueEndpoint,
        receipt_handle: &str,
    ) -> Result<(), QueueError> {
        let mut storage = self.write()?;
        let queue = lookup_mut(&mut storage.queues, endpoint)?;

        let now = Instant::now();
        let position = queue
            .messages
            .iter()
            .position(|m| {
                m.is_in_flight(now) && m.receipt_handle.as_deref() == Some(receipt_handle)
            })
            .ok_or_else(|| stale_handle(receipt_handle))?;

        queue.messages.remove(position);
        Ok(())
    }

    async fn change_message_visibility(
        &self,
        endpoint: &QueueEndpoint,
        receipt_handle: &str,
        visibility_timeout_seconds: u32,
    ) -> Result<(), QueueError> {
        check_seconds(
            "VisibilityTimeout",
            visibility_timeout_seconds,
            MAX_VISIBILITY_TIMEOUT_SECONDS,
        )?;

        {
            let mut storage = self.write()?;
            let queue = lookup_mut(&mut storage.queues, endpoint)?;

            let now = Instant::now();
            let message = queue
                .in_flight_mut(receipt_handle, now)
                .ok_or_else(|| stale_handle(receipt_handle))?;
            message.visible_at = now + Duration::from_secs(u64::from(visibility_timeout_seconds));
        }

        self.activity.notify_waiters();
        Ok(())
    }

    async fn purge_queue(&self, endpoint: &QueueEndpoint) -> Result<(), QueueError> {
        let mut storage = self.write()?;
        let queue = lookup_mut(&mut storage.queues, endpoint)?;
        queue.messages.clear();
        Ok(())
    }

    async fn get_queue_attributes(
        &self,
        endpoint: &QueueEndpoint,
        names: &[String],
    ) -> Result<HashMap<String, String>, QueueError> {
        let storage = self.read()?;
        let queue = lookup(&storage.queues, endpoint)?;

        let now = Instant::now();
        let count = |predicate: fn(&StoredMessage, Instant) -> bool| {
            queue
                .messages
                .iter()
                .filter(|m| predicate(*m, now))
                .count()
                .to_string()
        };

        let mut all = queue.attributes.clone();
        all.insert(
            attributes::APPROXIMATE_NUMBER_OF_MESSAGES.to_string(),
            count(StoredMessage::is_visible),
        );
        all.insert(
            attributes::APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE.to_string(),
            count(StoredMessage::is_in_flight),
        );
        all.insert(
            APPROXIMATE_NUMBER_OF_MESSAGES_DELAYED.to_string(),
            count(StoredMessage::is_delayed),
        );

        if names.iter().any(|name| name == ALL_ATTRIBUTES) {
            return Ok(all);
        }

        Ok(all
            .into_iter()
            .filter(|(key, _)| names.contains(key))
            .collect())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }
}
