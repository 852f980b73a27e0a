//! # Work Queue
//!
//! A work-queue contract implemented over a managed queue service with
//! visibility-timeout semantics, such as Amazon SQS.
//!
//! This library provides:
//! - A uniform contract ([`WorkQueue`]): submit, take, reserve, release,
//!   finish, peek, counts and flush
//! - An adapter ([`QueueAdapter`]) that maps the contract onto backend calls
//! - Backends for Amazon SQS and for in-process use
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Queue names, receipt handles and delivered messages
//! - [`config`] - Adapter and backend configuration
//! - [`backend`] - The backend trait and factory
//! - [`backends`] - Backend implementations
//! - [`adapter`] - The contract and its adapter
//! - [`id`] - Correlation identifier generation
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use work_queue::{
//!     AdapterConfig, InMemoryBackend, QueueAdapter, QueueName, SubmitOptions, WorkQueue,
//! };
//!
//! # async fn example() -> Result<(), work_queue::QueueError> {
//! let backend = Arc::new(InMemoryBackend::default());
//! let queue = QueueAdapter::connect(
//!     QueueName::new("jobs".to_string())?,
//!     AdapterConfig::default(),
//!     backend,
//! )
//! .await?;
//!
//! queue.submit(json!({"task": "resize", "id": 42}), SubmitOptions::new()).await?;
//! if let Some(message) = queue.wait_and_reserve(None).await? {
//!     // ... process message.payload ...
//!     queue.finish(&message.handle).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod backend;
pub mod backends;
pub mod config;
pub mod error;
pub mod id;
pub mod message;

// Re-export commonly used types at crate root for convenience
pub use adapter::{QueueAdapter, WorkQueue};
pub use backend::{create_backend, BackendMessage, QueueBackend, ReceiveRequest};
pub use backends::{InMemoryBackend, SqsBackend, SqsError};
pub use config::{AdapterConfig, BackendConfig, InMemoryConfig, SqsConfig};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use id::{IdGenerator, UuidGenerator};
pub use message::{
    MessageId, QueueEndpoint, QueueMessage, QueueName, ReceiptHandle, ReleaseOptions,
    SubmitOptions, Timestamp,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
