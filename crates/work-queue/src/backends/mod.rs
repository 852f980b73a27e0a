//! Queue backend implementations.
//!
//! Concrete implementations of the [`QueueBackend`](crate::backend::QueueBackend)
//! trait: Amazon SQS over its HTTP query API, and an in-process backend with
//! the same visibility-timeout semantics for tests and local development.

pub mod memory;
pub mod sqs;

pub use memory::InMemoryBackend;
pub use sqs::{SqsBackend, SqsError};
