//! Client-side correlation identifier generation.

use crate::message::MessageId;

/// Source of correlation identifiers handed out by `submit`
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> MessageId;
}

/// Random (v4) UUID identifiers
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> MessageId {
        MessageId::from_uuid(uuid::Uuid::new_v4())
    }
}
