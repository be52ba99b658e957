//! # Client-Side Id Generation
//!
//! Messages are named on the client before the server has seen them, so the
//! UI can render an optimistic create immediately. The provider is a trait
//! so tests can inject deterministic ids.

use uuid::Uuid;

use crate::types::MessageId;

/// Source of fresh, collision-resistant message ids.
///
/// Implementations must return ids that are statistically unique for the
/// lifetime of the process; the same id is used client-side and sent to the
/// server on create.
pub trait IdProvider: Send + Sync {
    /// Returns a fresh unique id.
    fn fresh_id(&self) -> MessageId;
}

/// The production provider: random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdProvider for UuidIds {
    fn fresh_id(&self) -> MessageId {
        MessageId::new(Uuid::new_v4().to_string())
    }
}
