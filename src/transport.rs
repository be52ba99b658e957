//! # Persistence Service Boundary
//!
//! The engine never talks to a network itself; it hands batches to a
//! [`Transport`] implementation supplied at construction time. This keeps
//! the engine testable (tests inject recording doubles) and keeps delivery
//! concerns - endpoints, auth, timeouts, wire encoding - out of the
//! coalescing core entirely.
//!
//! ## Contract Expected of the Server
//!
//! - Operations in a batch are applied in list order.
//! - Caller-supplied ids are accepted on create (ids are generated
//!   client-side for optimistic rendering).
//! - A duplicate create for an id is handled gracefully; the engine does
//!   not guarantee idempotency per `(context, id, kind)`.
//! - Two batches may arrive out of order when their flush cycles overlap;
//!   the engine deliberately does not serialize cycles.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BatchReply, ContextKey, MessageSnapshot, Operation};

/// Delivery boundary to the remote persistence service.
///
/// Implementations must be cheap to share (`Send + Sync`); the engine holds
/// one instance for its whole lifetime and calls it from detached flush
/// tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Applies one flush cycle's operations in a single round-trip.
    ///
    /// Called at most once per flush cycle. Failures are caught at the
    /// flush boundary, logged, and dropped; there is no retry.
    async fn apply_batch(&self, operations: Vec<Operation>) -> Result<BatchReply>;

    /// Fetches the canonical message sequence for one context.
    ///
    /// Backs the cache-miss read-through; errors from here are surfaced to
    /// the reader.
    async fn fetch_context(&self, context: &ContextKey) -> Result<Vec<MessageSnapshot>>;
}
