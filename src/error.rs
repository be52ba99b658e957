//! # Error Handling for Spool
//!
//! This module defines the error types used throughout Spool. We use a single
//! error enum ([`Error`]) to represent all possible failure modes, which
//! simplifies error handling for library users.
//!
//! ## Why a Single Error Type?
//!
//! Libraries commonly choose between:
//! 1. **Single enum** (our choice): Easy to match on, simple function signatures
//! 2. **Separate error types per module**: More precise, but verbose
//!
//! For Spool a single enum works well because the engine has exactly one
//! failure surface: talking to the persistence service. Everything else is
//! total by construction.
//!
//! ## Where Errors Can (and Cannot) Appear
//!
//! | Path | Can fail? | What happens |
//! |------|-----------|--------------|
//! | `dispatch` and cache mutators | No | Merging is a total function |
//! | Flush (batch send) | Yes | Caught at the flush boundary, logged, dropped |
//! | Read-through on cache miss | Yes | Surfaced to the caller of `read` |
//!
//! The flush path deliberately never propagates its errors: the optimistic
//! cache is the session's source of truth and failed batches are not retried.

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in Spool operations.
///
/// # Example
///
/// ```rust,ignore
/// use spool::{Result, Spool};
///
/// async fn example(engine: &Spool, ctx: &spool::ContextKey) -> Result<()> {
///     // The only fallible public operation is the cache-miss read-through.
///     let messages = engine.read(ctx).await?;
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The persistence service rejected or failed a call.
    ///
    /// # When This Happens
    ///
    /// - `Transport::apply_batch` failed (timeout, server error, connection
    ///   reset). At the flush boundary this is caught and logged, never
    ///   surfaced.
    /// - `Transport::fetch_context` failed during a read-through. This one
    ///   *is* surfaced, because the caller asked for data we do not have.
    ///
    /// # Recovery
    ///
    /// None inside the engine. A higher layer may invalidate the context's
    /// cache and re-read once the backend is reachable again.
    #[error("transport error: {0}")]
    Transport(String),

    /// A payload could not be serialized or deserialized.
    ///
    /// # When This Happens
    ///
    /// Transport implementations encode [`Operation`](crate::types::Operation)
    /// lists and decode [`MessageSnapshot`](crate::types::MessageSnapshot)
    /// sequences with `serde_json`. The engine itself never serializes; it
    /// treats payloads as opaque maps.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
///
/// Functions return `Result<Foo>` instead of `Result<Foo, Error>`, the
/// standard pattern used by most Rust libraries.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
