//! # Spool - Write-Coalescing Message Sync Engine
//!
//! Spool sits between an interactive UI issuing rapid, fine-grained message
//! mutations and a remote persistence service that charges per round-trip.
//! It provides:
//!
//! - **Optimistic reads**: a local cache mutated synchronously on every
//!   dispatch, so callers never wait on the network
//! - **Net-effect batching**: bursts of mutations collapse to the minimal
//!   equivalent operation set per message (create + delete vanish entirely)
//! - **Burst coalescing**: every mutation issued within one synchronous
//!   burst ships in exactly one batched call
//! - **Fire-and-forget writes**: flushes never block dispatch and failed
//!   flushes are logged and dropped, never retried
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Callers (UI / store)                      │
//! │                 dispatch, read, cache helpers                   │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!               ┌───────────────┴───────────────┐
//!               ▼                               ▼
//! ┌─────────────────────────┐     ┌─────────────────────────────────┐
//! │     Optimistic Cache    │     │      Pending Op Table           │
//! │ (per-context snapshots) │     │  (one net-effect record per     │
//! │                         │     │   context + message id)         │
//! └─────────────────────────┘     └───────────────┬─────────────────┘
//!                                                 │ one wake per burst
//!                                                 ▼
//!                                 ┌─────────────────────────────────┐
//!                                 │     Flusher (scheduler)         │
//!                                 │  drain -> detached batch send   │
//!                                 └───────────────┬─────────────────┘
//!                                                 ▼
//!                                 ┌─────────────────────────────────┐
//!                                 │   Transport (persistence svc)   │
//!                                 └─────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! These invariants are enforced throughout the codebase and must never be
//! violated:
//!
//! 1. **Synchronous dispatch**: `dispatch`, cache mutation, and
//!    materialization never await anything
//! 2. **Merge closure**: at most one pending record per (context, message
//!    id) pair, merged by the fixed rule table
//! 3. **Single flush per burst**: dispatches issued before the executor
//!    polls the flusher drain together, in one transport call
//! 4. **No retry**: a failed flush is logged and dropped; the cache is the
//!    session's source of truth
//! 5. **Cycles may race**: the flusher never awaits a send, so consecutive
//!    flush cycles can overlap in flight (latency over strict ordering)
//!
//! ## Module Organization
//!
//! - [`error`]: Custom error types for all failure modes
//! - [`types`]: Domain types (contexts, mutations, snapshots)
//! - [`ident`]: Client-side id generation
//! - [`cache`]: The optimistic cache (read path)
//! - [`pending`]: The pending operation table and merge algebra
//! - [`transport`]: The persistence service boundary
//! - [`scheduler`]: The coalescing scheduler and batch sender
//! - [`engine`]: The public engine handle (main entry point)

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for Spool operations.
///
/// This module defines all error variants that can occur. Using a single
/// error enum simplifies error handling for callers.
pub mod error;

/// Domain types for the mutation engine.
///
/// This module defines contexts, message ids, the tagged mutation union,
/// and the snapshot shape held by the cache. Uses the newtype pattern for
/// type safety.
pub mod types;

/// Client-side id generation.
///
/// Messages are named on the client before the server has seen them; the
/// provider trait lets tests inject deterministic ids.
pub mod ident;

/// The optimistic cache.
///
/// Per-context ordered snapshot lists, mutated synchronously on every
/// dispatch so reads never block on network I/O.
pub mod cache;

/// The pending operation table and its merge algebra.
///
/// Every dispatched operation merges into a single net-effect record per
/// (context, message id) pair: updates absorb into creates, a delete after
/// a create annihilates the record entirely, metadata and tool-state merge
/// shallowly.
pub mod pending;

/// The persistence service boundary.
///
/// The engine hands batches to an injected [`Transport`](transport::Transport)
/// implementation; no delivery concern lives in the coalescing core.
pub mod transport;

/// The coalescing scheduler and batch sender.
///
/// A dedicated flusher task, woken once per synchronous burst, drains the
/// pending table and ships the net effect as one detached transport call.
pub mod scheduler;

/// The public engine handle.
///
/// This module wires the cache, pending table, flusher, and injected
/// collaborators together. The main entry point is
/// [`Spool`](engine::Spool).
pub mod engine;

// =============================================================================
// Re-exports
// =============================================================================
// Commonly used types at the crate root: `use spool::Spool` instead of
// `use spool::engine::Spool`.

pub use engine::{Spool, SpoolBuilder};
pub use error::{Error, Result};
pub use ident::{IdProvider, UuidIds};
pub use transport::Transport;

pub use cache::OptimisticCache;
pub use pending::PendingTable;
pub use types::{
    BatchReply, ContextKey, ContextScope, MessageId, MessageSnapshot, Mutation, Operation,
    Payload, ToolState,
};
