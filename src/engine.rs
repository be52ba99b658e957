//! # The Spool Engine
//!
//! This module provides the public handle for the engine. It wires the
//! optimistic cache (read path), the pending table and flusher (write
//! path), and the injected collaborators together behind one cloneable
//! type.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Callers (UI / store)                    │
//! └───────────────┬─────────────────────────────┬───────────────────┘
//!                 │ dispatch (sync)             │ read
//!                 ▼                             ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────────┐
//! │      Pending Table        │   │        Optimistic Cache         │
//! │   (net-effect records)    │   │  (per-context snapshot lists)   │
//! └───────────────┬───────────┘   └────────────────┬────────────────┘
//!                 │ wake, once per burst           │ miss only
//!                 ▼                                ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────────┐
//! │     Flusher task          │──▶│           Transport             │
//! │ (drain + detached send)   │   │     (persistence service)       │
//! └───────────────────────────┘   └─────────────────────────────────┘
//! ```
//!
//! Every dispatch mutates the cache synchronously and merges into the
//! pending table; the caller gets the new sequence back immediately and
//! never waits on the network. The flusher ships the net effect once the
//! burst's call stack has unwound.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use spool::{ContextScope, Spool};
//!
//! # async fn example(transport: Arc<dyn spool::Transport>) -> spool::Result<()> {
//! let engine = Spool::builder(transport).build();
//! let ctx = ContextScope::new("session-1").with_thread("thread-4").key();
//!
//! // Synchronous, renderable immediately; flushed as one batch.
//! let (id, _) = engine.create(&ctx, json!({"content": "hello"}).as_object().cloned().unwrap());
//! engine.update(&ctx, &id, json!({"content": "hello world"}).as_object().cloned().unwrap());
//!
//! // Cache hit after the create; no network on this path.
//! let messages = engine.read(&ctx).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cache::OptimisticCache;
use crate::error::Result;
use crate::ident::{IdProvider, UuidIds};
use crate::scheduler::{run_flusher, FlushCore};
use crate::transport::Transport;
use crate::types::{
    ContextKey, MessageId, MessageSnapshot, Mutation, Operation, Payload, ToolState,
};

// =============================================================================
// Builder
// =============================================================================

/// Builds a [`Spool`] with injected collaborators.
///
/// The engine is always an explicitly constructed object with its own
/// lifecycle - one per app session, or one per test - never ambient global
/// state.
pub struct SpoolBuilder {
    transport: Arc<dyn Transport>,
    ids: Arc<dyn IdProvider>,
}

impl SpoolBuilder {
    /// Overrides the id provider (tests inject deterministic ids).
    pub fn id_provider(mut self, ids: Arc<dyn IdProvider>) -> Self {
        self.ids = ids;
        self
    }

    /// Spawns the flusher and returns the handle.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context (the flusher is a
    /// spawned task); panics otherwise, as `tokio::spawn` does.
    pub fn build(self) -> Spool {
        let core = Arc::new(FlushCore::new(self.transport));
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_flusher(Arc::clone(&core), wake_rx));

        Spool {
            inner: Arc::new(SpoolInner {
                cache: OptimisticCache::new(),
                core,
                ids: self.ids,
            }),
            wake_tx,
        }
    }
}

// =============================================================================
// Engine Handle
// =============================================================================

struct SpoolInner {
    cache: OptimisticCache,
    core: Arc<FlushCore>,
    ids: Arc<dyn IdProvider>,
}

/// The engine handle.
///
/// # Thread Safety
///
/// `Spool` is `Clone`, `Send`, and `Sync`; clones share the same cache,
/// pending table, and flusher. When the last clone drops, the flusher
/// performs a final drain so the last burst is not lost.
///
/// # Lifecycle
///
/// Construct with [`Spool::builder`]. There is no explicit shutdown call;
/// dropping every handle closes the wake channel and ends the flusher.
#[derive(Clone)]
pub struct Spool {
    inner: Arc<SpoolInner>,
    wake_tx: mpsc::UnboundedSender<()>,
}

impl Spool {
    /// Starts building an engine over the given transport.
    pub fn builder(transport: Arc<dyn Transport>) -> SpoolBuilder {
        SpoolBuilder {
            transport,
            ids: Arc::new(UuidIds),
        }
    }

    // =========================================================================
    // Dispatch (write path)
    // =========================================================================

    /// Dispatches one operation: applies it to the cache, merges it into
    /// the pending table, and schedules a flush if none is scheduled.
    ///
    /// Entirely synchronous; the returned sequence is the context's new
    /// visible state and can be rendered without a second lookup. From the
    /// caller's perspective every dispatch succeeds - a later persistence
    /// failure is logged by the flush path, not surfaced here.
    pub fn dispatch(&self, op: Operation) -> Vec<MessageSnapshot> {
        let sequence = match &op.mutation {
            Mutation::Create(payload) => self.inner.cache.append(
                &op.context,
                MessageSnapshot::from_create(op.message_id.clone(), payload.clone()),
            ),
            Mutation::Update(payload) => {
                self.inner.cache.mutate(&op.context, &op.message_id, payload.clone())
            }
            Mutation::Delete => self.inner.cache.remove(&op.context, &op.message_id),
            Mutation::UpdateMetadata(payload) => {
                self.inner
                    .cache
                    .mutate_metadata(&op.context, &op.message_id, payload.clone())
            }
            Mutation::UpdateToolState(patch) => {
                self.inner
                    .cache
                    .mutate_tool_state(&op.context, &op.message_id, patch.clone())
            }
        };

        self.inner.core.enqueue(op, &self.wake_tx);
        sequence
    }

    /// Creates a message with a fresh client-side id.
    ///
    /// Returns the id so the caller can target follow-up mutations at the
    /// message before the server has ever seen it.
    pub fn create(&self, context: &ContextKey, payload: Payload) -> (MessageId, Vec<MessageSnapshot>) {
        let id = self.inner.ids.fresh_id();
        let sequence = self.dispatch(Operation::create(context.clone(), id.clone(), payload));
        (id, sequence)
    }

    /// Shallow-merges fields into a message.
    pub fn update(
        &self,
        context: &ContextKey,
        id: &MessageId,
        payload: Payload,
    ) -> Vec<MessageSnapshot> {
        self.dispatch(Operation::update(context.clone(), id.clone(), payload))
    }

    /// Deletes a message.
    pub fn delete(&self, context: &ContextKey, id: &MessageId) -> Vec<MessageSnapshot> {
        self.dispatch(Operation::delete(context.clone(), id.clone()))
    }

    /// Shallow-merges keys into a message's metadata map.
    pub fn update_metadata(
        &self,
        context: &ContextKey,
        id: &MessageId,
        payload: Payload,
    ) -> Vec<MessageSnapshot> {
        self.dispatch(Operation::update_metadata(context.clone(), id.clone(), payload))
    }

    /// Overwrites the set fields of a message's tool state.
    pub fn update_tool_state(
        &self,
        context: &ContextKey,
        id: &MessageId,
        patch: ToolState,
    ) -> Vec<MessageSnapshot> {
        self.dispatch(Operation::update_tool_state(context.clone(), id.clone(), patch))
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Returns the context's message sequence.
    ///
    /// A cache hit returns synchronously. A miss performs the backend
    /// read-through, caches the result wholesale, and returns it; this is
    /// the only public operation that can touch the network or fail.
    pub async fn read(&self, context: &ContextKey) -> Result<Vec<MessageSnapshot>> {
        if let Some(sequence) = self.inner.cache.read(context) {
            return Ok(sequence);
        }

        let sequence = self.inner.core.transport.fetch_context(context).await?;
        self.inner.cache.write(context, sequence.clone());
        Ok(sequence)
    }

    // =========================================================================
    // Cache helpers (local state only, nothing persisted)
    // =========================================================================
    //
    // These adjust the local cache without dispatching, for callers applying
    // state that is already persisted (server pushes, read-through
    // post-processing). To persist a change, dispatch it.

    /// Appends a snapshot to a context's cached sequence.
    pub fn append(&self, context: &ContextKey, snapshot: MessageSnapshot) -> Vec<MessageSnapshot> {
        self.inner.cache.append(context, snapshot)
    }

    /// Shallow-merges fields into a cached message.
    pub fn mutate(
        &self,
        context: &ContextKey,
        id: &MessageId,
        partial_fields: Payload,
    ) -> Vec<MessageSnapshot> {
        self.inner.cache.mutate(context, id, partial_fields)
    }

    /// Shallow-merges keys into a cached message's metadata map.
    pub fn mutate_metadata(
        &self,
        context: &ContextKey,
        id: &MessageId,
        partial_metadata: Payload,
    ) -> Vec<MessageSnapshot> {
        self.inner.cache.mutate_metadata(context, id, partial_metadata)
    }

    /// Removes a cached message.
    pub fn remove(&self, context: &ContextKey, id: &MessageId) -> Vec<MessageSnapshot> {
        self.inner.cache.remove(context, id)
    }

    /// Removes several cached messages.
    pub fn remove_many(&self, context: &ContextKey, ids: &[MessageId]) -> Vec<MessageSnapshot> {
        self.inner.cache.remove_many(context, ids)
    }

    /// Drops a context's cache entry; the next read misses.
    pub fn invalidate(&self, context: &ContextKey) {
        self.inner.cache.invalidate(context)
    }

    /// Drops every cache entry.
    pub fn invalidate_all(&self) {
        self.inner.cache.invalidate_all()
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// Number of records waiting for the next flush.
    pub fn pending_records(&self) -> usize {
        self.inner.core.pending_records()
    }
}

// =============================================================================
// Tests
// =============================================================================
