//! # Optimistic Cache
//!
//! The read path of the engine: a per-context ordered list of message
//! snapshots, mutated synchronously on every dispatch so reads never block
//! on network I/O.
//!
//! ## Consistency Contract
//!
//! The cache always reflects every dispatched mutation, including ones whose
//! flush later fails; for the running session it is the sole source of
//! truth. Entries persist across flush cycles and are only replaced
//! wholesale by an explicit backend read-through (`write`) or dropped by
//! `invalidate`.
//!
//! ## API Shape
//!
//! Every operation is synchronous and infallible: a missing context key is
//! treated as an empty sequence and a mutation targeting an absent message
//! id is a no-op. Every mutator returns the resulting full sequence so the
//! caller can render it without a second lookup.
//!
//! Access is guarded by a single mutex over the whole map, not one per
//! entry; dispatch bursts are short and contention is low.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::types::{ContextKey, MessageId, MessageSnapshot, Payload, ToolState};

/// Per-context message snapshot lists.
///
/// See the module docs for the consistency contract.
#[derive(Debug, Default)]
pub struct OptimisticCache {
    entries: Mutex<HashMap<ContextKey, Vec<MessageSnapshot>>>,
}

impl OptimisticCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<ContextKey, Vec<MessageSnapshot>>) -> T) -> T {
        // A poisoned lock only means another thread panicked mid-mutation;
        // the map itself is still structurally sound, and this API is
        // contractually infallible.
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut entries)
    }

    /// Returns the cached sequence, or `None` if this context has never been
    /// populated. Callers fall back to a backend read-through and `write`
    /// the result.
    pub fn read(&self, context: &ContextKey) -> Option<Vec<MessageSnapshot>> {
        self.with_entries(|entries| entries.get(context).cloned())
    }

    /// Replaces the cached sequence wholesale (used after a read-through).
    pub fn write(&self, context: &ContextKey, sequence: Vec<MessageSnapshot>) {
        self.with_entries(|entries| {
            entries.insert(context.clone(), sequence);
        });
    }

    /// Appends one snapshot, creating the context entry if needed.
    pub fn append(&self, context: &ContextKey, snapshot: MessageSnapshot) -> Vec<MessageSnapshot> {
        self.with_entries(|entries| {
            let sequence = entries.entry(context.clone()).or_default();
            sequence.push(snapshot);
            sequence.clone()
        })
    }

    /// Shallow-merges fields into the matching message and stamps its
    /// updated-at marker. No-op if the id is absent.
    pub fn mutate(
        &self,
        context: &ContextKey,
        id: &MessageId,
        partial_fields: Payload,
    ) -> Vec<MessageSnapshot> {
        self.with_entries(|entries| {
            let Some(sequence) = entries.get_mut(context) else {
                return Vec::new();
            };
            if let Some(snapshot) = sequence.iter_mut().find(|s| &s.id == id) {
                snapshot.merge_fields(partial_fields);
            }
            sequence.clone()
        })
    }

    /// Like [`mutate`](Self::mutate), but merges into the nested metadata
    /// map rather than replacing it.
    pub fn mutate_metadata(
        &self,
        context: &ContextKey,
        id: &MessageId,
        partial_metadata: Payload,
    ) -> Vec<MessageSnapshot> {
        self.with_entries(|entries| {
            let Some(sequence) = entries.get_mut(context) else {
                return Vec::new();
            };
            if let Some(snapshot) = sequence.iter_mut().find(|s| &s.id == id) {
                snapshot.merge_metadata(partial_metadata);
            }
            sequence.clone()
        })
    }

    /// Applies a tool-state patch to the matching message, overwriting
    /// exactly the fields the patch sets.
    pub fn mutate_tool_state(
        &self,
        context: &ContextKey,
        id: &MessageId,
        patch: ToolState,
    ) -> Vec<MessageSnapshot> {
        self.with_entries(|entries| {
            let Some(sequence) = entries.get_mut(context) else {
                return Vec::new();
            };
            if let Some(snapshot) = sequence.iter_mut().find(|s| &s.id == id) {
                snapshot.merge_tool_state(patch);
            }
            sequence.clone()
        })
    }

    /// Removes the matching message.
    pub fn remove(&self, context: &ContextKey, id: &MessageId) -> Vec<MessageSnapshot> {
        self.with_entries(|entries| {
            let Some(sequence) = entries.get_mut(context) else {
                return Vec::new();
            };
            sequence.retain(|s| &s.id != id);
            sequence.clone()
        })
    }

    /// Removes every matching message.
    pub fn remove_many(&self, context: &ContextKey, ids: &[MessageId]) -> Vec<MessageSnapshot> {
        self.with_entries(|entries| {
            let Some(sequence) = entries.get_mut(context) else {
                return Vec::new();
            };
            sequence.retain(|s| !ids.contains(&s.id));
            sequence.clone()
        })
    }

    /// Drops one context's entry; the next `read` misses and re-populates
    /// from the backend.
    pub fn invalidate(&self, context: &ContextKey) {
        self.with_entries(|entries| {
            entries.remove(context);
        });
    }

    /// Drops every entry.
    pub fn invalidate_all(&self) {
        self.with_entries(|entries| entries.clear());
    }
}

// =============================================================================
// Tests
// =============================================================================
