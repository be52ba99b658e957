//! # Pending Operation Table
//!
//! The write path's compaction layer. Every dispatched operation merges into
//! a single [`PendingRecord`] per `(context, message id)` pair, so that a
//! burst of fine-grained mutations leaves only its net effect to be sent.
//!
//! ## Why Coalesce?
//!
//! The persistence service charges per round-trip. A UI editing one message
//! can easily issue a dozen mutations in one synchronous burst; sending each
//! individually costs a dozen round-trips for a result the server could have
//! reached in one:
//!
//! ```text
//! Without coalescing:              With coalescing:
//! ┌──────────────────────────┐     ┌──────────────────────────┐
//! │ create  → request        │     │ create ┐                 │
//! │ update  → request        │     │ update ├─ one record     │
//! │ update  → request        │     │ update ┘                 │
//! │ 3 round-trips            │     │ 1 round-trip (create,    │
//! │                          │     │   payload fully merged)  │
//! └──────────────────────────┘     └──────────────────────────┘
//! ```
//!
//! ## The Merge Algebra
//!
//! Merging is order-sensitive and has an annihilating element: a create
//! followed by a delete in the same window vanishes entirely. The rules,
//! chosen by (existing record state, incoming kind):
//!
//! | Existing state | Incoming | Result |
//! |----------------|----------|--------|
//! | no record | any | fresh record holding that payload / flag |
//! | live create | update | payload absorbed into the create |
//! | live create | delete | record removed (annihilation) |
//! | update only | update | shallow merge, last writer wins per key |
//! | update only | delete | record becomes a bare delete |
//! | deleted | create | resurrection: fresh create, delete flag kept |
//! | deleted, no create | update/metadata/tool-state | dropped |
//! | metadata | metadata | shallow merge |
//! | tool-state | tool-state | per-field overwrite |
//!
//! Two rules deserve expansion:
//!
//! - **Annihilation** only applies when the create was the record's first
//!   life. A record that was deleted and then re-created keeps its delete
//!   flag behind the fresh create; if that create is deleted again the
//!   record falls back to a bare delete rather than vanishing, because the
//!   message may exist server-side from before this window.
//! - **Double create** is a caller error with a defined fallback: the
//!   payloads shallow-merge, last writer winning per key.
//!
//! ## Record Lifecycle
//!
//! A record is born on the first dispatch for its pair within the current
//! coalescing window and destroyed when that window's flush materializes it.
//! Records never survive a flush; the table holds exactly the contexts
//! touched since the last drain.

use std::collections::HashMap;

use crate::types::{merge_payload, ContextKey, MessageId, Mutation, Operation, Payload, ToolState};

// =============================================================================
// Pending Record
// =============================================================================

/// The compacted net effect of every operation dispatched for one message
/// in one context since the last flush.
#[derive(Debug, Default, Clone, PartialEq)]
struct PendingRecord {
    /// Initial fields, present iff a create is still live.
    create: Option<Payload>,

    /// Merged update fields not absorbed into a create.
    update: Option<Payload>,

    /// Merged metadata keys.
    metadata: Option<Payload>,

    /// Merged tool-state patch.
    tool_state: Option<ToolState>,

    /// A delete has been recorded and no later create suppressed it.
    deleted: bool,
}

impl PendingRecord {
    /// Emits the record's net effect in the fixed wire order: exactly one of
    /// create / update / delete, then metadata, then tool-state.
    fn emit(self, context: &ContextKey, id: &MessageId, out: &mut Vec<Operation>) {
        if let Some(create) = self.create {
            // Invariant: `update` is always None here; merge() absorbs
            // updates into a live create the moment either arrives.
            out.push(Operation::create(context.clone(), id.clone(), create));
        } else if let Some(update) = self.update {
            out.push(Operation::update(context.clone(), id.clone(), update));
        } else if self.deleted {
            out.push(Operation::delete(context.clone(), id.clone()));
        }

        if let Some(metadata) = self.metadata {
            out.push(Operation::update_metadata(context.clone(), id.clone(), metadata));
        }
        if let Some(tool_state) = self.tool_state {
            out.push(Operation::update_tool_state(context.clone(), id.clone(), tool_state));
        }
    }
}

// =============================================================================
// Pending Table
// =============================================================================

/// All not-yet-flushed records, partitioned by context key.
///
/// Not internally synchronized; the scheduler owns it behind a single mutex.
#[derive(Debug, Default)]
pub struct PendingTable {
    records: HashMap<ContextKey, HashMap<MessageId, PendingRecord>>,
}

impl PendingTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one operation into its record.
    ///
    /// Total over every (state, kind) pair; see the module docs for the rule
    /// table. Consumes the operation - individual operations are never
    /// stored.
    pub fn merge(&mut self, op: Operation) {
        let Operation {
            context,
            message_id,
            mutation,
        } = op;

        if let Mutation::Delete = mutation {
            self.merge_delete(context, message_id);
            return;
        }

        let record = self
            .records
            .entry(context)
            .or_default()
            .entry(message_id)
            .or_default();

        match mutation {
            Mutation::Create(payload) => match &mut record.create {
                // Caller error (double create); last writer wins per key.
                Some(create) => merge_payload(create, payload),
                None => {
                    let mut create = record.update.take().unwrap_or_default();
                    merge_payload(&mut create, payload);
                    record.create = Some(create);
                    // record.deleted stays as-is: a resurrection keeps the
                    // flag so a later delete falls back to a bare delete.
                }
            },
            Mutation::Update(payload) => {
                if let Some(create) = &mut record.create {
                    // Absorption: stays a single create on the wire.
                    merge_payload(create, payload);
                } else if record.deleted {
                    // The message is gone for this session; nothing to update.
                } else {
                    merge_payload(record.update.get_or_insert_with(Payload::new), payload);
                }
            }
            Mutation::UpdateMetadata(payload) => {
                if !(record.deleted && record.create.is_none()) {
                    merge_payload(record.metadata.get_or_insert_with(Payload::new), payload);
                }
            }
            Mutation::UpdateToolState(patch) => {
                if !(record.deleted && record.create.is_none()) {
                    record
                        .tool_state
                        .get_or_insert_with(ToolState::default)
                        .merge_from(patch);
                }
            }
            Mutation::Delete => unreachable!("handled above"),
        }
    }

    fn merge_delete(&mut self, context: ContextKey, message_id: MessageId) {
        let context_records = self.records.entry(context.clone()).or_default();

        let annihilates = context_records
            .get(&message_id)
            .is_some_and(|r| r.create.is_some() && !r.deleted);

        if annihilates {
            // Annihilation: the message never existed server-side.
            context_records.remove(&message_id);
            if context_records.is_empty() {
                self.records.remove(&context);
            }
            return;
        }

        let record = context_records.entry(message_id).or_default();
        record.create = None;
        record.update = None;
        record.metadata = None;
        record.tool_state = None;
        record.deleted = true;
    }

    /// Converts and removes every record under one context, atomically.
    ///
    /// Called only at flush time. No operation can be read twice: the
    /// context's records leave the table in the same step that produces the
    /// wire list.
    pub fn materialize(&mut self, context: &ContextKey) -> Vec<Operation> {
        let mut out = Vec::new();
        if let Some(context_records) = self.records.remove(context) {
            for (id, record) in context_records {
                record.emit(context, &id, &mut out);
            }
        }
        out
    }

    /// Materializes every touched context.
    ///
    /// The table holds exactly the contexts touched since the last drain, so
    /// this is the flush cycle's whole batch.
    pub fn drain_all(&mut self) -> Vec<Operation> {
        let mut out = Vec::new();
        for (context, context_records) in std::mem::take(&mut self.records) {
            for (id, record) in context_records {
                record.emit(&context, &id, &mut out);
            }
        }
        out
    }

    /// Number of pending records across all contexts.
    pub fn record_count(&self) -> usize {
        self.records.values().map(HashMap::len).sum()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
