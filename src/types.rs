//! # Domain Types for Spool
//!
//! This module defines the core types used throughout Spool. These types
//! model the mutation domain: contexts, message ids, mutations, and the
//! denormalized snapshots held by the optimistic cache.
//!
//! ## Design Philosophy: Newtypes for Safety
//!
//! We use the "newtype pattern" for the two identifier types - wrapping
//! `String` in single-field structs. This provides:
//!
//! - **Type safety**: Can't accidentally pass a `MessageId` where a
//!   `ContextKey` is expected
//! - **Self-documenting code**: Function signatures tell you what they expect
//! - **Encapsulation**: The key-derivation rules live next to the type
//!
//! ## Payloads Are Opaque
//!
//! The engine is payload-agnostic: every mutation carries a schema-less JSON
//! map ([`Payload`]) and the merge algebra only ever does shallow key-by-key
//! merges. Strong typing lives at the call sites, in the tagged
//! [`Mutation`] union with one constructor per kind.
//!
//! ## Invariants
//!
//! - [`ContextScope::key`]: pure and deterministic; structurally equal scope
//!   tuples yield identical keys, structurally different tuples (including
//!   `None` vs `Some`) yield different keys
//! - [`Operation`]: immutable once issued; consumed by the merge step and
//!   never stored individually beyond it

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Payloads
// =============================================================================

/// A schema-less key/value payload.
///
/// Semantics depend on the [`Mutation`] kind that carries it. The engine
/// never inspects individual keys; it only shallow-merges maps, last writer
/// winning per key.
pub type Payload = serde_json::Map<String, Value>;

/// Shallow-merges `src` into `dst`, last writer winning per key.
pub(crate) fn merge_payload(dst: &mut Payload, src: Payload) {
    for (key, value) in src {
        dst.insert(key, value);
    }
}

// =============================================================================
// Context Identification
// =============================================================================

/// The tuple of scoping fields that names one logical message collection.
///
/// # What is a Context?
///
/// Every message belongs to exactly one collection: the messages of one
/// session, optionally narrowed to a topic and a thread within it. Two
/// mutations are only ever coalesced together when they target the same
/// message in the same context.
///
/// # Example
///
/// ```rust
/// use spool::types::ContextScope;
///
/// let scope = ContextScope::new("session-1")
///     .with_topic("topic-9")
///     .with_thread("thread-4");
/// let key = scope.key();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextScope {
    /// The owning session (or agent) id.
    pub session_id: String,

    /// The parent topic id, if the collection is topic-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,

    /// The thread id, if the collection is a single thread.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl ContextScope {
    /// Creates a scope covering a whole session.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            topic_id: None,
            thread_id: None,
        }
    }

    /// Narrows the scope to a topic (builder pattern).
    pub fn with_topic(mut self, topic_id: impl Into<String>) -> Self {
        self.topic_id = Some(topic_id.into());
        self
    }

    /// Narrows the scope to a thread (builder pattern).
    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Derives the deterministic partition key for this scope.
    ///
    /// # Injectivity
    ///
    /// Absent optional fields are encoded with an explicit `~` marker and
    /// every field is length-prefixed, so no two structurally different
    /// scopes can produce the same key. Without the length prefix,
    /// `("a|b", None)` and `("a", Some("b"))` would collide.
    pub fn key(&self) -> ContextKey {
        fn push_field(out: &mut String, field: Option<&str>) {
            out.push('|');
            match field {
                Some(value) => {
                    out.push_str(&value.len().to_string());
                    out.push(':');
                    out.push_str(value);
                }
                None => out.push('~'),
            }
        }

        let mut key = String::new();
        push_field(&mut key, Some(&self.session_id));
        push_field(&mut key, self.topic_id.as_deref());
        push_field(&mut key, self.thread_id.as_deref());
        ContextKey(key)
    }
}

/// The derived partition key for one message collection.
///
/// Both the optimistic cache and the pending operation table are partitioned
/// by this key. Operations on the same message id under different context
/// keys are never merged together.
///
/// # Rust Pattern: Newtype
///
/// `ContextKey` wraps the derived `String`. The only way to obtain one is
/// via [`ContextScope::key`] (or deserialization), so a raw string can never
/// sneak into a partition-keyed map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextKey(String);

impl ContextKey {
    /// Returns the string representation of this key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Message Identification
// =============================================================================

/// A client-side identifier for one message.
///
/// # Optimistic Creation
///
/// Ids are generated on the client (see [`IdProvider`](crate::ident::IdProvider))
/// before the server has seen the message, so the UI can render a created
/// message immediately. The same id is sent to the server, which accepts
/// caller-supplied ids on create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a message id from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// Tool State
// =============================================================================

/// The tool-execution state attached to a message.
///
/// Four independent fields, each overwritten wholesale by a patch that sets
/// it and left untouched by one that does not. The same type serves as the
/// stored state (on [`MessageSnapshot`]) and as the patch (in
/// [`Mutation::UpdateToolState`]); a field set to `None` in a patch means
/// "leave as is", never "clear".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolState {
    /// Rendered tool output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,

    /// Tool-level metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Opaque plugin state blob.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_state: Option<Value>,

    /// Plugin error, if the tool failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_error: Option<Value>,
}

impl ToolState {
    /// Overwrites each field that `patch` sets, field by field.
    pub fn merge_from(&mut self, patch: ToolState) {
        if let Some(content) = patch.content {
            self.content = Some(content);
        }
        if let Some(metadata) = patch.metadata {
            self.metadata = Some(metadata);
        }
        if let Some(plugin_state) = patch.plugin_state {
            self.plugin_state = Some(plugin_state);
        }
        if let Some(plugin_error) = patch.plugin_error {
            self.plugin_error = Some(plugin_error);
        }
    }

    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.metadata.is_none()
            && self.plugin_state.is_none()
            && self.plugin_error.is_none()
    }
}

// =============================================================================
// Mutations and Operations
// =============================================================================

/// One mutation kind with its typed payload.
///
/// # Rust Pattern: Tagged Union
///
/// Callers construct mutations through these variants (usually via the
/// [`Operation`] constructors or the engine's typed helpers), which keeps
/// the payload shape per kind explicit at the call site while the merge
/// algebra stays payload-agnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Mutation {
    /// Create a message with the given initial fields.
    Create(Payload),

    /// Shallow-merge the given fields into a message.
    Update(Payload),

    /// Delete a message.
    Delete,

    /// Shallow-merge the given keys into a message's metadata map.
    UpdateMetadata(Payload),

    /// Overwrite the set fields of a message's tool state.
    UpdateToolState(ToolState),
}

impl Mutation {
    /// Short kind name for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Mutation::Create(_) => "create",
            Mutation::Update(_) => "update",
            Mutation::Delete => "delete",
            Mutation::UpdateMetadata(_) => "update_metadata",
            Mutation::UpdateToolState(_) => "update_tool_state",
        }
    }
}

/// One caller-issued intent: a mutation targeting one message in one context.
///
/// Operations are immutable once issued. The dispatch path consumes them
/// into the pending table; [`materialize`](crate::pending::PendingTable)
/// emits fresh ones (the compacted net effect) for the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Partition this operation belongs to.
    pub context: ContextKey,

    /// The message this operation targets.
    pub message_id: MessageId,

    /// What to do. Serializes as a tagged `{kind, payload}` object.
    pub mutation: Mutation,
}

impl Operation {
    /// Creates an operation from parts.
    pub fn new(context: ContextKey, message_id: impl Into<MessageId>, mutation: Mutation) -> Self {
        Self {
            context,
            message_id: message_id.into(),
            mutation,
        }
    }

    /// A create operation.
    pub fn create(context: ContextKey, message_id: impl Into<MessageId>, payload: Payload) -> Self {
        Self::new(context, message_id, Mutation::Create(payload))
    }

    /// An update operation.
    pub fn update(context: ContextKey, message_id: impl Into<MessageId>, payload: Payload) -> Self {
        Self::new(context, message_id, Mutation::Update(payload))
    }

    /// A delete operation.
    pub fn delete(context: ContextKey, message_id: impl Into<MessageId>) -> Self {
        Self::new(context, message_id, Mutation::Delete)
    }

    /// A metadata update operation.
    pub fn update_metadata(
        context: ContextKey,
        message_id: impl Into<MessageId>,
        payload: Payload,
    ) -> Self {
        Self::new(context, message_id, Mutation::UpdateMetadata(payload))
    }

    /// A tool-state update operation.
    pub fn update_tool_state(
        context: ContextKey,
        message_id: impl Into<MessageId>,
        patch: ToolState,
    ) -> Self {
        Self::new(context, message_id, Mutation::UpdateToolState(patch))
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// A denormalized snapshot of one message's visible state.
///
/// This is what the optimistic cache stores and what callers render. It is
/// mutated in place by every dispatch targeting its context and replaced
/// wholesale only by an explicit backend read-through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    /// The message id.
    pub id: MessageId,

    /// Top-level visible fields (content, author, and so on).
    pub fields: Payload,

    /// Nested metadata map, merged key by key.
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub metadata: Payload,

    /// Tool-execution state.
    #[serde(default, skip_serializing_if = "ToolState::is_empty")]
    pub tool_state: ToolState,

    /// When the snapshot was created (Unix milliseconds, client clock).
    pub created_ms: u64,

    /// When the snapshot was last mutated (Unix milliseconds, client clock).
    pub updated_ms: u64,
}

impl MessageSnapshot {
    /// Builds the optimistic snapshot for a freshly created message.
    pub fn from_create(id: MessageId, fields: Payload) -> Self {
        let now_ms = current_time_ms();
        Self {
            id,
            fields,
            metadata: Payload::new(),
            tool_state: ToolState::default(),
            created_ms: now_ms,
            updated_ms: now_ms,
        }
    }

    /// Shallow-merges fields and stamps the updated-at marker.
    pub(crate) fn merge_fields(&mut self, partial: Payload) {
        merge_payload(&mut self.fields, partial);
        self.updated_ms = current_time_ms();
    }

    /// Shallow-merges metadata keys and stamps the updated-at marker.
    pub(crate) fn merge_metadata(&mut self, partial: Payload) {
        merge_payload(&mut self.metadata, partial);
        self.updated_ms = current_time_ms();
    }

    /// Applies a tool-state patch and stamps the updated-at marker.
    pub(crate) fn merge_tool_state(&mut self, patch: ToolState) {
        self.tool_state.merge_from(patch);
        self.updated_ms = current_time_ms();
    }
}

// =============================================================================
// Transport Reply
// =============================================================================

/// The persistence service's response to an applied batch.
///
/// The engine is fire-and-forget: it inspects only `success` (for logging)
/// and discards the canonical snapshots. They are part of the contract so a
/// higher layer implementing full resync can reuse the same transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReply {
    /// Canonical server-side snapshots for the affected messages.
    pub messages: Vec<MessageSnapshot>,

    /// Whether the server applied the whole batch.
    pub success: bool,
}

// =============================================================================
// Time
// =============================================================================

/// Current wall-clock time in Unix milliseconds.
pub(crate) fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object payload, got {other:?}"),
        }
    }

    #[test]
    fn test_context_key_deterministic() {
        let a = ContextScope::new("s1").with_topic("t1").key();
        let b = ContextScope::new("s1").with_topic("t1").key();
        assert_eq!(a, b, "equal scopes must derive equal keys");
    }

    #[test]
    fn test_context_key_distinguishes_optional_fields() {
        let session_only = ContextScope::new("s1").key();
        let with_topic = ContextScope::new("s1").with_topic("t1").key();
        let with_thread = ContextScope::new("s1").with_thread("t1").key();
        let empty_topic = ContextScope::new("s1").with_topic("").key();

        assert_ne!(session_only, with_topic);
        assert_ne!(session_only, empty_topic);
        assert_ne!(with_topic, with_thread, "topic and thread are distinct fields");
    }

    #[test]
    fn test_context_key_resists_separator_injection() {
        // Field values containing the separator must not let two different
        // scopes collide; the length prefix prevents it.
        let a = ContextScope::new("s|3:abc").key();
        let b = ContextScope::new("s").with_topic("abc").key();
        assert_ne!(a, b);
    }

    #[test]
    fn test_message_id_from_conversions() {
        let from_str: MessageId = "msg-1".into();
        let from_string: MessageId = String::from("msg-1").into();
        assert_eq!(from_str, from_string);
        assert_eq!(from_str.as_str(), "msg-1");
    }

    #[test]
    fn test_merge_payload_last_writer_wins() {
        let mut dst = payload(json!({"a": 1, "b": 2}));
        merge_payload(&mut dst, payload(json!({"b": 3, "c": 4})));
        assert_eq!(Value::Object(dst), json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn test_tool_state_merges_per_field() {
        let mut state = ToolState {
            content: Some(json!("old output")),
            metadata: Some(json!({"step": 1})),
            plugin_state: None,
            plugin_error: None,
        };

        state.merge_from(ToolState {
            content: Some(json!("new output")),
            plugin_error: Some(json!("boom")),
            ..ToolState::default()
        });

        assert_eq!(state.content, Some(json!("new output")));
        assert_eq!(state.metadata, Some(json!({"step": 1})), "unset fields keep their value");
        assert_eq!(state.plugin_error, Some(json!("boom")));
    }

    #[test]
    fn test_operation_wire_shape() {
        let ctx = ContextScope::new("s1").key();
        let op = Operation::create(ctx, "msg-1", payload(json!({"content": "hi"})));

        let wire = serde_json::to_value(&op).expect("serialize operation");
        assert_eq!(wire["message_id"], "msg-1");
        assert_eq!(wire["mutation"]["kind"], "create");
        assert_eq!(wire["mutation"]["payload"]["content"], "hi");

        let back: Operation = serde_json::from_value(wire).expect("deserialize operation");
        assert_eq!(back, op);
    }

    #[test]
    fn test_snapshot_from_create_stamps_clock() {
        let snap =
            MessageSnapshot::from_create(MessageId::new("msg-1"), payload(json!({"content": "hi"})));
        assert_eq!(snap.created_ms, snap.updated_ms);
        assert!(snap.metadata.is_empty());
        assert!(snap.tool_state.is_empty());
    }
}
