#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use spool::{
    BatchReply, ContextKey, ContextScope, IdProvider, MessageId, MessageSnapshot, Operation,
    Payload, Result, Spool, Transport,
};
use tokio::sync::Semaphore;

pub fn payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object payload, got {other:?}"),
    }
}

pub fn thread_ctx(session: &str, thread: &str) -> ContextKey {
    ContextScope::new(session).with_thread(thread).key()
}

pub async fn eventually<T>(
    timeout: Duration,
    interval: Duration,
    mut f: impl FnMut() -> Option<T>,
) -> T {
    let start = std::time::Instant::now();
    loop {
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(interval).await;
    }
}

/// Waits until the recorder has seen `count` batches, then returns them.
pub async fn eventually_batches(recorder: &RecordingTransport, count: usize) -> Vec<Vec<Operation>> {
    eventually(
        Duration::from_secs(2),
        Duration::from_millis(2),
        || {
            let batches = recorder.batches();
            (batches.len() >= count).then_some(batches)
        },
    )
    .await
}

/// Lets scheduled flushes and detached sends run, long enough that a flush
/// that was going to happen has happened.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}

// =============================================================================
// Transport doubles
// =============================================================================

/// Records every batch; optionally serves canned read-through results.
pub struct RecordingTransport {
    batches: Mutex<Vec<Vec<Operation>>>,
    fetch_results: Mutex<HashMap<ContextKey, Vec<MessageSnapshot>>>,
    fetch_calls: AtomicU64,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(Vec::new()),
            fetch_results: Mutex::new(HashMap::new()),
            fetch_calls: AtomicU64::new(0),
        })
    }

    pub fn batches(&self) -> Vec<Vec<Operation>> {
        self.batches.lock().expect("recorder lock").clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().expect("recorder lock").len()
    }

    pub fn set_fetch_result(&self, context: &ContextKey, messages: Vec<MessageSnapshot>) {
        self.fetch_results
            .lock()
            .expect("recorder lock")
            .insert(context.clone(), messages);
    }

    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn apply_batch(&self, operations: Vec<Operation>) -> Result<BatchReply> {
        self.batches.lock().expect("recorder lock").push(operations);
        Ok(BatchReply {
            messages: Vec::new(),
            success: true,
        })
    }

    async fn fetch_context(&self, context: &ContextKey) -> Result<Vec<MessageSnapshot>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .fetch_results
            .lock()
            .expect("recorder lock")
            .get(context)
            .cloned()
            .unwrap_or_default())
    }
}

/// Fails every call, counting attempts.
pub struct FailingTransport {
    attempts: AtomicU64,
}

impl FailingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicU64::new(0),
        })
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FailingTransport {
    async fn apply_batch(&self, _operations: Vec<Operation>) -> Result<BatchReply> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(spool::Error::Transport("injected failure".to_string()))
    }

    async fn fetch_context(&self, _context: &ContextKey) -> Result<Vec<MessageSnapshot>> {
        Err(spool::Error::Transport("injected failure".to_string()))
    }
}

/// Blocks inside `apply_batch` until released, to observe overlapping
/// flush cycles.
pub struct BlockingTransport {
    started: AtomicU64,
    finished: AtomicU64,
    gate: Semaphore,
}

impl BlockingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicU64::new(0),
            finished: AtomicU64::new(0),
            gate: Semaphore::new(0),
        })
    }

    pub fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> u64 {
        self.finished.load(Ordering::SeqCst)
    }

    /// Releases `count` blocked sends.
    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }
}

#[async_trait]
impl Transport for BlockingTransport {
    async fn apply_batch(&self, _operations: Vec<Operation>) -> Result<BatchReply> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.expect("gate closed");
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(BatchReply {
            messages: Vec::new(),
            success: true,
        })
    }

    async fn fetch_context(&self, _context: &ContextKey) -> Result<Vec<MessageSnapshot>> {
        Ok(Vec::new())
    }
}

// =============================================================================
// Id doubles
// =============================================================================

/// Deterministic ids: msg-1, msg-2, ...
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next: AtomicU64::new(1),
        })
    }
}

impl IdProvider for SequentialIds {
    fn fresh_id(&self) -> MessageId {
        MessageId::new(format!("msg-{}", self.next.fetch_add(1, Ordering::SeqCst)))
    }
}

// =============================================================================
// Engine constructors
// =============================================================================

pub fn recording_spool() -> (Spool, Arc<RecordingTransport>) {
    let transport = RecordingTransport::new();
    let spool = Spool::builder(transport.clone() as Arc<dyn Transport>)
        .id_provider(SequentialIds::new())
        .build();
    (spool, transport)
}

pub fn failing_spool() -> (Spool, Arc<FailingTransport>) {
    let transport = FailingTransport::new();
    let spool = Spool::builder(transport.clone() as Arc<dyn Transport>)
        .id_provider(SequentialIds::new())
        .build();
    (spool, transport)
}

pub fn blocking_spool() -> (Spool, Arc<BlockingTransport>) {
    let transport = BlockingTransport::new();
    let spool = Spool::builder(transport.clone() as Arc<dyn Transport>)
        .id_provider(SequentialIds::new())
        .build();
    (spool, transport)
}
