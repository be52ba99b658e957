//! # Coalescing Scheduler and Batch Sender
//!
//! This module decides *when* the pending table becomes a wire batch. The
//! discipline: every dispatch issued within one synchronous burst must land
//! in exactly one flush, and no flush may ever block a dispatch.
//!
//! ## The State Machine
//!
//! ```text
//!                first dispatch since last drain
//!              ┌────────────────────────────────┐
//!              │                                ▼
//!        ┌──────────┐                   ┌────────────────┐
//!        │   Idle   │                   │ FlushScheduled │──┐
//!        └──────────┘                   └────────────────┘  │ further
//!              ▲                                │           │ dispatches
//!              │        flusher wakes, drains,  │           │ merge only,
//!              └────────────────────────────────┘           │ no new wake
//!                 spawns the send, detached                 │
//!                                               ▲───────────┘
//! ```
//!
//! ## Why a Wake Channel?
//!
//! The reference behavior is "flush at the microtask boundary": after the
//! current synchronous call stack unwinds, before any timer or I/O
//! callback. The equivalent here is a dedicated flusher task woken through
//! an unbounded channel. Dispatch never awaits, so every dispatch in a
//! burst runs before the executor polls the flusher; the single buffered
//! wake then drains them all at once. One burst, one drain, one send.
//!
//! Unlike a timer-based group commit there is no batching window to tune:
//! the burst boundary is the executor's own scheduling boundary.
//!
//! ## Fire and Forget
//!
//! The flusher spawns each send as a detached task and immediately returns
//! to Idle, so a new cycle can start while the previous send is still in
//! flight. Two in-flight sends may reach the server out of order; the
//! engine trades strict cross-cycle ordering for dispatch latency, and the
//! optimistic cache carries the session's truth either way. A failed send
//! is logged and dropped, never retried and never re-enqueued: retrying
//! would risk re-sending payloads already superseded by newer dispatches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::pending::PendingTable;
use crate::transport::Transport;
use crate::types::Operation;

// =============================================================================
// Flush Core
// =============================================================================

/// The write-path state shared between the engine handle and the flusher:
/// the pending table, the one-bit scheduler state, and the transport.
pub(crate) struct FlushCore {
    /// Pending records, behind a single mutex (one per map, not per entry).
    pending: Mutex<PendingTable>,

    /// True while a flush is scheduled but has not yet drained.
    scheduled: AtomicBool,

    /// Delivery boundary, shared with detached send tasks.
    pub(crate) transport: Arc<dyn Transport>,
}

impl FlushCore {
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            pending: Mutex::new(PendingTable::new()),
            scheduled: AtomicBool::new(false),
            transport,
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingTable> {
        // Dispatch is contractually infallible; a poisoned lock still holds
        // a structurally sound table.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merges one operation and performs the Idle -> FlushScheduled
    /// transition if this is the first dispatch since the last drain.
    ///
    /// Synchronous and non-blocking; called from `dispatch`.
    pub(crate) fn enqueue(&self, op: Operation, wake: &mpsc::UnboundedSender<()>) {
        self.lock_pending().merge(op);

        if !self.scheduled.swap(true, Ordering::AcqRel) {
            // A send only fails when the flusher is gone, which only
            // happens while the engine itself is being torn down.
            let _ = wake.send(());
        }
    }

    /// FlushScheduled -> Idle: clears the flag, then materializes every
    /// touched context.
    ///
    /// The flag clears before the drain so a dispatch racing with the drain
    /// either lands in this batch or schedules the next one; it can never
    /// be stranded in the table with no wake pending.
    fn drain(&self) -> Vec<Operation> {
        self.scheduled.store(false, Ordering::Release);
        self.lock_pending().drain_all()
    }

    /// Number of pending records (observability and tests).
    pub(crate) fn pending_records(&self) -> usize {
        self.lock_pending().record_count()
    }
}

// =============================================================================
// Flusher Loop
// =============================================================================

/// Runs the flusher until every engine handle has been dropped.
///
/// One wake corresponds to at most one flush cycle. A wake that finds an
/// empty table (its operations were annihilated, or an adjacent cycle
/// already drained them) sends nothing.
///
/// When the wake channel closes, a final drain ships whatever the last
/// burst left behind; that last send is awaited so it is not torn down
/// with the task.
pub(crate) async fn run_flusher(core: Arc<FlushCore>, mut wake_rx: mpsc::UnboundedReceiver<()>) {
    while wake_rx.recv().await.is_some() {
        let operations = core.drain();
        if operations.is_empty() {
            continue;
        }

        trace!(operations = operations.len(), "flush cycle");

        // Detached: the flusher returns to Idle without waiting on the
        // network, so a new cycle can overlap this send.
        let transport = Arc::clone(&core.transport);
        tokio::spawn(send_batch(transport, operations));
    }

    let operations = core.drain();
    if !operations.is_empty() {
        trace!(operations = operations.len(), "final drain on shutdown");
        send_batch(Arc::clone(&core.transport), operations).await;
    }
}

// =============================================================================
// Batch Sender
// =============================================================================

/// Ships one flush cycle's batch; never returns an error to its caller.
///
/// Failures (and server-side rejections) are logged with the full operation
/// summary so the dropped batch can be identified, then discarded.
pub(crate) async fn send_batch(transport: Arc<dyn Transport>, operations: Vec<Operation>) {
    let summary: Vec<String> = operations
        .iter()
        .map(|op| format!("{} {}:{}", op.mutation.kind_name(), op.context, op.message_id))
        .collect();

    match transport.apply_batch(operations).await {
        Ok(reply) if reply.success => {
            trace!(operations = summary.len(), "batch applied");
        }
        Ok(_) => {
            warn!(operations = ?summary, "server rejected batch; operations dropped");
        }
        Err(error) => {
            warn!(%error, operations = ?summary, "batch send failed; operations dropped");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
