//! # Arbitration Layer
//!
//! Gates concurrent local mutation attempts against in-flight operations,
//! one gate per registered shadow.
//!
//! ## Single-Flight Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   At-Most-One-In-Flight-Write                           │
//! │                                                                         │
//! │  try_begin(op A)  ──► true    (gate was Idle, A is now pending)         │
//! │  try_begin(op B)  ──► false   (A unresolved - B is REJECTED, not        │
//! │                                queued; the caller reverts its UI        │
//! │                                control to the last confirmed value)    │
//! │  resolve(A.token) ──► Some(A) (gate back to Idle)                       │
//! │  resolve(A.token) ──► None    (second resolution is a no-op)            │
//! │  try_begin(op C)  ──► true                                              │
//! │                                                                         │
//! │  resolve() with a non-matching token always returns None, which is      │
//! │  the exactly-once primitive the timeout/accept race is built on:        │
//! │  whichever resolution lands first wins, the loser no-ops.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use umbra_core::AttributeMap;

use crate::protocol::CorrelationToken;

// =============================================================================
// Pending Operation
// =============================================================================

/// Operation kinds a shadow can have in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Fetch the shadow's current document.
    Get,
    /// Propose a partial desired-state change.
    Update,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Get => write!(f, "get"),
            OperationKind::Update => write!(f, "update"),
        }
    }
}

/// One outstanding get/update call for a specific shadow.
///
/// Created when the operation is issued; destroyed when its correlated
/// response (accepted, rejected, or synthesized timeout) arrives, or when
/// the owning shadow is unregistered.
#[derive(Debug)]
pub struct PendingOperation {
    /// Operation kind.
    pub kind: OperationKind,

    /// Correlation token the resolution must match.
    pub token: CorrelationToken,

    /// The locally proposed desired fragment (updates only).
    pub proposed: Option<AttributeMap>,

    /// When the operation was issued.
    pub issued_at: Instant,

    /// Deadline timer task; aborted when an accepted/rejected outcome
    /// resolves the operation first.
    pub timer: Option<JoinHandle<()>>,
}

impl PendingOperation {
    /// Creates a pending get.
    pub fn get(token: CorrelationToken) -> Self {
        PendingOperation {
            kind: OperationKind::Get,
            token,
            proposed: None,
            issued_at: Instant::now(),
            timer: None,
        }
    }

    /// Creates a pending update with its proposed fragment.
    pub fn update(token: CorrelationToken, proposed: AttributeMap) -> Self {
        PendingOperation {
            kind: OperationKind::Update,
            token,
            proposed: Some(proposed),
            issued_at: Instant::now(),
            timer: None,
        }
    }

    /// Aborts the deadline timer, if one is still attached.
    ///
    /// Must not be called from inside the timer task itself; the timeout
    /// path simply drops the handle instead.
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

// =============================================================================
// Operation Gate
// =============================================================================

/// Per-shadow single-flight gate guarding the `{state, PendingOperation}`
/// pair under one lock.
///
/// The gate *is* the state machine's state storage: an empty gate means
/// `Idle`, an occupied gate means `AwaitingResponse`. All transitions for a
/// shadow serialize on this mutex, which is never held across an await on
/// the transport.
#[derive(Debug, Default)]
pub struct OperationGate {
    pending: Mutex<Option<PendingOperation>>,
}

impl OperationGate {
    /// Creates an idle gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to begin a mutation.
    ///
    /// Returns `true` and records the pending operation only if the gate is
    /// currently idle; otherwise returns `false` and changes nothing. A
    /// `false` result means "operation rejected locally, do not apply the
    /// proposed change" - competing writes are never queued.
    pub async fn try_begin(&self, operation: PendingOperation) -> bool {
        let mut pending = self.pending.lock().await;
        if pending.is_some() {
            return false;
        }
        *pending = Some(operation);
        true
    }

    /// Attaches the deadline timer to the pending operation, if the token
    /// still matches (the operation may have resolved while the timer task
    /// was being spawned).
    ///
    /// Returns the handle back when it no longer belongs to anything, so
    /// the caller can abort the orphaned timer.
    pub async fn attach_timer(
        &self,
        token: &str,
        timer: JoinHandle<()>,
    ) -> Option<JoinHandle<()>> {
        let mut pending = self.pending.lock().await;
        match pending.as_mut() {
            Some(op) if op.token == token => {
                op.timer = Some(timer);
                None
            }
            _ => Some(timer),
        }
    }

    /// Returns true if the pending operation's token matches.
    ///
    /// Used to pre-check correlation before doing payload work; the
    /// authoritative check is still [`OperationGate::resolve`].
    pub async fn matches(&self, token: &str) -> bool {
        matches!(&*self.pending.lock().await, Some(op) if op.token == token)
    }

    /// Resolves the pending operation if the token matches.
    ///
    /// Exactly one caller can win: the first matching resolution takes the
    /// operation, every later attempt (stale response, raced timer) gets
    /// `None` and must treat it as a no-op.
    pub async fn resolve(&self, token: &str) -> Option<PendingOperation> {
        let mut pending = self.pending.lock().await;
        match &*pending {
            Some(op) if op.token == token => pending.take(),
            _ => None,
        }
    }

    /// Discards any pending operation unconditionally (unregistration path).
    ///
    /// The originator is NOT notified; it must independently time out or
    /// re-check on its own retry path.
    pub async fn force_clear(&self) -> Option<PendingOperation> {
        self.pending.lock().await.take()
    }

    /// Returns true if no operation is in flight.
    pub async fn is_idle(&self) -> bool {
        self.pending.lock().await.is_none()
    }

    /// Returns the kind of the in-flight operation, if any (for logging).
    pub async fn pending_kind(&self) -> Option<OperationKind> {
        self.pending.lock().await.as_ref().map(|op| op.kind)
    }
}
