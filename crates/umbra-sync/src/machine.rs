//! # Shadow Sync State Machine
//!
//! Per-shadow protocol engine: issues get/update requests, tracks in-flight
//! operation state, applies accepted/delta/rejected/timeout outcomes, and
//! notifies the owning application through its registered handler.
//!
//! ## State Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Shadow Sync State Machine                              │
//! │                                                                         │
//! │                 issue_get / issue_update                                │
//! │   ┌────────┐  ───────────────────────────►  ┌──────────────────┐       │
//! │   │  Idle  │                                │ AwaitingResponse │       │
//! │   └────────┘  ◄───────────────────────────  └──────────────────┘       │
//! │                accepted  → merge + notify          │    ▲              │
//! │                rejected  → notify (no merge)       │    │              │
//! │                timeout   → notify (no merge)       └────┘              │
//! │                                                  delta: merge + notify │
//! │                                                  (pending NOT cleared) │
//! │                                                                         │
//! │  CORRELATION RULE                                                      │
//! │  ────────────────                                                      │
//! │  accepted/rejected/timeout resolve the pending operation iff the       │
//! │  token matches; stale events are discarded silently. Delta events      │
//! │  are server-driven and processed regardless of token or state.        │
//! │                                                                         │
//! │  EXACTLY-ONCE RESOLUTION                                               │
//! │  ───────────────────────                                               │
//! │  The deadline timer and the network outcome race; whichever resolves   │
//! │  the gate first wins, the loser no-ops on the already-taken token.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use umbra_core::{AttributeMap, ShadowState};

use crate::arbitration::{OperationGate, PendingOperation};
use crate::error::{ShadowError, ShadowResult};
use crate::protocol::{CorrelationToken, OutcomeKind, ShadowEvent, StateFragments};
use crate::transport::TransportHandle;

// =============================================================================
// Application Handler Contract
// =============================================================================

/// Why a shadow operation failed without a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The endpoint refused the operation.
    Rejected,
    /// The deadline elapsed with no accepted/rejected response.
    Timeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Rejected => write!(f, "rejected"),
            FailureKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Callbacks the application registers per shadow.
///
/// Invoked from the engine's event-routing task; implementations must be
/// cheap or hand off to their own queue. Rollback of optimistic local
/// state on rejection is deliberately the caller's responsibility - the
/// engine never undoes a UI value on its own.
pub trait ShadowHandler: Send + Sync {
    /// Called after every accepted/delta transition with the attributes
    /// that were merged in that transition.
    fn on_shadow_update(&self, thing_name: &str, merged: &AttributeMap);

    /// Called after every rejected/timeout transition.
    fn on_operation_failed(&self, thing_name: &str, kind: FailureKind);
}

/// No-op handler for shadows that are only read through snapshots.
pub struct NoOpHandler;

impl ShadowHandler for NoOpHandler {
    fn on_shadow_update(&self, _thing_name: &str, _merged: &AttributeMap) {}
    fn on_operation_failed(&self, _thing_name: &str, _kind: FailureKind) {}
}

// =============================================================================
// State Machine
// =============================================================================

/// One state machine per registered shadow name.
///
/// The arbitration gate stores the machine's state: empty gate = `Idle`,
/// occupied gate = `AwaitingResponse`. Documents are mutated only here,
/// never from transport code; readers get cloned snapshots.
pub struct ShadowStateMachine {
    /// Name of the shadow (thing) this machine owns.
    thing_name: String,

    /// The shadow document, replaced wholesale on each merge so readers
    /// never observe a half-applied fragment.
    document: RwLock<ShadowState>,

    /// Application handler; swapped on re-registration.
    handler: RwLock<Arc<dyn ShadowHandler>>,

    /// Single-flight arbitration gate.
    gate: OperationGate,

    /// Transport for publishing operations.
    transport: TransportHandle,

    /// Deadline for each pending operation.
    op_timeout: Duration,
}

impl ShadowStateMachine {
    /// Creates an idle machine with an empty document.
    pub fn new(
        thing_name: &str,
        handler: Arc<dyn ShadowHandler>,
        transport: TransportHandle,
        op_timeout: Duration,
    ) -> Self {
        ShadowStateMachine {
            thing_name: thing_name.to_string(),
            document: RwLock::new(ShadowState::new()),
            handler: RwLock::new(handler),
            gate: OperationGate::new(),
            transport,
            op_timeout,
        }
    }

    /// Returns the shadow name.
    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    /// Returns true if no operation is in flight.
    pub async fn is_idle(&self) -> bool {
        self.gate.is_idle().await
    }

    /// Snapshot of the desired attribute map.
    pub async fn desired(&self) -> AttributeMap {
        self.document.read().await.desired().clone()
    }

    /// Snapshot of the reported attribute map.
    pub async fn reported(&self) -> AttributeMap {
        self.document.read().await.reported().clone()
    }

    /// Replaces the application handler without disturbing a pending
    /// operation (idempotent re-registration).
    pub async fn set_handler(&self, handler: Arc<dyn ShadowHandler>) {
        *self.handler.write().await = handler;
    }

    // =========================================================================
    // Issuing Operations
    // =========================================================================

    /// Issues an update proposing a partial desired-state change.
    ///
    /// Fails with [`ShadowError::OperationInFlight`] when the arbitration
    /// gate rejects the mutation; the caller must drop its proposed change
    /// (typically reverting a UI control to the last confirmed value).
    pub async fn issue_update(
        self: &Arc<Self>,
        fragment: AttributeMap,
    ) -> ShadowResult<CorrelationToken> {
        let token = self.transport.next_token();
        let pending = PendingOperation::update(token.clone(), fragment.clone());

        if !self.gate.try_begin(pending).await {
            let in_flight = self.gate.pending_kind().await;
            debug!(
                thing = %self.thing_name,
                ?in_flight,
                "Rejecting competing update"
            );
            return Err(ShadowError::OperationInFlight {
                thing_name: self.thing_name.clone(),
            });
        }

        if let Err(e) = self
            .transport
            .publish_update(&self.thing_name, fragment, &token)
            .await
        {
            // Publish never hit the wire: release the gate so the shadow
            // is not stuck awaiting a response that cannot come.
            if let Some(mut op) = self.gate.resolve(&token).await {
                op.cancel_timer();
            }
            return Err(e);
        }

        self.start_deadline(&token).await;
        info!(thing = %self.thing_name, token = %token, "Issued shadow update");
        Ok(token)
    }

    /// Issues a get for the shadow's current document.
    pub async fn issue_get(self: &Arc<Self>) -> ShadowResult<CorrelationToken> {
        let token = self.transport.next_token();
        let pending = PendingOperation::get(token.clone());

        if !self.gate.try_begin(pending).await {
            let in_flight = self.gate.pending_kind().await;
            debug!(
                thing = %self.thing_name,
                ?in_flight,
                "Rejecting competing get"
            );
            return Err(ShadowError::OperationInFlight {
                thing_name: self.thing_name.clone(),
            });
        }

        if let Err(e) = self.transport.publish_get(&self.thing_name, &token).await {
            if let Some(mut op) = self.gate.resolve(&token).await {
                op.cancel_timer();
            }
            return Err(e);
        }

        self.start_deadline(&token).await;
        info!(thing = %self.thing_name, token = %token, "Issued shadow get");
        Ok(token)
    }

    /// Spawns the deadline timer for a freshly issued operation.
    async fn start_deadline(self: &Arc<Self>, token: &str) {
        let machine = Arc::clone(self);
        let token_owned = token.to_string();
        let deadline = self.op_timeout;

        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            machine.synthesize_timeout(&token_owned).await;
        });

        if let Some(orphan) = self.gate.attach_timer(token, timer).await {
            // Operation already resolved while the timer was spawned.
            orphan.abort();
        }
    }

    // =========================================================================
    // Outcome Handling
    // =========================================================================

    /// Applies a correlated event routed by the registry.
    pub async fn handle_event(&self, event: ShadowEvent) {
        match event.outcome {
            OutcomeKind::Accepted => self.handle_accepted(&event).await,
            OutcomeKind::Rejected => self.handle_rejected(&event).await,
            OutcomeKind::Delta => self.handle_delta(&event).await,
            OutcomeKind::Timeout => {
                // Externally injected timeout (tests, custom transports):
                // safe to abort the still-sleeping internal timer.
                let token = event.token.as_deref().unwrap_or_default();
                self.resolve_failure(token, FailureKind::Timeout, true).await;
            }
        }
    }

    /// Accepted: merge the payload and resolve the pending operation.
    async fn handle_accepted(&self, event: &ShadowEvent) {
        let token = match event.token.as_deref() {
            Some(token) => token,
            None => {
                warn!(thing = %self.thing_name, "Accepted event without token, dropping");
                return;
            }
        };

        // Stale check before any payload work: an accepted event arriving
        // after this shadow's operation already resolved is discarded
        // silently (no state change, no handler notification).
        if !self.gate.matches(token).await {
            debug!(thing = %self.thing_name, token = %token, "Discarding stale accepted event");
            return;
        }

        let fragments = match StateFragments::parse(&event.document) {
            Ok(fragments) => fragments,
            Err(e) => {
                // Schema errors drop the event without a transition; the
                // deadline timer will eventually resolve the operation.
                warn!(thing = %self.thing_name, %e, "Dropping malformed accepted payload");
                return;
            }
        };

        // Stage the merge while holding the document lock, but commit only
        // after winning resolution: a racing deadline timer must leave the
        // document untouched. Lock order is document then gate; the failure
        // paths take the gate alone.
        let mut doc = self.document.write().await;
        let mut staged = doc.clone();
        let merged = match Self::stage(&mut staged, &fragments) {
            Ok(merged) => merged,
            Err(e) => {
                // Schema conflict: no transition, the operation stays
                // pending for the deadline timer.
                warn!(thing = %self.thing_name, %e, "Dropping accepted payload on schema conflict");
                return;
            }
        };

        let Some(mut op) = self.gate.resolve(token).await else {
            // Lost the race against the deadline timer between the token
            // pre-check and here; the failure side already notified, so
            // stay silent and discard the staged merge.
            debug!(thing = %self.thing_name, token = %token, "Accepted event lost resolution race");
            return;
        };

        *doc = staged;
        drop(doc);

        op.cancel_timer();
        info!(
            thing = %self.thing_name,
            token = %token,
            kind = %op.kind,
            "Shadow operation accepted"
        );
        self.handler
            .read()
            .await
            .on_shadow_update(&self.thing_name, &merged);
    }

    /// Rejected: resolve without any merge. Local optimistic state is NOT
    /// rolled back here - that is the caller's explicit responsibility.
    async fn handle_rejected(&self, event: &ShadowEvent) {
        let token = event.token.as_deref().unwrap_or_default();
        warn!(
            thing = %self.thing_name,
            token = %token,
            detail = %event.document,
            "Shadow operation rejected"
        );
        self.resolve_failure(token, FailureKind::Rejected, true).await;
    }

    /// Delta: merge and notify without touching the pending operation.
    ///
    /// Deltas are server-driven and uncorrelated by design; one arriving
    /// before the accepted response of the same operation is valid and must
    /// not terminate it.
    async fn handle_delta(&self, event: &ShadowEvent) {
        let fragments = match StateFragments::parse(&event.document) {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!(thing = %self.thing_name, %e, "Dropping malformed delta payload");
                return;
            }
        };

        let merged = match self.merge_fragments(&fragments).await {
            Ok(merged) => merged,
            Err(e) => {
                warn!(thing = %self.thing_name, %e, "Dropping delta on schema conflict");
                return;
            }
        };

        debug!(thing = %self.thing_name, attrs = merged.len(), "Merged shadow delta");
        self.handler
            .read()
            .await
            .on_shadow_update(&self.thing_name, &merged);
    }

    /// Deadline timer path. Runs inside the timer task itself, so the
    /// pending operation's handle is dropped rather than aborted.
    async fn synthesize_timeout(&self, token: &str) {
        self.resolve_failure(token, FailureKind::Timeout, false).await;
    }

    /// Resolves the pending operation as a failure and notifies the handler.
    ///
    /// A non-matching token is a no-op: the operation already resolved and
    /// this is the losing side of the race.
    async fn resolve_failure(&self, token: &str, kind: FailureKind, abort_timer: bool) {
        let Some(mut op) = self.gate.resolve(token).await else {
            debug!(
                thing = %self.thing_name,
                token = %token,
                outcome = %kind,
                "Discarding stale failure event"
            );
            return;
        };

        if abort_timer {
            op.cancel_timer();
        } else {
            // Timeout path: this IS the timer task; just detach the handle.
            op.timer.take();
        }

        if kind == FailureKind::Timeout {
            warn!(
                thing = %self.thing_name,
                token = %token,
                kind = %op.kind,
                "Shadow operation timed out"
            );
        }

        self.handler
            .read()
            .await
            .on_operation_failed(&self.thing_name, kind);
    }

    /// Applies both fragments to a staged copy, leaving it untouched on a
    /// schema error.
    ///
    /// Returns the attributes to hand to the handler: the desired fragment
    /// when present (applications drive their views from desired state),
    /// otherwise the reported fragment.
    fn stage(
        staged: &mut ShadowState,
        fragments: &StateFragments,
    ) -> Result<AttributeMap, umbra_core::SchemaError> {
        let applied_desired = match &fragments.desired {
            Some(fragment) => Some(staged.apply_desired(fragment)?),
            None => None,
        };
        let applied_reported = match &fragments.reported {
            Some(fragment) => Some(staged.apply_reported(fragment)?),
            None => None,
        };

        Ok(applied_desired
            .filter(|d| !d.is_empty())
            .or(applied_reported)
            .unwrap_or_default())
    }

    /// Staged merge with an immediate commit: the document is replaced
    /// wholesale, so readers and failed merges never observe a partial
    /// application.
    async fn merge_fragments(
        &self,
        fragments: &StateFragments,
    ) -> Result<AttributeMap, umbra_core::SchemaError> {
        let mut doc = self.document.write().await;
        let mut staged = doc.clone();
        let merged = Self::stage(&mut staged, fragments)?;
        *doc = staged;
        Ok(merged)
    }

    /// Discards any pending operation without notification (unregistration).
    pub async fn discard_pending(&self) {
        if let Some(mut op) = self.gate.force_clear().await {
            debug!(
                thing = %self.thing_name,
                token = %op.token,
                kind = %op.kind,
                "Discarding in-flight operation without notification"
            );
            op.cancel_timer();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every handler invocation for assertions.
    #[derive(Default)]
    struct RecordingHandler {
        updates: Mutex<Vec<(String, AttributeMap)>>,
        failures: Mutex<Vec<(String, FailureKind)>>,
    }

    impl ShadowHandler for RecordingHandler {
        fn on_shadow_update(&self, thing_name: &str, merged: &AttributeMap) {
            self.updates
                .lock()
                .unwrap()
                .push((thing_name.to_string(), merged.clone()));
        }

        fn on_operation_failed(&self, thing_name: &str, kind: FailureKind) {
            self.failures
                .lock()
                .unwrap()
                .push((thing_name.to_string(), kind));
        }
    }

    fn obj(value: serde_json::Value) -> AttributeMap {
        value.as_object().unwrap().clone()
    }

    /// The peer must stay alive for the test's duration so publishes do
    /// not fail on a closed channel.
    fn machine_with_timeout(
        op_timeout: Duration,
    ) -> (
        Arc<ShadowStateMachine>,
        Arc<RecordingHandler>,
        crate::transport::DetachedPeer,
    ) {
        let (handle, peer, _event_rx, _status_rx) = Transport::detached("test");
        let handler = Arc::new(RecordingHandler::default());
        let machine = Arc::new(ShadowStateMachine::new(
            "TemperatureControl",
            handler.clone(),
            handle,
            op_timeout,
        ));
        (machine, handler, peer)
    }

    fn machine() -> (
        Arc<ShadowStateMachine>,
        Arc<RecordingHandler>,
        crate::transport::DetachedPeer,
    ) {
        machine_with_timeout(Duration::from_secs(10))
    }

    fn accepted_event(token: &str, document: serde_json::Value) -> ShadowEvent {
        ShadowEvent {
            thing_name: "TemperatureControl".into(),
            outcome: OutcomeKind::Accepted,
            token: Some(token.to_string()),
            document,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_accepted_end_to_end() {
        let (machine, handler, _peer) = machine();

        let fragment = obj(json!({"setPoint": 72, "enabled": true}));
        let token = machine.issue_update(fragment.clone()).await.unwrap();
        assert!(!machine.is_idle().await);

        machine
            .handle_event(accepted_event(
                &token,
                json!({"state": {"desired": {"setPoint": 72, "enabled": true}}}),
            ))
            .await;

        assert!(machine.is_idle().await);
        assert_eq!(machine.desired().await, fragment);

        let updates = handler.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "TemperatureControl");
        assert_eq!(updates[0].1, fragment);
        assert!(handler.failures.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_leaves_document_unchanged() {
        let (machine, handler, _peer) = machine();

        let token = machine
            .issue_update(obj(json!({"setPoint": 72, "enabled": true})))
            .await
            .unwrap();

        machine
            .handle_event(ShadowEvent {
                thing_name: "TemperatureControl".into(),
                outcome: OutcomeKind::Rejected,
                token: Some(token),
                document: json!({"code": "400", "message": "no"}),
            })
            .await;

        assert!(machine.is_idle().await);
        assert!(machine.desired().await.is_empty());
        assert!(handler.updates.lock().unwrap().is_empty());
        assert_eq!(
            *handler.failures.lock().unwrap(),
            vec![("TemperatureControl".to_string(), FailureKind::Rejected)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delta_does_not_clear_pending() {
        let (machine, handler, _peer) = machine();

        let token = machine
            .issue_update(obj(json!({"setPoint": 72})))
            .await
            .unwrap();

        machine
            .handle_event(ShadowEvent {
                thing_name: "TemperatureControl".into(),
                outcome: OutcomeKind::Delta,
                token: None,
                document: json!({"state": {"setPoint": 70}}),
            })
            .await;

        // Delta merged and notified, but the operation is still in flight
        assert!(!machine.is_idle().await);
        assert_eq!(handler.updates.lock().unwrap().len(), 1);
        assert!(matches!(
            machine.issue_update(obj(json!({"setPoint": 75}))).await,
            Err(ShadowError::OperationInFlight { .. })
        ));

        // The original operation still resolves normally
        machine
            .handle_event(accepted_event(
                &token,
                json!({"state": {"desired": {"setPoint": 72}}}),
            ))
            .await;
        assert!(machine.is_idle().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_token_discarded_silently() {
        let (machine, handler, _peer) = machine();

        // Idle machine: any accepted event is stale
        machine
            .handle_event(accepted_event(
                "nobody",
                json!({"state": {"desired": {"setPoint": 99}}}),
            ))
            .await;
        assert!(machine.desired().await.is_empty());
        assert!(handler.updates.lock().unwrap().is_empty());

        // Awaiting machine: a non-matching token must not resolve
        let token = machine
            .issue_update(obj(json!({"setPoint": 72})))
            .await
            .unwrap();
        machine
            .handle_event(accepted_event(
                "someone-else",
                json!({"state": {"desired": {"setPoint": 99}}}),
            ))
            .await;
        assert!(!machine.is_idle().await);
        assert!(machine.desired().await.is_empty());
        assert!(handler.updates.lock().unwrap().is_empty());

        machine
            .handle_event(accepted_event(
                &token,
                json!({"state": {"desired": {"setPoint": 72}}}),
            ))
            .await;
        assert!(machine.is_idle().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_synthesizes_timeout() {
        let (machine, handler, _peer) = machine_with_timeout(Duration::from_millis(100));

        machine
            .issue_update(obj(json!({"setPoint": 72})))
            .await
            .unwrap();
        assert!(!machine.is_idle().await);

        // Paused clock auto-advances past the deadline
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(machine.is_idle().await);
        assert!(machine.desired().await.is_empty());
        assert_eq!(
            *handler.failures.lock().unwrap(),
            vec![("TemperatureControl".to_string(), FailureKind::Timeout)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_wins_race_then_late_accept_is_noop() {
        let (machine, handler, _peer) = machine_with_timeout(Duration::from_millis(100));

        let token = machine
            .issue_update(obj(json!({"setPoint": 72})))
            .await
            .unwrap();

        // The deadline timer wins the race
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(machine.is_idle().await);
        assert_eq!(
            *handler.failures.lock().unwrap(),
            vec![("TemperatureControl".to_string(), FailureKind::Timeout)]
        );

        // The late accepted response with the original token is a no-op:
        // no merge, no second notification
        machine
            .handle_event(accepted_event(
                &token,
                json!({"state": {"desired": {"setPoint": 72}}}),
            ))
            .await;

        assert!(machine.is_idle().await);
        assert!(machine.desired().await.is_empty());
        assert!(handler.updates.lock().unwrap().is_empty());
        assert_eq!(handler.failures.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_issue_operations_run_on_spawned_tasks() {
        let (machine, _handler, _peer) = machine();

        // Issue paths are spawned by the post-connect fetch task, so their
        // futures must be Send
        let worker = Arc::clone(&machine);
        let token = tokio::spawn(async move {
            worker.issue_update(obj(json!({"setPoint": 72}))).await
        })
        .await
        .unwrap()
        .unwrap();
        assert!(!token.is_empty());

        let worker = Arc::clone(&machine);
        let competing = tokio::spawn(async move { worker.issue_get().await })
            .await
            .unwrap();
        assert!(matches!(
            competing,
            Err(ShadowError::OperationInFlight { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_accept_race_resolves_exactly_once() {
        let (machine, handler, _peer) = machine_with_timeout(Duration::from_secs(10));

        let token = machine
            .issue_update(obj(json!({"setPoint": 72})))
            .await
            .unwrap();

        // Accepted wins the race
        machine
            .handle_event(accepted_event(
                &token,
                json!({"state": {"desired": {"setPoint": 72}}}),
            ))
            .await;
        assert!(machine.is_idle().await);

        // Let the deadline pass: the (aborted or no-op) timer must not
        // produce a second resolution
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(handler.updates.lock().unwrap().len(), 1);
        assert!(handler.failures.lock().unwrap().is_empty());

        // And an explicitly injected late timeout is equally a no-op
        machine
            .handle_event(ShadowEvent {
                thing_name: "TemperatureControl".into(),
                outcome: OutcomeKind::Timeout,
                token: Some(token),
                document: json!({}),
            })
            .await;
        assert!(handler.failures.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schema_error_does_not_transition() {
        let (machine, handler, _peer) = machine();

        let token = machine
            .issue_update(obj(json!({"setPoint": 72})))
            .await
            .unwrap();

        // Malformed payload: dropped, still awaiting
        machine
            .handle_event(accepted_event(&token, json!({"noState": true})))
            .await;
        assert!(!machine.is_idle().await);
        assert!(handler.updates.lock().unwrap().is_empty());

        // Well-formed retransmission still resolves the same operation
        machine
            .handle_event(accepted_event(
                &token,
                json!({"state": {"desired": {"setPoint": 72}}}),
            ))
            .await;
        assert!(machine.is_idle().await);
        assert_eq!(handler.updates.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_response_merges_both_subdocuments() {
        let (machine, handler, _peer) = machine();

        let token = machine.issue_get().await.unwrap();
        machine
            .handle_event(accepted_event(
                &token,
                json!({
                    "state": {
                        "desired": {"setPoint": 72, "enabled": true},
                        "reported": {"intTemp": 70, "extTemp": 45, "curState": "heating"}
                    }
                }),
            ))
            .await;

        assert!(machine.is_idle().await);
        assert_eq!(machine.desired().await["setPoint"], 72);
        assert_eq!(machine.reported().await["curState"], "heating");

        // Notification carries the desired fragment
        let updates = handler.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1["setPoint"], 72);
    }
}
