//! # Shadow Registry
//!
//! Maps shadow names to their state machines and routes inbound events to
//! the owning machine.
//!
//! ## Registration Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Shadow Registry                                   │
//! │                                                                         │
//! │  register("TemperatureControl", handler)                                │
//! │    ├── unknown name  → new idle machine + transport subscribe           │
//! │    └── known name    → handler swapped IN PLACE (idempotent):           │
//! │                        document and any pending operation survive       │
//! │                                                                         │
//! │  unregister("TemperatureControl")                                       │
//! │    └── machine dropped, pending operation DISCARDED without             │
//! │        notification, unsubscribe sent fire-and-forget                   │
//! │                                                                         │
//! │  route_event(event)                                                     │
//! │    ├── name registered  → machine.handle_event(event)                   │
//! │    └── name unknown     → logged and dropped (orphan event)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use umbra_core::validate_shadow_name;

use crate::error::ShadowResult;
use crate::machine::{ShadowHandler, ShadowStateMachine};
use crate::protocol::ShadowEvent;
use crate::transport::TransportHandle;

/// Registry of all shadows this client tracks.
///
/// Shared between the application-facing client API and the event-routing
/// task; every lookup clones the machine's `Arc`, so the registry lock is
/// never held across event handling.
pub struct ShadowRegistry {
    shadows: RwLock<HashMap<String, Arc<ShadowStateMachine>>>,
    transport: TransportHandle,
    op_timeout: Duration,
}

impl ShadowRegistry {
    /// Creates an empty registry.
    pub fn new(transport: TransportHandle, op_timeout: Duration) -> Self {
        ShadowRegistry {
            shadows: RwLock::new(HashMap::new()),
            transport,
            op_timeout,
        }
    }

    /// Registers a shadow by name, subscribing to its topics.
    ///
    /// Re-registering an existing name only swaps the handler; the shadow's
    /// document and any in-flight operation are preserved.
    pub async fn register(
        &self,
        thing_name: &str,
        handler: Arc<dyn ShadowHandler>,
    ) -> ShadowResult<Arc<ShadowStateMachine>> {
        validate_shadow_name(thing_name)?;

        {
            let shadows = self.shadows.read().await;
            if let Some(machine) = shadows.get(thing_name) {
                debug!(thing = %thing_name, "Re-registering shadow, swapping handler");
                machine.set_handler(handler).await;
                return Ok(Arc::clone(machine));
            }
        }

        let machine = Arc::new(ShadowStateMachine::new(
            thing_name,
            Arc::clone(&handler),
            self.transport.clone(),
            self.op_timeout,
        ));

        // Double-check under the write lock: a concurrent register for the
        // same name may have won.
        let raced = {
            let mut shadows = self.shadows.write().await;
            match shadows.get(thing_name) {
                Some(existing) => Some(Arc::clone(existing)),
                None => {
                    shadows.insert(thing_name.to_string(), Arc::clone(&machine));
                    None
                }
            }
        };

        // The losing register still behaves like a re-registration: its
        // handler replaces the stored one.
        if let Some(existing) = raced {
            debug!(thing = %thing_name, "Lost register race, swapping handler");
            existing.set_handler(handler).await;
            return Ok(existing);
        }

        // Subscription failures are non-fatal while disconnected: the
        // resubscribe pass on the next connect covers the shadow.
        if let Err(e) = self.transport.subscribe(thing_name).await {
            debug!(thing = %thing_name, %e, "Deferred subscribe until reconnect");
        }

        info!(thing = %thing_name, "Registered shadow");
        Ok(machine)
    }

    /// Unregisters a shadow, discarding any pending operation without
    /// notification. Unknown names are a no-op.
    pub async fn unregister(&self, thing_name: &str) {
        let removed = self.shadows.write().await.remove(thing_name);
        match removed {
            Some(machine) => {
                machine.discard_pending().await;
                if let Err(e) = self.transport.unsubscribe(thing_name).await {
                    debug!(thing = %thing_name, %e, "Unsubscribe not delivered");
                }
                info!(thing = %thing_name, "Unregistered shadow");
            }
            None => {
                debug!(thing = %thing_name, "Unregister for unknown shadow ignored");
            }
        }
    }

    /// Returns the machine for a registered shadow.
    pub async fn get(&self, thing_name: &str) -> Option<Arc<ShadowStateMachine>> {
        self.shadows.read().await.get(thing_name).cloned()
    }

    /// Routes an inbound event to the owning machine. Events for unknown
    /// shadows are logged and dropped.
    pub async fn route_event(&self, event: ShadowEvent) {
        let machine = self.get(&event.thing_name).await;
        match machine {
            Some(machine) => machine.handle_event(event).await,
            None => {
                warn!(
                    thing = %event.thing_name,
                    outcome = %event.outcome,
                    "Dropping event for unregistered shadow"
                );
            }
        }
    }

    /// Re-sends subscriptions for every registered shadow (reconnect path).
    pub async fn resubscribe_all(&self) {
        for name in self.registered_names().await {
            if let Err(e) = self.transport.subscribe(&name).await {
                warn!(thing = %name, %e, "Resubscribe failed");
            }
        }
    }

    /// Names of all registered shadows.
    pub async fn registered_names(&self) -> Vec<String> {
        self.shadows.read().await.keys().cloned().collect()
    }

    /// Number of registered shadows.
    pub async fn len(&self) -> usize {
        self.shadows.read().await.len()
    }

    /// Returns true if no shadow is registered.
    pub async fn is_empty(&self) -> bool {
        self.shadows.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::NoOpHandler;
    use crate::protocol::{OutcomeKind, ShadowMessage};
    use crate::transport::{DetachedPeer, Transport};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use umbra_core::AttributeMap;

    /// Counts shadow-update callbacks, for handler-swap assertions.
    #[derive(Default)]
    struct CountingHandler {
        updates: AtomicUsize,
    }

    impl crate::machine::ShadowHandler for CountingHandler {
        fn on_shadow_update(&self, _thing_name: &str, _merged: &AttributeMap) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }

        fn on_operation_failed(&self, _thing_name: &str, _kind: crate::machine::FailureKind) {}
    }

    fn registry() -> (ShadowRegistry, DetachedPeer) {
        let (handle, peer, _event_rx, _status_rx) = Transport::detached("test");
        (
            ShadowRegistry::new(handle, Duration::from_secs(10)),
            peer,
        )
    }

    fn fragment() -> AttributeMap {
        json!({"setPoint": 72}).as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_register_subscribes_and_tracks() {
        let (registry, mut peer) = registry();

        registry
            .register("TemperatureControl", Arc::new(NoOpHandler))
            .await
            .unwrap();
        registry
            .register("TemperatureStatus", Arc::new(NoOpHandler))
            .await
            .unwrap();

        assert_eq!(registry.len().await, 2);

        let mut names = registry.registered_names().await;
        names.sort();
        assert_eq!(names, vec!["TemperatureControl", "TemperatureStatus"]);

        // Both subscriptions hit the wire
        let first = peer.outgoing.recv().await.unwrap();
        assert!(matches!(first, ShadowMessage::Subscribe(_)));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_names() {
        let (registry, _peer) = registry();
        assert!(registry.register("", Arc::new(NoOpHandler)).await.is_err());
        assert!(registry
            .register("bad name", Arc::new(NoOpHandler))
            .await
            .is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_reregister_preserves_pending_operation() {
        let (registry, _peer) = registry();

        let machine = registry
            .register("TemperatureControl", Arc::new(NoOpHandler))
            .await
            .unwrap();
        machine.issue_update(fragment()).await.unwrap();
        assert!(!machine.is_idle().await);

        // Idempotent re-registration swaps the handler only
        let again = registry
            .register("TemperatureControl", Arc::new(NoOpHandler))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&machine, &again));
        assert!(!again.is_idle().await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_reregister_installs_the_new_handler() {
        let (registry, _peer) = registry();

        let first = Arc::new(CountingHandler::default());
        let second = Arc::new(CountingHandler::default());

        registry
            .register("TemperatureControl", first.clone())
            .await
            .unwrap();
        registry
            .register("TemperatureControl", second.clone())
            .await
            .unwrap();

        registry
            .route_event(ShadowEvent {
                thing_name: "TemperatureControl".into(),
                outcome: OutcomeKind::Delta,
                token: None,
                document: json!({"state": {"setPoint": 68}}),
            })
            .await;

        // Only the handler from the latest register observes the merge
        assert_eq!(first.updates.load(Ordering::SeqCst), 0);
        assert_eq!(second.updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregister_discards_pending_silently() {
        let (registry, _peer) = registry();

        let machine = registry
            .register("TemperatureControl", Arc::new(NoOpHandler))
            .await
            .unwrap();
        machine.issue_update(fragment()).await.unwrap();

        registry.unregister("TemperatureControl").await;
        assert!(registry.is_empty().await);
        assert!(machine.is_idle().await);

        // Unknown name is a no-op
        registry.unregister("TemperatureControl").await;
    }

    #[tokio::test]
    async fn test_orphan_events_are_dropped() {
        let (registry, _peer) = registry();

        // No panic, no registration side effects
        registry
            .route_event(ShadowEvent {
                thing_name: "Nobody".into(),
                outcome: OutcomeKind::Delta,
                token: None,
                document: json!({"state": {"setPoint": 70}}),
            })
            .await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_route_event_reaches_owning_machine() {
        let (registry, _peer) = registry();

        let machine = registry
            .register("TemperatureControl", Arc::new(NoOpHandler))
            .await
            .unwrap();

        registry
            .route_event(ShadowEvent {
                thing_name: "TemperatureControl".into(),
                outcome: OutcomeKind::Delta,
                token: None,
                document: json!({"state": {"setPoint": 68}}),
            })
            .await;

        assert_eq!(machine.desired().await["setPoint"], 68);
    }
}
