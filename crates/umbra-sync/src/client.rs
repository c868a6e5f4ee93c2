//! # Shadow Client
//!
//! Application-facing entry point: owns the transport, the registry, and
//! the background tasks that route events and react to connection changes.
//!
//! ## Orchestration
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Shadow Client                                   │
//! │                                                                         │
//! │   application ──► register / update_shadow / get_shadow / snapshots     │
//! │                                                                         │
//! │   event task:   transport events ──► registry.route_event               │
//! │   status task:  transport statuses ──► watch channel                    │
//! │                     └── on Connected:                                   │
//! │                           resubscribe every registered shadow,          │
//! │                           then (after fetch_delay) issue a get per      │
//! │                           shadow so documents converge after an         │
//! │                           outage                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let config = ShadowConfig::load_or_default();
//! let client = ShadowClient::connect(&config)?;
//!
//! client.register("TemperatureControl", Arc::new(MyHandler)).await?;
//! client.wait_until_connected(Duration::from_secs(30)).await?;
//!
//! let fragment = json!({"setPoint": 72}).as_object().unwrap().clone();
//! match client.update_shadow("TemperatureControl", fragment).await {
//!     Ok(token) => debug!(%token, "update in flight"),
//!     Err(ShadowError::OperationInFlight { .. }) => revert_ui_control(),
//!     Err(e) => warn!(%e, "update failed"),
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use umbra_core::AttributeMap;

use crate::config::ShadowConfig;
use crate::error::{ShadowError, ShadowResult};
use crate::machine::ShadowHandler;
use crate::protocol::{CorrelationToken, ShadowEvent};
use crate::registry::ShadowRegistry;
use crate::transport::{ConnectionStatus, Transport, TransportHandle};

/// Tuning knobs for the sync engine, independent of the transport.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Deadline for each get/update operation.
    pub op_timeout: Duration,

    /// Fetch every registered shadow's document after each connect.
    pub fetch_on_connect: bool,

    /// Delay between the connected transition and the fetch pass.
    pub fetch_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            op_timeout: Duration::from_millis(10_000),
            fetch_on_connect: true,
            fetch_delay: Duration::from_millis(2_500),
        }
    }
}

impl From<&ShadowConfig> for SyncOptions {
    fn from(config: &ShadowConfig) -> Self {
        SyncOptions {
            op_timeout: config.operation_timeout(),
            fetch_on_connect: config.shadow.fetch_on_connect,
            fetch_delay: config.fetch_delay(),
        }
    }
}

/// Shadow synchronization client.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct ShadowClient {
    registry: Arc<ShadowRegistry>,
    transport: TransportHandle,
    status_rx: watch::Receiver<ConnectionStatus>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShadowClient {
    /// Validates the configuration, spawns the WebSocket transport, and
    /// starts the engine.
    pub fn connect(config: &ShadowConfig) -> ShadowResult<Self> {
        config.validate()?;
        let (handle, event_rx, status_rx) = Transport::spawn(config.transport_config());
        Ok(Self::with_transport(
            handle,
            event_rx,
            status_rx,
            SyncOptions::from(config),
        ))
    }

    /// Starts the engine on an existing transport.
    ///
    /// This is the seam for tests and for embedders that bring their own
    /// transport (see [`Transport::detached`]).
    pub fn with_transport(
        transport: TransportHandle,
        mut event_rx: mpsc::Receiver<ShadowEvent>,
        mut transport_status_rx: mpsc::Receiver<ConnectionStatus>,
        options: SyncOptions,
    ) -> Self {
        let registry = Arc::new(ShadowRegistry::new(transport.clone(), options.op_timeout));
        let (watch_tx, watch_rx) = watch::channel(ConnectionStatus::Disconnected);

        // Event router: every inbound event goes to its owning machine.
        let router_registry = Arc::clone(&registry);
        let event_task = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                router_registry.route_event(event).await;
            }
            debug!("Event stream closed, router stopping");
        });

        // Status watcher: mirror transitions into the watch channel and run
        // the reconnect ritual on every Connected.
        let status_registry = Arc::clone(&registry);
        let fetch_on_connect = options.fetch_on_connect;
        let fetch_delay = options.fetch_delay;
        let status_task = tokio::spawn(async move {
            while let Some(status) = transport_status_rx.recv().await {
                debug!(%status, "Connection status changed");
                watch_tx.send_replace(status);

                if status == ConnectionStatus::Connected {
                    status_registry.resubscribe_all().await;

                    if fetch_on_connect {
                        let fetch_registry = Arc::clone(&status_registry);
                        tokio::spawn(async move {
                            // Give the endpoint time to settle the fresh
                            // subscriptions before asking for documents.
                            tokio::time::sleep(fetch_delay).await;
                            fetch_all(&fetch_registry).await;
                        });
                    }
                }
            }
            debug!("Status stream closed, watcher stopping");
        });

        ShadowClient {
            registry,
            transport,
            status_rx: watch_rx,
            tasks: Mutex::new(vec![event_task, status_task]),
        }
    }

    // =========================================================================
    // Shadow Lifecycle
    // =========================================================================

    /// Registers a shadow and its handler. Idempotent: re-registering an
    /// existing name only swaps the handler.
    pub async fn register(
        &self,
        thing_name: &str,
        handler: Arc<dyn ShadowHandler>,
    ) -> ShadowResult<()> {
        self.registry.register(thing_name, handler).await?;
        Ok(())
    }

    /// Unregisters a shadow, silently discarding any pending operation.
    pub async fn unregister(&self, thing_name: &str) {
        self.registry.unregister(thing_name).await;
    }

    /// Names of all registered shadows.
    pub async fn registered_shadows(&self) -> Vec<String> {
        self.registry.registered_names().await
    }

    // =========================================================================
    // Shadow Operations
    // =========================================================================

    /// Proposes a partial desired-state change for a registered shadow.
    ///
    /// Returns the correlation token of the in-flight operation. Fails with
    /// [`ShadowError::OperationInFlight`] when another operation is pending;
    /// the caller must drop the proposed change.
    pub async fn update_shadow(
        &self,
        thing_name: &str,
        fragment: AttributeMap,
    ) -> ShadowResult<CorrelationToken> {
        let machine = self
            .registry
            .get(thing_name)
            .await
            .ok_or_else(|| ShadowError::ShadowNotRegistered(thing_name.to_string()))?;
        machine.issue_update(fragment).await
    }

    /// Requests a registered shadow's full document from the endpoint.
    pub async fn get_shadow(&self, thing_name: &str) -> ShadowResult<CorrelationToken> {
        let machine = self
            .registry
            .get(thing_name)
            .await
            .ok_or_else(|| ShadowError::ShadowNotRegistered(thing_name.to_string()))?;
        machine.issue_get().await
    }

    /// Snapshot of a registered shadow's desired attributes.
    pub async fn desired(&self, thing_name: &str) -> ShadowResult<AttributeMap> {
        let machine = self
            .registry
            .get(thing_name)
            .await
            .ok_or_else(|| ShadowError::ShadowNotRegistered(thing_name.to_string()))?;
        Ok(machine.desired().await)
    }

    /// Snapshot of a registered shadow's reported attributes.
    pub async fn reported(&self, thing_name: &str) -> ShadowResult<AttributeMap> {
        let machine = self
            .registry
            .get(thing_name)
            .await
            .ok_or_else(|| ShadowError::ShadowNotRegistered(thing_name.to_string()))?;
        Ok(machine.reported().await)
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Returns true if the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Waits until the transport reports `Connected`, up to `deadline`.
    pub async fn wait_until_connected(&self, deadline: Duration) -> ShadowResult<()> {
        let mut rx = self.status_rx.clone();
        let wait = async {
            loop {
                if *rx.borrow_and_update() == ConnectionStatus::Connected {
                    return Ok(());
                }
                if rx.changed().await.is_err() {
                    return Err(ShadowError::ShuttingDown);
                }
            }
        };

        match tokio::time::timeout(deadline, wait).await {
            Ok(result) => result,
            Err(_) => Err(ShadowError::Timeout(deadline.as_secs())),
        }
    }

    /// Shuts down the transport and stops the background tasks.
    pub async fn shutdown(&self) {
        info!("Shadow client shutting down");
        if let Err(e) = self.transport.shutdown().await {
            debug!(%e, "Transport already stopped");
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }
}

/// Issues a get for every registered shadow, skipping the busy ones.
async fn fetch_all(registry: &ShadowRegistry) {
    for name in registry.registered_names().await {
        let Some(machine) = registry.get(&name).await else {
            continue;
        };
        match machine.issue_get().await {
            Ok(token) => debug!(thing = %name, %token, "Post-connect fetch issued"),
            Err(ShadowError::OperationInFlight { .. }) => {
                debug!(thing = %name, "Skipping post-connect fetch, operation in flight");
            }
            Err(e) => warn!(thing = %name, %e, "Post-connect fetch failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::NoOpHandler;
    use crate::protocol::{OutcomeKind, ShadowMessage};
    use crate::transport::DetachedPeer;
    use serde_json::json;

    fn client() -> (ShadowClient, DetachedPeer) {
        client_with_options(SyncOptions::default())
    }

    fn client_with_options(options: SyncOptions) -> (ShadowClient, DetachedPeer) {
        let (handle, peer, event_rx, status_rx) = Transport::detached("client-1");
        let client = ShadowClient::with_transport(handle, event_rx, status_rx, options);
        (client, peer)
    }

    async fn drain_one(peer: &mut DetachedPeer) -> ShadowMessage {
        peer.outgoing.recv().await.unwrap()
    }

    #[tokio::test]
    async fn test_operations_require_registration() {
        let (client, _peer) = client();

        let fragment = json!({"setPoint": 72}).as_object().unwrap().clone();
        assert!(matches!(
            client.update_shadow("TemperatureControl", fragment).await,
            Err(ShadowError::ShadowNotRegistered(_))
        ));
        assert!(matches!(
            client.get_shadow("TemperatureControl").await,
            Err(ShadowError::ShadowNotRegistered(_))
        ));
        assert!(client.desired("TemperatureControl").await.is_err());
    }

    #[tokio::test]
    async fn test_update_round_trip_through_event_router() {
        let (client, mut peer) = client();

        client
            .register("TemperatureControl", Arc::new(NoOpHandler))
            .await
            .unwrap();
        let _subscribe = drain_one(&mut peer).await;

        let fragment = json!({"setPoint": 72}).as_object().unwrap().clone();
        let token = client
            .update_shadow("TemperatureControl", fragment)
            .await
            .unwrap();

        // The update hit the wire with our token
        match drain_one(&mut peer).await {
            ShadowMessage::Update(update) => {
                assert_eq!(update.thing_name, "TemperatureControl");
                assert_eq!(update.client_token, token);
            }
            other => panic!("Expected Update, got {}", other.type_name()),
        }

        // Endpoint accepts; router delivers it to the machine
        peer.events
            .send(ShadowEvent {
                thing_name: "TemperatureControl".into(),
                outcome: OutcomeKind::Accepted,
                token: Some(token),
                document: json!({"state": {"desired": {"setPoint": 72}}}),
            })
            .await
            .unwrap();

        // The router task runs concurrently; poll until it lands
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            let desired = client.desired("TemperatureControl").await.unwrap();
            if desired.get("setPoint") == Some(&json!(72)) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "merge never landed");
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_connected_triggers_resubscribe_and_fetch() {
        let (client, mut peer) = client_with_options(SyncOptions {
            fetch_delay: Duration::from_millis(0),
            ..Default::default()
        });

        client
            .register("TemperatureControl", Arc::new(NoOpHandler))
            .await
            .unwrap();
        client
            .register("TemperatureStatus", Arc::new(NoOpHandler))
            .await
            .unwrap();
        let _sub1 = drain_one(&mut peer).await;
        let _sub2 = drain_one(&mut peer).await;

        peer.statuses.send(ConnectionStatus::Connected).await.unwrap();

        // Reconnect ritual: one subscribe per shadow, then one get per shadow
        let mut subscribes = 0;
        let mut gets = 0;
        for _ in 0..4 {
            match drain_one(&mut peer).await {
                ShadowMessage::Subscribe(_) => subscribes += 1,
                ShadowMessage::Get(_) => gets += 1,
                other => panic!("Unexpected message {}", other.type_name()),
            }
        }
        assert_eq!(subscribes, 2);
        assert_eq!(gets, 2);
    }

    #[tokio::test]
    async fn test_status_watch_and_wait_until_connected() {
        let (client, peer) = client();
        assert_eq!(client.status(), ConnectionStatus::Disconnected);

        peer.statuses
            .send(ConnectionStatus::Connecting)
            .await
            .unwrap();
        peer.statuses.send(ConnectionStatus::Connected).await.unwrap();

        client
            .wait_until_connected(Duration::from_secs(1))
            .await
            .unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_wait_until_connected_times_out() {
        let (client, _peer) = client();
        let err = client
            .wait_until_connected(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ShadowError::Timeout(_)));
    }
}
