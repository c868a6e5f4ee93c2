//! # umbra-sync: Shadow Synchronization Engine for Umbra
//!
//! This crate provides the device-shadow synchronization client: it keeps
//! local shadow documents converged with a remote shadow endpoint over a
//! WebSocket transport, with correlated request/response tracking and
//! at-most-one-in-flight-write arbitration per shadow.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Shadow Sync Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  ShadowClient (Orchestrator)                     │  │
//! │  │                                                                  │  │
//! │  │  Owns the transport and background tasks                         │  │
//! │  │  register / update_shadow / get_shadow / snapshots               │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ ShadowRegistry │  │   Transport    │  │  ShadowStateMachine    │    │
//! │  │                │  │                │  │  (one per shadow)      │    │
//! │  │ Name → machine │  │ WebSocket with │  │                        │    │
//! │  │ Event routing  │  │ auto-reconnect │  │ Idle/AwaitingResponse  │    │
//! │  │ Resubscribe on │  │ & backoff      │  │ accepted/rejected/     │    │
//! │  │ reconnect      │  │                │  │ delta/timeout          │    │
//! │  └────────────────┘  └────────────────┘  └───────────┬────────────┘    │
//! │                                                      │                 │
//! │                                          ┌───────────▼────────────┐    │
//! │                                          │    OperationGate       │    │
//! │                                          │                        │    │
//! │                                          │ At most one in-flight  │    │
//! │                                          │ write per shadow;      │    │
//! │                                          │ competitors rejected,  │    │
//! │                                          │ never queued           │    │
//! │                                          └────────────────────────┘    │
//! │                                                                         │
//! │  CORRELATION MODEL                                                     │
//! │  ─────────────────                                                     │
//! │  Every get/update carries a monotonic client token. The matching       │
//! │  accepted/rejected response (or a locally synthesized timeout)         │
//! │  resolves the operation exactly once; stale tokens are discarded.      │
//! │  Delta events are server-driven, uncorrelated, and merge without       │
//! │  touching the pending operation.                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`client`] - `ShadowClient` orchestrator and background tasks
//! - [`config`] - TOML configuration with env overrides
//! - [`error`] - Engine error types
//! - [`machine`] - Per-shadow state machine and handler callbacks
//! - [`arbitration`] - Single-flight operation gate
//! - [`registry`] - Shadow name → machine map and event routing
//! - [`protocol`] - Wire message types and correlated events
//! - [`transport`] - WebSocket client with reconnection
//!
//! ## Usage
//!
//! ```rust,ignore
//! use umbra_sync::{ShadowClient, ShadowConfig};
//!
//! let config = ShadowConfig::load_or_default();
//! let client = ShadowClient::connect(&config)?;
//!
//! client.register("TemperatureControl", Arc::new(MyHandler)).await?;
//! client.wait_until_connected(Duration::from_secs(30)).await?;
//!
//! let fragment = json!({"setPoint": 72}).as_object().unwrap().clone();
//! let token = client.update_shadow("TemperatureControl", fragment).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod arbitration;
pub mod client;
pub mod config;
pub mod error;
pub mod machine;
pub mod protocol;
pub mod registry;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use arbitration::{OperationGate, OperationKind, PendingOperation};
pub use client::{ShadowClient, SyncOptions};
pub use config::{ClientConfig, EndpointConfig, ShadowConfig, ShadowSettings};
pub use error::{ShadowError, ShadowResult};
pub use machine::{FailureKind, NoOpHandler, ShadowHandler, ShadowStateMachine};
pub use protocol::{CorrelationToken, OutcomeKind, ShadowEvent, ShadowMessage};
pub use registry::ShadowRegistry;
pub use transport::{ConnectionStatus, Transport, TransportConfig, TransportHandle};

// Re-export the document layer for convenience
pub use umbra_core::{AttributeKind, AttributeMap, SchemaError, ShadowState};
