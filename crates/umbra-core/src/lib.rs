//! # umbra-core: Pure Shadow-Document Logic for Umbra
//!
//! This crate is the **heart** of Umbra. It contains the shadow-document
//! model as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Umbra Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Application / Presentation                      │   │
//! │  │    switches, steppers, dashboards (not part of this repo)      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ ShadowHandler callbacks                │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                umbra-sync (Engine Layer)                        │   │
//! │  │    transport, registry, state machine, arbitration              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ umbra-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                  │   │
//! │  │   │ document  │  │   error   │  │ validation│                  │   │
//! │  │   │ ShadowState│ │SchemaError│  │   names   │                  │   │
//! │  │   │ merges    │  │           │  │           │                  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • NO TIMERS • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`document`] - Shadow document state and partial-merge semantics
//! - [`error`] - Schema and validation error types
//! - [`validation`] - Thing/shadow name validation rules
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every merge is deterministic - same input = same output
//! 2. **No I/O**: Network, file system, and timer access is FORBIDDEN here
//! 3. **Stable Types**: An attribute's JSON type class never changes silently
//! 4. **Explicit Errors**: All errors are typed, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use umbra_core::document::ShadowState;
//! use serde_json::json;
//!
//! let mut state = ShadowState::new();
//! state.apply_desired(&json!({"setPoint": 68, "enabled": true})
//!     .as_object().unwrap().clone()).unwrap();
//!
//! // Partial merge: only setPoint changes, enabled is untouched
//! state.apply_desired(&json!({"setPoint": 72})
//!     .as_object().unwrap().clone()).unwrap();
//!
//! assert_eq!(state.desired()["setPoint"], 72);
//! assert_eq!(state.desired()["enabled"], true);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod document;
pub mod error;
pub mod validation;

// =============================================================================
// Re-exports
// =============================================================================

pub use document::{AttributeKind, AttributeMap, ShadowState};
pub use error::SchemaError;
pub use validation::validate_shadow_name;
