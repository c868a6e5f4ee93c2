//! # Error Types
//!
//! Domain-specific error types for umbra-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  umbra-core errors (this file)                                         │
//! │  └── SchemaError      - Malformed fragments and type-class conflicts   │
//! │                                                                         │
//! │  umbra-sync errors (separate crate)                                    │
//! │  └── ShadowError      - Transport, protocol, and operation failures    │
//! │                                                                         │
//! │  Flow: SchemaError → ShadowError → application callback                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (attribute name, type classes)
//! 3. Errors are enum variants, never String
//! 4. A failed merge leaves the document exactly as it was

use thiserror::Error;

use crate::document::AttributeKind;

// =============================================================================
// Schema Error
// =============================================================================

/// Schema violations encountered while merging shadow fragments.
///
/// These errors are non-fatal to the engine: the offending fragment is
/// dropped and the document keeps its previous contents.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// An attribute's JSON type class changed between merges.
    ///
    /// ## When This Occurs
    /// - A shadow reports `{"setPoint": 72}` and later `{"setPoint": "hot"}`
    /// - A misbehaving publisher reuses an attribute name with a new type
    #[error("Type mismatch for attribute '{attribute}': stored {stored}, incoming {incoming}")]
    TypeMismatch {
        attribute: String,
        stored: AttributeKind,
        incoming: AttributeKind,
    },

    /// The payload's `state` member is missing or not a JSON object.
    #[error("Shadow payload has no usable state object: {0}")]
    MalformedState(String),

    /// A thing/shadow name failed validation.
    #[error("Invalid shadow name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
}
