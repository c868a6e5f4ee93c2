//! # Shadow Document Model
//!
//! Typed representation of a shadow's `state` tree: the `desired` and
//! `reported` attribute maps tracked for each registered thing.
//!
//! ## Merge Semantics
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Partial-Merge Semantics                           │
//! │                                                                         │
//! │  stored:   { "setPoint": 68, "enabled": true }                          │
//! │  fragment: { "setPoint": 72 }                                           │
//! │                     │                                                   │
//! │                     ▼                                                   │
//! │  result:   { "setPoint": 72, "enabled": true }                          │
//! │                                                                         │
//! │  • Present attributes overwrite the stored value                        │
//! │  • Absent attributes are left untouched (never cleared)                 │
//! │  • Type classes are stable: an integer never becomes a string           │
//! │  • Validation happens BEFORE any write - a rejected fragment leaves     │
//! │    the document byte-for-byte unchanged                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchemaError;

/// Attribute mapping used throughout the shadow model.
///
/// Keys are attribute names, values are arbitrary JSON values whose type
/// class is pinned on first observation.
pub type AttributeMap = serde_json::Map<String, Value>;

// =============================================================================
// Attribute Kind
// =============================================================================

/// JSON type class of an attribute value.
///
/// Integers and floats are distinct classes: a shadow that reports
/// `"setPoint": 72` must not silently start reporting `"setPoint": 72.5`
/// without the consumer noticing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Null,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl AttributeKind {
    /// Classifies a JSON value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => AttributeKind::Null,
            Value::Bool(_) => AttributeKind::Bool,
            Value::Number(n) => {
                if n.is_f64() && !n.is_i64() && !n.is_u64() {
                    AttributeKind::Float
                } else {
                    AttributeKind::Integer
                }
            }
            Value::String(_) => AttributeKind::String,
            Value::Array(_) => AttributeKind::Array,
            Value::Object(_) => AttributeKind::Object,
        }
    }

    /// Returns true if a stored attribute of `self` may accept an incoming
    /// value of `incoming`.
    ///
    /// `Null` is a wildcard on either side: a null placeholder can be given
    /// a concrete type later, and any attribute can be nulled out.
    pub fn accepts(&self, incoming: AttributeKind) -> bool {
        *self == incoming || *self == AttributeKind::Null || incoming == AttributeKind::Null
    }
}

impl std::fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeKind::Null => write!(f, "null"),
            AttributeKind::Bool => write!(f, "bool"),
            AttributeKind::Integer => write!(f, "integer"),
            AttributeKind::Float => write!(f, "float"),
            AttributeKind::String => write!(f, "string"),
            AttributeKind::Array => write!(f, "array"),
            AttributeKind::Object => write!(f, "object"),
        }
    }
}

// =============================================================================
// Shadow State
// =============================================================================

/// A named thing's shadow state: parallel `desired` and `reported`
/// attribute maps.
///
/// Created empty on first registration of a shadow name, mutated on every
/// accepted/delta event, and discarded when the shadow is unregistered.
/// No cross-attribute consistency is enforced; the only schema rule is
/// type-class stability per attribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShadowState {
    /// Last-known desired state (locally proposed or server-confirmed).
    desired: AttributeMap,

    /// Last-known device-reported state.
    reported: AttributeMap,
}

impl ShadowState {
    /// Creates an empty shadow state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the desired attribute map.
    pub fn desired(&self) -> &AttributeMap {
        &self.desired
    }

    /// Returns the reported attribute map.
    pub fn reported(&self) -> &AttributeMap {
        &self.reported
    }

    /// Merges a partial fragment into the desired map.
    ///
    /// Returns the attributes that were applied. On a type-class conflict
    /// the whole fragment is rejected and the document is unchanged.
    pub fn apply_desired(&mut self, fragment: &AttributeMap) -> Result<AttributeMap, SchemaError> {
        Self::merge(&mut self.desired, fragment)
    }

    /// Merges a partial fragment into the reported map.
    ///
    /// Same contract as [`ShadowState::apply_desired`].
    pub fn apply_reported(&mut self, fragment: &AttributeMap) -> Result<AttributeMap, SchemaError> {
        Self::merge(&mut self.reported, fragment)
    }

    /// Partial merge with a validate-then-apply discipline.
    fn merge(target: &mut AttributeMap, fragment: &AttributeMap) -> Result<AttributeMap, SchemaError> {
        // Pass 1: validate every attribute before touching the map, so a
        // rejected fragment cannot leave a half-applied document behind.
        for (name, incoming) in fragment {
            if let Some(stored) = target.get(name) {
                let stored_kind = AttributeKind::of(stored);
                let incoming_kind = AttributeKind::of(incoming);
                if !stored_kind.accepts(incoming_kind) {
                    return Err(SchemaError::TypeMismatch {
                        attribute: name.clone(),
                        stored: stored_kind,
                        incoming: incoming_kind,
                    });
                }
            }
        }

        // Pass 2: apply.
        for (name, incoming) in fragment {
            target.insert(name.clone(), incoming.clone());
        }

        Ok(fragment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> AttributeMap {
        value.as_object().expect("test fragment must be an object").clone()
    }

    #[test]
    fn test_partial_merge_leaves_absent_attributes() {
        let mut state = ShadowState::new();
        state
            .apply_desired(&obj(json!({"setPoint": 68, "enabled": true})))
            .unwrap();

        let applied = state.apply_desired(&obj(json!({"setPoint": 72}))).unwrap();

        assert_eq!(applied.len(), 1);
        assert_eq!(state.desired()["setPoint"], 72);
        assert_eq!(state.desired()["enabled"], true);
    }

    #[test]
    fn test_type_mismatch_rejects_whole_fragment() {
        let mut state = ShadowState::new();
        state
            .apply_desired(&obj(json!({"setPoint": 68, "enabled": true})))
            .unwrap();

        // enabled flips first in iteration order or not - either way the
        // document must be untouched after the rejection
        let err = state
            .apply_desired(&obj(json!({"enabled": false, "setPoint": "hot"})))
            .unwrap_err();

        assert!(matches!(err, SchemaError::TypeMismatch { ref attribute, .. } if attribute == "setPoint"));
        assert_eq!(state.desired()["setPoint"], 68);
        assert_eq!(state.desired()["enabled"], true);
    }

    #[test]
    fn test_integer_and_float_are_distinct_classes() {
        let mut state = ShadowState::new();
        state.apply_reported(&obj(json!({"intTemp": 70}))).unwrap();

        let err = state
            .apply_reported(&obj(json!({"intTemp": 70.5})))
            .unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch { .. }));
    }

    #[test]
    fn test_null_is_a_wildcard() {
        let mut state = ShadowState::new();
        state.apply_desired(&obj(json!({"curState": null}))).unwrap();
        state
            .apply_desired(&obj(json!({"curState": "heating"})))
            .unwrap();
        state.apply_desired(&obj(json!({"curState": null}))).unwrap();

        assert_eq!(state.desired()["curState"], Value::Null);
    }

    #[test]
    fn test_desired_and_reported_are_independent() {
        let mut state = ShadowState::new();
        state.apply_desired(&obj(json!({"setPoint": 72}))).unwrap();
        state.apply_reported(&obj(json!({"setPoint": 68}))).unwrap();

        assert_eq!(state.desired()["setPoint"], 72);
        assert_eq!(state.reported()["setPoint"], 68);
    }

    #[test]
    fn test_attribute_kind_classification() {
        assert_eq!(AttributeKind::of(&json!(true)), AttributeKind::Bool);
        assert_eq!(AttributeKind::of(&json!(42)), AttributeKind::Integer);
        assert_eq!(AttributeKind::of(&json!(4.2)), AttributeKind::Float);
        assert_eq!(AttributeKind::of(&json!("x")), AttributeKind::String);
        assert_eq!(AttributeKind::of(&json!([1])), AttributeKind::Array);
        assert_eq!(AttributeKind::of(&json!({})), AttributeKind::Object);
        assert_eq!(AttributeKind::of(&Value::Null), AttributeKind::Null);
    }
}
