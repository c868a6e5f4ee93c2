//! # Shadow Protocol Messages
//!
//! Message types for shadow synchronization between a client and its
//! cloud-hosted shadow endpoint.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Shadow Protocol Messages                            │
//! │                                                                         │
//! │  REGISTRATION FLOW                                                     │
//! │  ─────────────────                                                     │
//! │  CLIENT ───► Subscribe { thingName }                                   │
//! │  CLIENT ───► Unsubscribe { thingName }                                 │
//! │                                                                         │
//! │  OPERATIONS (CLIENT → ENDPOINT)                                        │
//! │  ──────────────────────────────                                        │
//! │  CLIENT ───► Get    { thingName, clientToken }                         │
//! │  CLIENT ───► Update { thingName, clientToken, state.desired }          │
//! │                                                                         │
//! │  OUTCOMES (ENDPOINT → CLIENT)                                          │
//! │  ────────────────────────────                                          │
//! │  CLIENT ◄─── Accepted { thingName, clientToken, document }             │
//! │  CLIENT ◄─── Rejected { thingName, clientToken, code, message }        │
//! │  CLIENT ◄─── Delta    { thingName, document }          (uncorrelated)  │
//! │                                                                         │
//! │  KEEPALIVE                                                             │
//! │  ─────────                                                             │
//! │  Both   ◄──► Ping { timestamp }                                        │
//! │  Both   ◄──► Pong { timestamp }                                        │
//! │                                                                         │
//! │  Timeout is NEVER read off the wire: it is synthesized locally by      │
//! │  the pending operation's deadline timer.                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format (JSON)
//! Messages are serialized as tagged JSON using serde's adjacently tagged enum:
//! ```json
//! { "type": "Update", "payload": { "thingName": "...", ... } }
//! ```
//!
//! ## Document Shapes
//! Accepted/get payloads nest desired and reported sub-documents:
//! ```json
//! { "state": { "desired": { "setPoint": 72 }, "reported": { "setPoint": 68 } } }
//! ```
//! Delta payloads are flattened (no desired/reported nesting):
//! ```json
//! { "state": { "setPoint": 72 } }
//! ```
//! Both shapes must parse; see [`StateFragments::parse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use umbra_core::{AttributeMap, SchemaError};

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Identifier linking an issued operation to its asynchronous response.
pub type CorrelationToken = String;

// =============================================================================
// Main Message Enum (Tagged Union)
// =============================================================================

/// All shadow protocol messages.
///
/// Uses serde's adjacently tagged enum for clean JSON serialization:
/// `{ "type": "Get", "payload": { ... } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ShadowMessage {
    // =========================================================================
    // Registration Messages
    // =========================================================================

    /// Register interest in a named shadow's outcome events.
    Subscribe(SubscribePayload),

    /// Drop interest in a named shadow.
    Unsubscribe(SubscribePayload),

    // =========================================================================
    // Operation Messages
    // =========================================================================

    /// Request the shadow's current document.
    Get(GetRequest),

    /// Propose a partial desired-state update.
    Update(UpdateRequest),

    // =========================================================================
    // Outcome Messages
    // =========================================================================

    /// The correlated operation succeeded; carries the resulting document.
    Accepted(AcceptedPayload),

    /// The correlated operation was refused by the endpoint.
    Rejected(RejectedPayload),

    /// Server-pushed difference between desired and reported state.
    /// Not correlated to any local operation.
    Delta(DeltaPayload),

    // =========================================================================
    // Keepalive Messages
    // =========================================================================

    /// Ping for keepalive.
    Ping { timestamp: String },

    /// Pong response for keepalive.
    Pong {
        ping_timestamp: String,
        pong_timestamp: String,
    },

    // =========================================================================
    // Error Messages
    // =========================================================================

    /// Transport-level error report.
    Error { code: String, message: String },
}

// =============================================================================
// Registration Payloads
// =============================================================================

/// Subscribe/unsubscribe payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    /// Name of the shadow (thing) to (un)register.
    pub thing_name: String,

    /// Protocol version supported by this client.
    #[serde(default)]
    pub protocol_version: u32,
}

// =============================================================================
// Operation Payloads
// =============================================================================

/// Get request for a shadow's current document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRequest {
    /// Name of the shadow.
    pub thing_name: String,

    /// Correlation token allocated for this operation.
    pub client_token: CorrelationToken,

    /// When this request was issued (ISO8601).
    pub timestamp: String,
}

/// Update request proposing a partial desired-state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    /// Name of the shadow.
    pub thing_name: String,

    /// Correlation token allocated for this operation.
    pub client_token: CorrelationToken,

    /// The proposed state: `{"desired": { attr: value, ... }}`.
    pub state: DesiredState,

    /// When this request was issued (ISO8601).
    pub timestamp: String,
}

/// The desired sub-document of an update request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    /// Partial desired attribute mapping.
    pub desired: AttributeMap,
}

// =============================================================================
// Outcome Payloads
// =============================================================================

/// Accepted outcome: the operation succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedPayload {
    /// Name of the shadow.
    pub thing_name: String,

    /// Token of the operation this outcome resolves.
    pub client_token: CorrelationToken,

    /// The resulting document: `{"state": {"desired": {...}, "reported": {...}}}`.
    pub document: Value,
}

/// Rejected outcome: the operation was refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedPayload {
    /// Name of the shadow.
    pub thing_name: String,

    /// Token of the operation this outcome resolves.
    pub client_token: CorrelationToken,

    /// Endpoint error code (e.g. "400", "409").
    pub code: String,

    /// Human-readable rejection reason.
    pub message: String,
}

/// Delta outcome: server-computed difference pushed proactively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaPayload {
    /// Name of the shadow.
    pub thing_name: String,

    /// The delta document: `{"state": { attr: value, ... }}` (flattened).
    pub document: Value,
}

// =============================================================================
// Correlated Events (Transport → Engine)
// =============================================================================

/// The four outcome kinds a pending operation can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Operation succeeded; document fragment attached.
    Accepted,
    /// Operation refused by the endpoint.
    Rejected,
    /// Server-pushed delta, independent of local operations.
    Delta,
    /// Synthesized locally when the deadline elapsed with no response.
    Timeout,
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeKind::Accepted => write!(f, "accepted"),
            OutcomeKind::Rejected => write!(f, "rejected"),
            OutcomeKind::Delta => write!(f, "delta"),
            OutcomeKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// A correlated shadow event as delivered to the registry.
///
/// This is the inbound tuple of the transport facade:
/// `(thing_name, outcome, token, document)`.
#[derive(Debug, Clone)]
pub struct ShadowEvent {
    /// Name of the shadow this event belongs to.
    pub thing_name: String,

    /// Outcome kind.
    pub outcome: OutcomeKind,

    /// Correlation token; `None` for delta events (uncorrelated by design).
    pub token: Option<CorrelationToken>,

    /// Raw payload document (shape depends on the outcome kind).
    pub document: Value,
}

// =============================================================================
// Document Shape Parsing
// =============================================================================

/// Desired/reported fragments extracted from an outcome document.
#[derive(Debug, Clone, Default)]
pub struct StateFragments {
    /// Desired sub-document, if present.
    pub desired: Option<AttributeMap>,

    /// Reported sub-document, if present.
    pub reported: Option<AttributeMap>,
}

impl StateFragments {
    /// Parses an outcome document, accepting both wire shapes.
    ///
    /// Nested (accepted/get responses):
    /// `{"state": {"desired": {...}, "reported": {...}}}`
    ///
    /// Flattened (delta events): `{"state": { attr: value, ... }}` - the
    /// whole state object becomes the desired fragment.
    pub fn parse(document: &Value) -> Result<Self, SchemaError> {
        let state = document
            .get("state")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                SchemaError::MalformedState("missing or non-object 'state' member".into())
            })?;

        let nested_desired = state.get("desired").and_then(Value::as_object);
        let nested_reported = state.get("reported").and_then(Value::as_object);

        if nested_desired.is_some() || nested_reported.is_some() {
            // Nested shape: any keys beside desired/reported are ignored
            // (the endpoint also sends metadata and version members there).
            return Ok(StateFragments {
                desired: nested_desired.cloned(),
                reported: nested_reported.cloned(),
            });
        }

        // Flattened shape: the state object IS the desired fragment.
        Ok(StateFragments {
            desired: Some(state.clone()),
            reported: None,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

impl ShadowMessage {
    /// Returns the message type name as a string (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            ShadowMessage::Subscribe(_) => "Subscribe",
            ShadowMessage::Unsubscribe(_) => "Unsubscribe",
            ShadowMessage::Get(_) => "Get",
            ShadowMessage::Update(_) => "Update",
            ShadowMessage::Accepted(_) => "Accepted",
            ShadowMessage::Rejected(_) => "Rejected",
            ShadowMessage::Delta(_) => "Delta",
            ShadowMessage::Ping { .. } => "Ping",
            ShadowMessage::Pong { .. } => "Pong",
            ShadowMessage::Error { .. } => "Error",
        }
    }

    /// Creates a Subscribe message.
    pub fn subscribe(thing_name: &str) -> Self {
        ShadowMessage::Subscribe(SubscribePayload {
            thing_name: thing_name.to_string(),
            protocol_version: PROTOCOL_VERSION,
        })
    }

    /// Creates an Unsubscribe message.
    pub fn unsubscribe(thing_name: &str) -> Self {
        ShadowMessage::Unsubscribe(SubscribePayload {
            thing_name: thing_name.to_string(),
            protocol_version: PROTOCOL_VERSION,
        })
    }

    /// Creates a Get request.
    pub fn get(thing_name: &str, client_token: &str) -> Self {
        ShadowMessage::Get(GetRequest {
            thing_name: thing_name.to_string(),
            client_token: client_token.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Creates an Update request.
    pub fn update(thing_name: &str, client_token: &str, desired: AttributeMap) -> Self {
        ShadowMessage::Update(UpdateRequest {
            thing_name: thing_name.to_string(),
            client_token: client_token.to_string(),
            state: DesiredState { desired },
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Creates a Ping message.
    pub fn ping() -> Self {
        ShadowMessage::Ping {
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Creates a Pong message.
    pub fn pong(ping_timestamp: &str) -> Self {
        ShadowMessage::Pong {
            ping_timestamp: ping_timestamp.to_string(),
            pong_timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Converts an inbound outcome message into a correlated event.
    ///
    /// Returns `None` for message types that are not shadow outcomes
    /// (keepalive, registration echoes, errors).
    pub fn into_event(self) -> Option<ShadowEvent> {
        match self {
            ShadowMessage::Accepted(p) => Some(ShadowEvent {
                thing_name: p.thing_name,
                outcome: OutcomeKind::Accepted,
                token: Some(p.client_token),
                document: p.document,
            }),
            ShadowMessage::Rejected(p) => Some(ShadowEvent {
                thing_name: p.thing_name,
                outcome: OutcomeKind::Rejected,
                token: Some(p.client_token),
                document: serde_json::json!({ "code": p.code, "message": p.message }),
            }),
            ShadowMessage::Delta(p) => Some(ShadowEvent {
                thing_name: p.thing_name,
                outcome: OutcomeKind::Delta,
                token: None,
                document: p.document,
            }),
            _ => None,
        }
    }

    /// Serializes to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serialization() {
        let get = ShadowMessage::get("TemperatureControl", "client-1-42");
        let json = get.to_json().unwrap();
        assert!(json.contains("\"type\":\"Get\""));
        assert!(json.contains("TemperatureControl"));
        assert!(json.contains("client-1-42"));

        let parsed = ShadowMessage::from_json(&json).unwrap();
        if let ShadowMessage::Get(payload) = parsed {
            assert_eq!(payload.client_token, "client-1-42");
        } else {
            panic!("Expected Get message");
        }
    }

    #[test]
    fn test_update_carries_desired_state() {
        let desired = json!({"setPoint": 72, "enabled": true})
            .as_object()
            .unwrap()
            .clone();
        let update = ShadowMessage::update("TemperatureControl", "tok-1", desired);
        let json = update.to_json().unwrap();
        assert!(json.contains("\"desired\""));
        assert!(json.contains("\"setPoint\":72"));
    }

    #[test]
    fn test_nested_state_shape() {
        let doc = json!({
            "state": {
                "desired": {"setPoint": 72, "enabled": true},
                "reported": {"setPoint": 68}
            }
        });
        let fragments = StateFragments::parse(&doc).unwrap();
        assert_eq!(fragments.desired.unwrap()["setPoint"], 72);
        assert_eq!(fragments.reported.unwrap()["setPoint"], 68);
    }

    #[test]
    fn test_flattened_delta_shape() {
        let doc = json!({"state": {"setPoint": 72, "enabled": false}});
        let fragments = StateFragments::parse(&doc).unwrap();
        let desired = fragments.desired.unwrap();
        assert_eq!(desired["setPoint"], 72);
        assert_eq!(desired["enabled"], false);
        assert!(fragments.reported.is_none());
    }

    #[test]
    fn test_malformed_state_rejected() {
        assert!(StateFragments::parse(&json!({})).is_err());
        assert!(StateFragments::parse(&json!({"state": 42})).is_err());
    }

    #[test]
    fn test_outcome_into_event() {
        let accepted = ShadowMessage::Accepted(AcceptedPayload {
            thing_name: "TemperatureControl".into(),
            client_token: "tok-9".into(),
            document: json!({"state": {"desired": {"setPoint": 72}}}),
        });
        let event = accepted.into_event().unwrap();
        assert_eq!(event.outcome, OutcomeKind::Accepted);
        assert_eq!(event.token.as_deref(), Some("tok-9"));

        let delta = ShadowMessage::Delta(DeltaPayload {
            thing_name: "TemperatureControl".into(),
            document: json!({"state": {"setPoint": 70}}),
        });
        let event = delta.into_event().unwrap();
        assert_eq!(event.outcome, OutcomeKind::Delta);
        assert!(event.token.is_none());

        assert!(ShadowMessage::ping().into_event().is_none());
    }
}
