//! # Shadow Error Types
//!
//! Error types for shadow synchronization.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Shadow Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  InvalidMessage         │ │
//! │  │  MissingClientId│  │  Disconnected   │  │  SerializationFailed    │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  DeserializationFailed  │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │  Shadow Ops     │  │     Internal                                │  │
//! │  │                 │  │                                             │  │
//! │  │  Schema         │  │  ChannelError                               │  │
//! │  │  NotRegistered  │  │  ShuttingDown                               │  │
//! │  │  InFlight       │  │                                             │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;
use umbra_core::SchemaError;

/// Result type alias for shadow operations.
pub type ShadowResult<T> = Result<T, ShadowError>;

/// Shadow error type covering all possible sync failures.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Errors are categorized for different handling strategies
/// - All errors are `Send + Sync` for async compatibility
/// - No error in this crate crashes the process; failures degrade to
///   "no-op plus a reported outcome"
#[derive(Debug, Error)]
pub enum ShadowError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid shadow configuration.
    #[error("Invalid shadow configuration: {0}")]
    InvalidConfig(String),

    /// Missing client ID (required for correlation tokens).
    #[error("Client ID not configured. Run initial setup first.")]
    MissingClientId,

    /// Invalid endpoint URL.
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to establish WebSocket connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The endpoint actively refused the connection.
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// WebSocket disconnected unexpectedly.
    #[error("Disconnected from shadow endpoint")]
    Disconnected,

    /// Connection timeout.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Invalid message received.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Failed to serialize message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize message.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Shadow Operation Errors
    // =========================================================================
    /// A shadow payload or merge violated the document schema.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Operation attempted on a shadow that was never registered.
    #[error("Shadow not registered: {0}")]
    ShadowNotRegistered(String),

    /// A mutation was rejected because one is already in flight.
    ///
    /// The caller must treat this as "do not apply the proposed change"
    /// (e.g. revert a UI control to its last confirmed value). The pending
    /// operation is left untouched; nothing is queued.
    #[error("Operation already in flight for shadow '{thing_name}'")]
    OperationInFlight { thing_name: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Client is shutting down.
    #[error("Shadow client is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for ShadowError {
    fn from(err: serde_json::Error) -> Self {
        ShadowError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for ShadowError {
    fn from(err: url::ParseError) -> Self {
        ShadowError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ShadowError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => ShadowError::Disconnected,
            WsError::AlreadyClosed => ShadowError::Disconnected,
            WsError::Protocol(p) => ShadowError::WebSocketError(p.to_string()),
            WsError::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                ShadowError::ConnectionRefused(io.to_string())
            }
            WsError::Io(io) => ShadowError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => ShadowError::TlsError(tls.to_string()),
            other => ShadowError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ShadowError {
    fn from(err: std::io::Error) -> Self {
        ShadowError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ShadowError {
    fn from(err: toml::de::Error) -> Self {
        ShadowError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for ShadowError {
    fn from(err: toml::ser::Error) -> Self {
        ShadowError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl ShadowError {
    /// Returns true if this error is recoverable and the operation can be
    /// retried once the connection is back.
    ///
    /// ## Retryable Errors
    /// - Connection failures (network issues)
    /// - Timeouts
    /// - Temporary disconnections
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Schema violations
    /// - Competing in-flight writes (the caller must drop its change)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShadowError::ConnectionFailed(_)
                | ShadowError::ConnectionRefused(_)
                | ShadowError::Disconnected
                | ShadowError::Timeout(_)
                | ShadowError::WebSocketError(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ShadowError::InvalidConfig(_)
                | ShadowError::MissingClientId
                | ShadowError::InvalidUrl(_)
                | ShadowError::ConfigLoadFailed(_)
                | ShadowError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if this error indicates a malformed payload or a
    /// document-schema violation. These events are logged and dropped
    /// without a state transition.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            ShadowError::Schema(_)
                | ShadowError::InvalidMessage(_)
                | ShadowError::SerializationFailed(_)
                | ShadowError::DeserializationFailed(_)
        )
    }
}
