//! # Validation Module
//!
//! Name validation for shadow registrations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Application                                                   │
//! │  ├── Picks shadow names at registration time                            │
//! │  └── Usually static strings ("TemperatureControl")                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                   │
//! │  ├── Rejects names the broker side would refuse                         │
//! │  └── Fails registration early, before any wire traffic                  │
//! │                                                                         │
//! │  Catching a bad name here turns a silent subscription failure into      │
//! │  an immediate, typed error at the call site                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use umbra_core::validation::validate_shadow_name;
//!
//! assert!(validate_shadow_name("TemperatureControl").is_ok());
//! assert!(validate_shadow_name("").is_err());
//! ```

use crate::error::SchemaError;

/// Maximum length of a shadow/thing name.
pub const MAX_SHADOW_NAME_LEN: usize = 128;

/// Validates a thing/shadow name.
///
/// ## Rules
/// - Must not be empty
/// - Must be at most 128 characters
/// - Must contain only letters, digits, `:`, `_`, and `-`
pub fn validate_shadow_name(name: &str) -> Result<(), SchemaError> {
    if name.is_empty() {
        return Err(SchemaError::InvalidName {
            name: name.to_string(),
            reason: "name must not be empty".to_string(),
        });
    }

    if name.len() > MAX_SHADOW_NAME_LEN {
        return Err(SchemaError::InvalidName {
            name: name.to_string(),
            reason: format!("name exceeds {} characters", MAX_SHADOW_NAME_LEN),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '-')
    {
        return Err(SchemaError::InvalidName {
            name: name.to_string(),
            reason: "name must contain only letters, digits, ':', '_', and '-'".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(validate_shadow_name("TemperatureControl").is_ok());
        assert!(validate_shadow_name("TemperatureStatus").is_ok());
        assert!(validate_shadow_name("floor-2:hvac_01").is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert!(validate_shadow_name("").is_err());
        assert!(validate_shadow_name("thermostat one").is_err());
        assert!(validate_shadow_name("devices/hvac").is_err());
        assert!(validate_shadow_name(&"x".repeat(129)).is_err());
    }
}
