//! # Validation Module
//!
//! Input validation for admin and device-supplied values.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: HTTP handler (deserialization)                               │
//! │  ├── Type validation (priority is a number, ttl is a number)           │
//! │  └── Missing-field rejection                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE (domain rules)                                   │
//! │  ├── Identifier shape, bounds, JSON well-formedness                    │
//! │  └── Runs before any state is touched                                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  └── UNIQUE constraints (device_id, (device_id, seq))                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{ValidationError, ValidationResult};

/// Longest accepted device identifier.
const MAX_DEVICE_ID_LEN: usize = 64;

/// Longest accepted instruction kind / package name.
const MAX_NAME_LEN: usize = 100;

/// Priority bounds. 0 = background, 100 = drop everything.
const MIN_PRIORITY: i64 = 0;
const MAX_PRIORITY: i64 = 100;

/// Longest accepted TTL: 30 days. Anything further out is a config
/// mistake, not a deadline.
const MAX_TTL_SECS: i64 = 30 * 24 * 3600;

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates a device identifier.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - Only alphanumerics, hyphens, underscores (it travels in URLs and
///   file paths)
///
/// ## Example
/// ```rust
/// use drophub_core::validation::validate_device_id;
///
/// assert!(validate_device_id("esp001").is_ok());
/// assert!(validate_device_id("").is_err());
/// assert!(validate_device_id("esp/001").is_err());
/// ```
pub fn validate_device_id(device_id: &str) -> ValidationResult<()> {
    let device_id = device_id.trim();

    if device_id.is_empty() {
        return Err(ValidationError::Required {
            field: "device_id".to_string(),
        });
    }

    if device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "device_id".to_string(),
            max: MAX_DEVICE_ID_LEN,
        });
    }

    if !device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "device_id".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates an instruction kind or package name.
pub fn validate_name(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(())
}

// =============================================================================
// Queue Parameter Validators
// =============================================================================

/// Validates a command priority.
pub fn validate_priority(priority: i64) -> ValidationResult<()> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(ValidationError::OutOfRange {
            field: "priority".to_string(),
            min: MIN_PRIORITY,
            max: MAX_PRIORITY,
        });
    }
    Ok(())
}

/// Validates a TTL in seconds. `None` means "never expires" and is valid.
pub fn validate_ttl_secs(ttl_secs: Option<i64>) -> ValidationResult<()> {
    match ttl_secs {
        None => Ok(()),
        Some(secs) if (1..=MAX_TTL_SECS).contains(&secs) => Ok(()),
        Some(_) => Err(ValidationError::OutOfRange {
            field: "ttl_secs".to_string(),
            min: 1,
            max: MAX_TTL_SECS,
        }),
    }
}

/// Validates optional structured args as well-formed JSON.
///
/// The hub never interprets args - they are the device's business - but
/// storing malformed JSON would poison every consumer downstream.
pub fn validate_args_json(args: Option<&str>) -> ValidationResult<()> {
    if let Some(raw) = args {
        serde_json::from_str::<serde_json::Value>(raw).map_err(|e| {
            ValidationError::InvalidFormat {
                field: "args".to_string(),
                reason: e.to_string(),
            }
        })?;
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_rules() {
        assert!(validate_device_id("esp001").is_ok());
        assert!(validate_device_id("rack-2_unit-7").is_ok());
        assert!(validate_device_id("").is_err());
        assert!(validate_device_id("   ").is_err());
        assert!(validate_device_id("esp 001").is_err());
        assert!(validate_device_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_priority_bounds() {
        assert!(validate_priority(0).is_ok());
        assert!(validate_priority(100).is_ok());
        assert!(validate_priority(-1).is_err());
        assert!(validate_priority(101).is_err());
    }

    #[test]
    fn test_ttl_bounds() {
        assert!(validate_ttl_secs(None).is_ok());
        assert!(validate_ttl_secs(Some(60)).is_ok());
        assert!(validate_ttl_secs(Some(0)).is_err());
        assert!(validate_ttl_secs(Some(31 * 24 * 3600)).is_err());
    }

    #[test]
    fn test_args_json() {
        assert!(validate_args_json(None).is_ok());
        assert!(validate_args_json(Some(r#"{"delay": 5}"#)).is_ok());
        assert!(validate_args_json(Some("not json")).is_err());
    }
}
