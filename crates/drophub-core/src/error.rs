//! # Error Types
//!
//! Domain-specific error types for drophub-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  drophub-core errors (this file)                                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  drophub-db errors (separate crate)                                    │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  drophub-engine errors (separate crate)                                │
//! │  └── HubError         - The device-facing taxonomy (UNKNOWN_DEVICE,    │
//! │                         INVALID_CREDENTIAL, WRONG_DEVICE, ...)         │
//! │                                                                         │
//! │  Flow: ValidationError → HubError → ApiError → HTTP status             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (device id, field name, etc.)
//! 3. Errors are enum variants, never String

use thiserror::Error;

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when admin or device input doesn't meet
/// requirements. Used for early validation before any state is touched.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (bad characters, malformed JSON, ...).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in the allowed set.
    #[error("{field} '{value}' is not allowed")]
    NotAllowed { field: String, value: String },
}

/// Convenience type alias for Results with ValidationError.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ValidationError::Required {
            field: "device_id".to_string(),
        };
        assert_eq!(err.to_string(), "device_id is required");

        let err = ValidationError::OutOfRange {
            field: "priority".to_string(),
            min: 0,
            max: 100,
        };
        assert_eq!(err.to_string(), "priority must be between 0 and 100");
    }
}
