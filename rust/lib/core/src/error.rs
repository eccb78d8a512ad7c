use thiserror::Error;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable, machine-readable identifiers. Log consumers match on these,
// never on the human-readable message string.

/// Stable error code constants.
pub mod error_code {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
    pub const INTERNAL: &str = "INTERNAL";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
}

// ── ServiceError ────────────────────────────────────────────────────

/// Unified service error type used across all crates.
///
/// Each variant maps to a stable error code (see [`error_code`]) and to a
/// short reply that is safe to show to a chat user. Storage details never
/// leak into chat replies; they go to the log.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Record does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Duplicate key / record already exists.
    #[error("{0}")]
    Conflict(String),

    /// Storage backend failure.
    #[error("{0}")]
    Storage(String),

    /// Unexpected internal error.
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable, machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => error_code::NOT_FOUND,
            ServiceError::Conflict(_) => error_code::ALREADY_EXISTS,
            ServiceError::Storage(_) => error_code::STORAGE_ERROR,
            ServiceError::Internal(_) => error_code::INTERNAL,
        }
    }

    /// Reply text shown to the user who triggered the failing operation.
    pub fn user_message(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => {
                "You are not registered yet. Send /start to join."
            }
            ServiceError::Conflict(_) => "That request could not be processed.",
            ServiceError::Storage(_) | ServiceError::Internal(_) => {
                "Something went wrong, please try again later."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_mapping() {
        assert_eq!(ServiceError::NotFound("x".into()).error_code(), "NOT_FOUND");
        assert_eq!(ServiceError::Conflict("x".into()).error_code(), "ALREADY_EXISTS");
        assert_eq!(ServiceError::Storage("x".into()).error_code(), "STORAGE_ERROR");
        assert_eq!(ServiceError::Internal("x".into()).error_code(), "INTERNAL");
    }

    #[test]
    fn user_message_hides_storage_details() {
        let err = ServiceError::Storage("disk I/O error at page 7".into());
        assert!(!err.user_message().contains("disk"));
    }

    #[test]
    fn every_variant_has_a_distinct_code() {
        let codes = [
            ServiceError::NotFound(String::new()).error_code(),
            ServiceError::Conflict(String::new()).error_code(),
            ServiceError::Storage(String::new()).error_code(),
            ServiceError::Internal(String::new()).error_code(),
        ];
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn not_found_points_to_start() {
        let msg = ServiceError::NotFound("user 9".into()).user_message();
        assert!(msg.contains("/start"));
    }

    #[test]
    fn error_display_is_just_message() {
        assert_eq!(ServiceError::NotFound("user 123".into()).to_string(), "user 123");
        assert_eq!(ServiceError::Conflict("dup key".into()).to_string(), "dup key");
    }
}
