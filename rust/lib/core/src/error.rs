use thiserror::Error;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable, machine-readable identifiers. Presentation code matches on
// these, never on the human-readable message string.

/// Stable error code constants.
///
/// Codes never change; messages may be reworded.
pub mod error_code {
    pub const STORE_WRITE_ERROR: &str = "STORE_WRITE_ERROR";
    pub const STORE_READ_ERROR: &str = "STORE_READ_ERROR";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const INTERNAL: &str = "INTERNAL";
}

// ── ServiceError ────────────────────────────────────────────────────

/// Unified error type for device configuration operations.
///
/// Each variant maps to a stable error code (see [`error_code`]) and to a
/// short user-facing message used by the device list when a mutation fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Write to the backing store failed. The record is unchanged.
    #[error("{0}")]
    StoreWrite(String),

    /// Read from the backing store failed, or the stored data is malformed.
    #[error("{0}")]
    StoreRead(String),

    /// The operation targeted a record that no longer exists.
    #[error("{0}")]
    NotFound(String),

    /// The payload failed structural checks before save.
    #[error("{0}")]
    Validation(String),

    /// Unexpected internal error (worker panicked, channel closed).
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable, machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::StoreWrite(_) => error_code::STORE_WRITE_ERROR,
            ServiceError::StoreRead(_) => error_code::STORE_READ_ERROR,
            ServiceError::NotFound(_) => error_code::NOT_FOUND,
            ServiceError::Validation(_) => error_code::VALIDATION_FAILED,
            ServiceError::Internal(_) => error_code::INTERNAL,
        }
    }

    /// Message shown to the user when a device operation fails.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::StoreWrite(_) => {
                "Device did not save correctly. Try again.".to_string()
            }
            ServiceError::StoreRead(_) => {
                "Device configurations could not be read.".to_string()
            }
            ServiceError::NotFound(_) => "Device no longer exists.".to_string(),
            ServiceError::Validation(msg) => format!("Invalid configuration: {}", msg),
            ServiceError::Internal(_) => {
                "An error occurred. Please try again.".to_string()
            }
        }
    }
}
