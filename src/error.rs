//! Error taxonomy shared by every engine operation.
//!
//! Each variant maps to a distinct caller-facing response. `Conflict`
//! means the caller should re-fetch state and retry the whole operation.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClinicError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

/// Discriminant of [`ClinicError`], for transport layers that only care
/// about the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Conflict,
    ValidationFailed,
    NotSupported,
}

impl ClinicError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ClinicError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClinicError::NotFound { .. } => ErrorKind::NotFound,
            ClinicError::InvalidState(_) => ErrorKind::InvalidState,
            ClinicError::Conflict(_) => ErrorKind::Conflict,
            ClinicError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            ClinicError::NotSupported(_) => ErrorKind::NotSupported,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClinicError>;
