//! The module contains the errors the engine can return.
//!
//! Callers recover from most of them:
//!
//! - [`InvalidAmount`], [`InvalidName`], [`InvalidId`] are validation errors,
//!   nothing has been written.
//! - [`KeyNotFound`] the referenced entity does not exist or is not owned by
//!   the caller.
//! - [`Conflict`] a concurrent writer won the race; retry against the current
//!   version, never the same request.
//! - [`InvalidState`] the requested transition is not allowed from the
//!   entity's current state.
//!
//! [`InvariantViolation`] is different: it means the serialization guarantee
//! was breached. The engine records it as a critical system alert.
//!
//!  [`InvalidAmount`]: EngineError::InvalidAmount
//!  [`InvalidName`]: EngineError::InvalidName
//!  [`InvalidId`]: EngineError::InvalidId
//!  [`KeyNotFound`]: EngineError::KeyNotFound
//!  [`Conflict`]: EngineError::Conflict
//!  [`InvalidState`]: EngineError::InvalidState
//!  [`InvariantViolation`]: EngineError::InvariantViolation
use sea_orm::DbErr;
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid name: {0}")]
    InvalidName(String),
    #[error("Invalid id: {0}")]
    InvalidId(String),
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl EngineError {
    /// Returns `true` for errors the caller caused and can act on.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::InvariantViolation(_) | Self::Database(_) | Self::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InsufficientFunds(a), Self::InsufficientFunds(b)) => a == b,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::ExistingKey(a), Self::ExistingKey(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::InvalidName(a), Self::InvalidName(b)) => a == b,
            (Self::InvalidId(a), Self::InvalidId(b)) => a == b,
            (Self::InvalidCursor(a), Self::InvalidCursor(b)) => a == b,
            (Self::Conflict(a), Self::Conflict(b)) => a == b,
            (Self::InvalidState(a), Self::InvalidState(b)) => a == b,
            (Self::ProviderUnavailable(a), Self::ProviderUnavailable(b)) => a == b,
            (Self::InvariantViolation(a), Self::InvariantViolation(b)) => a == b,
            (Self::Serialization(a), Self::Serialization(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
