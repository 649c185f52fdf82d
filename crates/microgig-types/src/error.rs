//! Error taxonomy for the Microgig core
//!
//! Every core operation returns a typed result distinguishing success from a
//! specific error kind. Handlers map kinds to transport-level status codes and
//! never leak internal detail beyond the kind and a safe message.

use thiserror::Error;

use crate::{JobId, ReservationId, UserId, WorkProofId};

/// Result type for Microgig core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Broad classification of a core error, used at the transport boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or out-of-range input
    Validation,
    /// Unknown job, reservation, proof or account
    NotFound,
    /// State-machine transition disallowed (including double-reservation)
    Conflict,
    /// Operation attempted past a deadline
    Expired,
    /// Wallet balance check failed
    InsufficientBalance,
    /// Actor lacks rights over the target entity
    Unauthorized,
    /// Storage or transport failure
    Internal,
}

/// Microgig core error types
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ========================================================================
    // Validation
    // ========================================================================

    /// Amount must be positive and within range
    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    /// Malformed input field
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    /// Reservations are disabled by policy
    #[error("Reservations are currently disabled")]
    ReservationsDisabled,

    // ========================================================================
    // Not found
    // ========================================================================

    /// Job not found
    #[error("Job {job_id} not found")]
    JobNotFound { job_id: JobId },

    /// Reservation not found
    #[error("Reservation {reservation_id} not found")]
    ReservationNotFound { reservation_id: ReservationId },

    /// Work proof not found
    #[error("Work proof {proof_id} not found")]
    WorkProofNotFound { proof_id: WorkProofId },

    /// Ledger account not found
    #[error("Account {user_id} not found")]
    AccountNotFound { user_id: UserId },

    /// Fee settings not found for the given key
    #[error("Fee settings not found: {fee_type}")]
    FeeSettingsNotFound { fee_type: String },

    // ========================================================================
    // Conflict
    // ========================================================================

    /// Job already has an active reservation
    #[error("Job {job_id} is already reserved")]
    AlreadyReserved { job_id: JobId },

    /// Job exists but is not open for reservation
    #[error("Job {job_id} is not open (status: {status})")]
    JobNotOpen { job_id: JobId, status: String },

    /// State-machine transition out of a terminal or incompatible state
    #[error("Invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// Reservation already has a proof under review
    #[error("Reservation {reservation_id} already has a pending work proof")]
    ProofAlreadyPending { reservation_id: ReservationId },

    /// Worker is at the concurrent-reservation cap
    #[error("Worker {worker} has reached the limit of {limit} concurrent reservations")]
    ReservationLimitReached { worker: UserId, limit: u32 },

    /// A settlement group for this reference was already written
    #[error("Duplicate ledger reference: {reference}")]
    DuplicateReference { reference: String },

    // ========================================================================
    // Expired
    // ========================================================================

    /// Operation attempted past the reservation deadline
    #[error("Reservation {reservation_id} has expired")]
    ReservationExpired { reservation_id: ReservationId },

    // ========================================================================
    // Balance
    // ========================================================================

    /// Wallet balance check failed
    #[error("Insufficient balance for {user_id}: requested {requested}, available {available}")]
    InsufficientBalance {
        user_id: UserId,
        requested: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    // ========================================================================
    // Authorization
    // ========================================================================

    /// Actor lacks rights over the target entity
    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    // ========================================================================
    // Internal
    // ========================================================================

    /// Storage or transport failure
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    /// Create an invalid-amount error
    pub fn invalid_amount(message: impl Into<String>) -> Self {
        Self::InvalidAmount {
            message: message.into(),
        }
    }

    /// Create an invalid-input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an unauthorized error
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify this error for the transport boundary
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount { .. } | Self::InvalidInput { .. } | Self::ReservationsDisabled => {
                ErrorKind::Validation
            }
            Self::JobNotFound { .. }
            | Self::ReservationNotFound { .. }
            | Self::WorkProofNotFound { .. }
            | Self::AccountNotFound { .. }
            | Self::FeeSettingsNotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyReserved { .. }
            | Self::JobNotOpen { .. }
            | Self::InvalidTransition { .. }
            | Self::ProofAlreadyPending { .. }
            | Self::ReservationLimitReached { .. }
            | Self::DuplicateReference { .. } => ErrorKind::Conflict,
            Self::ReservationExpired { .. } => ErrorKind::Expired,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Stable error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::ReservationsDisabled => "RESERVATIONS_DISABLED",
            Self::JobNotFound { .. } => "JOB_NOT_FOUND",
            Self::ReservationNotFound { .. } => "RESERVATION_NOT_FOUND",
            Self::WorkProofNotFound { .. } => "WORK_PROOF_NOT_FOUND",
            Self::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
            Self::FeeSettingsNotFound { .. } => "FEE_SETTINGS_NOT_FOUND",
            Self::AlreadyReserved { .. } => "ALREADY_RESERVED",
            Self::JobNotOpen { .. } => "JOB_NOT_OPEN",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ProofAlreadyPending { .. } => "PROOF_ALREADY_PENDING",
            Self::ReservationLimitReached { .. } => "RESERVATION_LIMIT_REACHED",
            Self::DuplicateReference { .. } => "DUPLICATE_REFERENCE",
            Self::ReservationExpired { .. } => "RESERVATION_EXPIRED",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Whether a bounded retry at the storage boundary is appropriate.
    ///
    /// Logically-final decisions (a reservation already taken, a disallowed
    /// transition) are never retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_kinds() {
        let err = CoreError::AlreadyReserved { job_id: JobId::new() };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.error_code(), "ALREADY_RESERVED");

        let err = CoreError::InsufficientBalance {
            user_id: UserId::new(),
            requested: dec!(100),
            available: dec!(50),
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
    }

    #[test]
    fn test_retriable_errors() {
        assert!(CoreError::internal("io").is_retriable());
        assert!(!CoreError::AlreadyReserved { job_id: JobId::new() }.is_retriable());
        assert!(!CoreError::DuplicateReference {
            reference: "x".into()
        }
        .is_retriable());
    }
}
