//! Error types for the ClaimVault engine.
//!
//! All errors use the `CV_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Validation errors (retryable after the caller fixes the input)
//! - 2xx: Cryptographic errors (fatal to the request)
//! - 3xx: Temporal errors (fatal to the claim)
//! - 4xx: Concurrency / conflict outcomes (expected negative results)
//! - 5xx: Effect and integrity errors (require reconciliation)
//! - 6xx: Ledger / storage errors
//! - 7xx: Reconciliation errors
//! - 9xx: General / internal errors

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{ActionId, ClaimId, TokenAmount, TxHash};

/// Coarse classification used by callers to pick a response status.
///
/// Conflicts are deliberately a class of their own: "someone already
/// completed this" must never be reported like "something broke".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Validation,
    Cryptographic,
    Temporal,
    Conflict,
    NotFound,
    Effect,
    Integrity,
    Unavailable,
    Internal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validation => "VALIDATION",
            Self::Cryptographic => "CRYPTOGRAPHIC",
            Self::Temporal => "TEMPORAL",
            Self::Conflict => "CONFLICT",
            Self::NotFound => "NOT_FOUND",
            Self::Effect => "EFFECT",
            Self::Integrity => "INTEGRITY",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// Central error enum for all ClaimVault operations.
#[derive(Debug, Error)]
pub enum ClaimvaultError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// The subject identity is malformed.
    #[error("CV_ERR_100: Invalid subject: {reason}")]
    InvalidSubject { reason: String },

    /// An amount is negative, fractional, or out of range.
    #[error("CV_ERR_101: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// The authoritative calculator rejected the input or produced a non-positive amount.
    #[error("CV_ERR_102: Amount computation failed: {reason}")]
    ComputationError { reason: String },

    /// The pending action type is malformed.
    #[error("CV_ERR_103: Invalid action type: {reason}")]
    InvalidActionType { reason: String },

    /// The external transaction hash is malformed.
    #[error("CV_ERR_104: Invalid transaction hash: {reason}")]
    InvalidTxHash { reason: String },

    /// A payload field could not be parsed.
    #[error("CV_ERR_105: Invalid payload: {reason}")]
    InvalidPayload { reason: String },

    // =================================================================
    // Cryptographic Errors (2xx)
    // =================================================================
    /// The signature does not verify against the authorized signer.
    #[error("CV_ERR_200: Invalid signature: {reason}")]
    InvalidSignature { reason: String },

    /// The external ledger verifier did not confirm the reference.
    #[error("CV_ERR_201: External reference {tx_hash} rejected: {reason}")]
    InvalidReference { tx_hash: TxHash, reason: String },

    // =================================================================
    // Temporal Errors (3xx)
    // =================================================================
    /// The claim expired before it was consumed.
    #[error("CV_ERR_300: Claim {claim_id} expired at {expires_at}")]
    Expired {
        claim_id: ClaimId,
        expires_at: DateTime<Utc>,
    },

    // =================================================================
    // Conflict Outcomes (4xx)
    // =================================================================
    /// Another caller already consumed this claim.
    #[error("CV_ERR_400: Claim already used: {0}")]
    AlreadyUsed(ClaimId),

    /// Another caller already claimed execution of this action.
    #[error("CV_ERR_401: Pending action conflict: {0}")]
    Conflict(ActionId),

    /// This external transaction reference has already been recorded.
    #[error("CV_ERR_402: Duplicate external reference: {0}")]
    DuplicateReference(TxHash),

    /// No record with this identity exists.
    #[error("CV_ERR_404: {kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    // =================================================================
    // Effect / Integrity Errors (5xx)
    // =================================================================
    /// The state mutator failed after the resource was consumed.
    /// The record stays consumed and awaits reconciliation.
    #[error("CV_ERR_500: Effect failed for {target}: {reason}")]
    EffectFailed { target: String, reason: String },

    /// The ledger amount differs from the presented payload.
    #[error("CV_ERR_501: Amount mismatch on claim {claim_id}: recorded {recorded}, presented {presented}")]
    AmountMismatch {
        claim_id: ClaimId,
        recorded: TokenAmount,
        presented: TokenAmount,
    },

    /// The ledger subject or purpose differs from the presented payload.
    #[error("CV_ERR_502: Claim {claim_id} does not match issued record: {reason}")]
    ClaimMismatch { claim_id: ClaimId, reason: String },

    // =================================================================
    // Ledger Errors (6xx)
    // =================================================================
    /// The durable store failed.
    #[error("CV_ERR_600: Ledger error: {0}")]
    Ledger(String),

    /// The durable store did not confirm the write in time.
    #[error("CV_ERR_601: Ledger {operation} timed out after {timeout_ms}ms")]
    LedgerTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// A freshly generated identity collided with an existing row.
    #[error("CV_ERR_602: Duplicate {kind} record: {id}")]
    DuplicateRecord { kind: &'static str, id: String },

    // =================================================================
    // Reconciliation Errors (7xx)
    // =================================================================
    /// The target is not in a failed state awaiting reconciliation.
    #[error("CV_ERR_700: {target} is not awaiting reconciliation")]
    NotReconcilable { target: String },

    /// Another operator already resolved this failure.
    #[error("CV_ERR_701: {target} already resolved")]
    AlreadyResolved { target: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("CV_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("CV_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("CV_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (disk, network).
    #[error("CV_ERR_903: I/O error: {0}")]
    Io(String),
}

impl ClaimvaultError {
    /// Stable machine-readable code, e.g. `"CV_ERR_400"`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSubject { .. } => "CV_ERR_100",
            Self::InvalidAmount { .. } => "CV_ERR_101",
            Self::ComputationError { .. } => "CV_ERR_102",
            Self::InvalidActionType { .. } => "CV_ERR_103",
            Self::InvalidTxHash { .. } => "CV_ERR_104",
            Self::InvalidPayload { .. } => "CV_ERR_105",
            Self::InvalidSignature { .. } => "CV_ERR_200",
            Self::InvalidReference { .. } => "CV_ERR_201",
            Self::Expired { .. } => "CV_ERR_300",
            Self::AlreadyUsed(_) => "CV_ERR_400",
            Self::Conflict(_) => "CV_ERR_401",
            Self::DuplicateReference(_) => "CV_ERR_402",
            Self::NotFound { .. } => "CV_ERR_404",
            Self::EffectFailed { .. } => "CV_ERR_500",
            Self::AmountMismatch { .. } => "CV_ERR_501",
            Self::ClaimMismatch { .. } => "CV_ERR_502",
            Self::Ledger(_) => "CV_ERR_600",
            Self::LedgerTimeout { .. } => "CV_ERR_601",
            Self::DuplicateRecord { .. } => "CV_ERR_602",
            Self::NotReconcilable { .. } => "CV_ERR_700",
            Self::AlreadyResolved { .. } => "CV_ERR_701",
            Self::Internal(_) => "CV_ERR_900",
            Self::Serialization(_) => "CV_ERR_901",
            Self::Configuration(_) => "CV_ERR_902",
            Self::Io(_) => "CV_ERR_903",
        }
    }

    /// Coarse class of this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidSubject { .. }
            | Self::InvalidAmount { .. }
            | Self::ComputationError { .. }
            | Self::InvalidActionType { .. }
            | Self::InvalidTxHash { .. }
            | Self::InvalidPayload { .. } => ErrorClass::Validation,
            Self::InvalidSignature { .. } | Self::InvalidReference { .. } => {
                ErrorClass::Cryptographic
            }
            Self::Expired { .. } => ErrorClass::Temporal,
            Self::AlreadyUsed(_)
            | Self::Conflict(_)
            | Self::DuplicateReference(_)
            | Self::AlreadyResolved { .. } => ErrorClass::Conflict,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::EffectFailed { .. } => ErrorClass::Effect,
            Self::AmountMismatch { .. } | Self::ClaimMismatch { .. } => ErrorClass::Integrity,
            Self::Ledger(_) | Self::LedgerTimeout { .. } | Self::Io(_) => ErrorClass::Unavailable,
            Self::DuplicateRecord { .. }
            | Self::NotReconcilable { .. }
            | Self::Internal(_)
            | Self::Serialization(_)
            | Self::Configuration(_) => ErrorClass::Internal,
        }
    }

    /// Whether the caller may resend the identical request later.
    ///
    /// Validation errors need a corrected request, so they are not
    /// retryable as-is. Conflicts are final answers.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Unavailable
    }

    /// Whether this is an expected lost-race outcome.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.class() == ErrorClass::Conflict
    }

    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, ClaimvaultError>;

impl From<std::io::Error> for ClaimvaultError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ClaimvaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Shorthand constructors used across crates.
impl ClaimvaultError {
    #[must_use]
    pub fn claim_not_found(claim_id: ClaimId) -> Self {
        Self::not_found("claim", claim_id)
    }

    #[must_use]
    pub fn action_not_found(action_id: ActionId) -> Self {
        Self::not_found("pending action", action_id)
    }

    #[must_use]
    pub fn tx_not_found(tx_hash: &TxHash) -> Self {
        Self::not_found("external transaction", tx_hash)
    }
}
