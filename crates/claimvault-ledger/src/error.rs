use claimvault_types::ClaimvaultError;

/// All errors that can be returned by a [`ClaimLedger`](crate::ClaimLedger)
/// implementation.
///
/// Lost races are not errors; they come back as transition enums.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A row with this primary key already exists.
    #[error("duplicate {kind} record: {id}")]
    Duplicate { kind: &'static str, id: String },

    /// A stored row could not be decoded into a domain record.
    #[error("corrupt {kind} row {id}: {reason}")]
    Corrupt {
        kind: &'static str,
        id: String,
        reason: String,
    },

    /// The caller asked for a transition the state machine forbids.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking worker running the statement panicked or was cancelled.
    #[error("ledger task failed during {operation}: {reason}")]
    Task {
        operation: &'static str,
        reason: String,
    },
}

impl From<LedgerError> for ClaimvaultError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Duplicate { kind, id } => Self::DuplicateRecord { kind, id },
            LedgerError::Corrupt { .. } | LedgerError::InvalidTransition(_) => {
                Self::Internal(err.to_string())
            }
            LedgerError::Serialization(e) => Self::Serialization(e.to_string()),
            LedgerError::Sqlite(_) | LedgerError::Io(_) | LedgerError::Task { .. } => {
                Self::Ledger(err.to_string())
            }
        }
    }
}
