//! Authentication of external transaction references.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use claimvault_types::{Result, Subject, TxHash};

/// What the external ledger reports about a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedReference {
    /// The transaction exists and is final.
    pub valid: bool,
    /// Sender or beneficiary, when the external ledger knows one.
    pub subject: Option<Subject>,
    /// Authoritative metadata (amount paid, item bought, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl VerifiedReference {
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            valid: false,
            subject: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Confirms that a transaction hash names a real, settled transaction.
///
/// `Err` means the external ledger could not be asked (retry later);
/// a definite "no" is `Ok` with `valid == false`.
#[async_trait]
pub trait ReferenceVerifier: Send + Sync + 'static {
    async fn verify_reference(&self, tx_hash: &TxHash) -> Result<VerifiedReference>;
}
