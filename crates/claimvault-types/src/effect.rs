//! Effects handed to the external state mutator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ClaimId, ClaimPurpose, TokenAmount, TxHash};

/// A privileged state change the engine has authorized exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    /// Credit a fixed amount authorized by a consumed claim.
    Credit {
        claim_id: ClaimId,
        amount: TokenAmount,
        purpose: ClaimPurpose,
    },
    /// Run a pending action (paid upgrade, unlock, ...).
    Action {
        action_type: String,
        payload: serde_json::Value,
    },
    /// Apply whatever an authenticated external transaction entitles.
    ExternalTransaction {
        tx_hash: TxHash,
        metadata: serde_json::Value,
    },
}

impl Effect {
    /// Short label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Credit { .. } => "credit",
            Self::Action { .. } => "action",
            Self::ExternalTransaction { .. } => "external_transaction",
        }
    }
}

/// Acknowledgement from the state mutator that an effect was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectReceipt {
    /// Mutator-side reference (journal entry, balance version, ...).
    pub reference: String,
    pub applied_at: DateTime<Utc>,
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl EffectReceipt {
    #[must_use]
    pub fn new(reference: impl Into<String>, applied_at: DateTime<Utc>) -> Self {
        Self {
            reference: reference.into(),
            applied_at,
            detail: serde_json::Value::Null,
        }
    }
}
