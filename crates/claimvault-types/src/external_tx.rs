//! Records of external ledger transactions that have triggered an effect.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ClaimvaultError, ResolutionRecord, Result, Subject, TxHash};

/// Lifecycle of a recorded reference.
///
/// A row exists from `Recorded` onward; the row itself is the replay
/// barrier, so a `Failed` reference stays unusable until reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalTxStatus {
    /// Inserted; effect not yet confirmed.
    Recorded,
    Applied,
    Failed,
}

impl ExternalTxStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recorded => "recorded",
            Self::Applied => "applied",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExternalTxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExternalTxStatus {
    type Err = ClaimvaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "recorded" => Ok(Self::Recorded),
            "applied" => Ok(Self::Applied),
            "failed" => Ok(Self::Failed),
            other => Err(ClaimvaultError::InvalidPayload {
                reason: format!("unknown external tx status {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTxRecord {
    pub tx_hash: TxHash,
    /// Subject confirmed by the external verifier.
    pub subject: Subject,
    /// Effect metadata confirmed by the external verifier.
    pub metadata: serde_json::Value,
    /// What the client claimed; kept for audit only.
    pub declared_metadata: serde_json::Value,
    pub status: ExternalTxStatus,
    pub recorded_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub outcome_detail: Option<String>,
    pub resolution: Option<ResolutionRecord>,
}

impl ExternalTxRecord {
    #[must_use]
    pub fn recorded(
        tx_hash: TxHash,
        subject: Subject,
        metadata: serde_json::Value,
        declared_metadata: serde_json::Value,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tx_hash,
            subject,
            metadata,
            declared_metadata,
            status: ExternalTxStatus::Recorded,
            recorded_at: crate::truncate_to_millis(recorded_at),
            settled_at: None,
            outcome_detail: None,
            resolution: None,
        }
    }

    #[must_use]
    pub fn awaiting_reconciliation(&self) -> bool {
        self.status == ExternalTxStatus::Failed && self.resolution.is_none()
    }
}
