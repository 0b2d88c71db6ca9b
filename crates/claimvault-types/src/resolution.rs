//! Operator resolutions for consumed-but-failed records.
//!
//! A claim, action or external reference whose effect failed after it was
//! consumed is never reopened. An operator records how the failure was
//! settled instead.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ClaimId, ClaimvaultError, Result};

/// How an operator settled a failed effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The subject was compensated out of band.
    Refunded,
    /// A fresh claim with the same terms was issued.
    Reissued,
    /// No compensation; closed with a note.
    WrittenOff,
}

impl Resolution {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refunded => "refunded",
            Self::Reissued => "reissued",
            Self::WrittenOff => "written_off",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = ClaimvaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "refunded" => Ok(Self::Refunded),
            "reissued" => Ok(Self::Reissued),
            "written_off" => Ok(Self::WrittenOff),
            other => Err(ClaimvaultError::InvalidPayload {
                reason: format!("unknown resolution {other:?}"),
            }),
        }
    }
}

/// The operator decision recorded against a failed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub resolution: Resolution,
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
    pub note: Option<String>,
    /// Set when `resolution` is [`Resolution::Reissued`] on a claim.
    pub replacement_claim_id: Option<ClaimId>,
}
