//! # Claims: signed, use-once entitlements
//!
//! A claim is minted server-side with an authoritative amount, persisted,
//! and handed to the client as a [`SignedClaim`]. The client can present it
//! later, but cannot change what it authorizes.
//!
//! ## State Machine
//!
//! ```text
//!   ┌────────┐  consume (CAS)  ┌──────────┐  effect ok   ┌─────────┐
//!   │ UNUSED ├────────────────▶│ CONSUMED ├─────────────▶│ APPLIED │
//!   └───┬────┘                 └────┬─────┘              └─────────┘
//!       │ expiry + grace            │ effect failed / mismatch
//!       ▼                           ▼
//!   ┌────────┐                 ┌──────────────────┐  operator  ┌──────────┐
//!   │ PURGED │                 │ FAILED/REJECTED  ├───────────▶│ RESOLVED │
//!   └────────┘                 └──────────────────┘            └──────────┘
//! ```
//!
//! `used` never goes back to `false`; a failed effect is reconciled by an
//! operator, not by reopening the claim.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::truncate_to_millis;
use crate::constants::CLAIM_DIGEST_TAG;
use crate::{
    ClaimId, ClaimvaultError, ResolutionRecord, Result, SignerId, SigningDomain, Subject,
    TokenAmount,
};

/// What a claim entitles its subject to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPurpose {
    /// Credit earned tokens.
    Reward,
    /// Execute a paid upgrade.
    Upgrade,
    /// Compensation reissued after a failed effect.
    Refund,
}

impl ClaimPurpose {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reward => "reward",
            Self::Upgrade => "upgrade",
            Self::Refund => "refund",
        }
    }
}

impl fmt::Display for ClaimPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimPurpose {
    type Err = ClaimvaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reward" => Ok(Self::Reward),
            "upgrade" => Ok(Self::Upgrade),
            "refund" => Ok(Self::Refund),
            other => Err(ClaimvaultError::InvalidPayload {
                reason: format!("unknown claim purpose {other:?}"),
            }),
        }
    }
}

/// Result recorded after a claim was consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// The state mutator applied the credit.
    Applied,
    /// The state mutator failed after consumption.
    Failed,
    /// The winner's integrity re-check failed; no effect was attempted.
    Rejected,
}

impl ClaimOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }

    /// Whether this outcome needs an operator decision.
    #[must_use]
    pub fn needs_reconciliation(&self) -> bool {
        matches!(self, Self::Failed | Self::Rejected)
    }
}

impl fmt::Display for ClaimOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimOutcome {
    type Err = ClaimvaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "applied" => Ok(Self::Applied),
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            other => Err(ClaimvaultError::InvalidPayload {
                reason: format!("unknown claim outcome {other:?}"),
            }),
        }
    }
}

/// The durable record behind a signed claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claim_id: ClaimId,
    pub subject: Subject,
    /// Fixed at issuance. Never updated.
    pub amount: TokenAmount,
    pub purpose: ClaimPurpose,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Instance that won the consume race.
    pub consumed_by: Option<String>,
    pub outcome: Option<ClaimOutcome>,
    pub outcome_detail: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
    pub resolution: Option<ResolutionRecord>,
    /// The failed claim this one replaces, when reissued by an operator.
    pub supersedes: Option<ClaimId>,
}

impl ClaimRecord {
    /// Build a fresh, unused record. Timestamps are truncated to the
    /// millisecond precision the ledger keeps.
    #[must_use]
    pub fn issue(
        subject: Subject,
        amount: TokenAmount,
        purpose: ClaimPurpose,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let created_at = truncate_to_millis(issued_at);
        Self {
            claim_id: ClaimId::new(),
            subject,
            amount,
            purpose,
            expires_at: created_at + ttl,
            used: false,
            used_at: None,
            created_at,
            consumed_by: None,
            outcome: None,
            outcome_detail: None,
            settled_at: None,
            resolution: None,
            supersedes: None,
        }
    }

    /// Returns `true` if `now` is past expiry plus the skew tolerance.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        now > self.expires_at + skew
    }

    /// The canonical payload for this record.
    #[must_use]
    pub fn payload(&self) -> ClaimPayload {
        ClaimPayload {
            claim_id: self.claim_id,
            subject: self.subject.clone(),
            amount: self.amount.clone(),
            purpose: self.purpose,
            expires_at: self.expires_at,
        }
    }

    /// Whether an operator still has to settle a failed effect.
    #[must_use]
    pub fn awaiting_reconciliation(&self) -> bool {
        self.resolution.is_none()
            && self
                .outcome
                .as_ref()
                .is_some_and(ClaimOutcome::needs_reconciliation)
    }

    /// Consumed, but no outcome has been written yet.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.used && self.outcome.is_none()
    }

    /// Check that a presented payload still describes this record.
    ///
    /// # Errors
    /// `AmountMismatch` if the amounts differ, `ClaimMismatch` for any
    /// other field.
    pub fn check_matches(&self, payload: &ClaimPayload) -> Result<()> {
        if payload.claim_id != self.claim_id {
            return Err(ClaimvaultError::ClaimMismatch {
                claim_id: self.claim_id,
                reason: format!("payload names claim {}", payload.claim_id),
            });
        }
        if payload.amount != self.amount {
            return Err(ClaimvaultError::AmountMismatch {
                claim_id: self.claim_id,
                recorded: self.amount.clone(),
                presented: payload.amount.clone(),
            });
        }
        if payload.subject != self.subject {
            return Err(ClaimvaultError::ClaimMismatch {
                claim_id: self.claim_id,
                reason: format!(
                    "subject {} differs from recorded {}",
                    payload.subject, self.subject
                ),
            });
        }
        if payload.purpose != self.purpose {
            return Err(ClaimvaultError::ClaimMismatch {
                claim_id: self.claim_id,
                reason: format!(
                    "purpose {} differs from recorded {}",
                    payload.purpose, self.purpose
                ),
            });
        }
        if payload.expires_at.timestamp_millis() != self.expires_at.timestamp_millis() {
            return Err(ClaimvaultError::ClaimMismatch {
                claim_id: self.claim_id,
                reason: "expiry differs from recorded".into(),
            });
        }
        Ok(())
    }
}

/// The signed part of a claim, as handed to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPayload {
    pub claim_id: ClaimId,
    pub subject: Subject,
    pub amount: TokenAmount,
    pub purpose: ClaimPurpose,
    pub expires_at: DateTime<Utc>,
}

impl ClaimPayload {
    /// Domain-separated digest that the signer signs.
    ///
    /// Format: `SHA-256("claimvault:claim:v1:" || lp(app_name) || lp(app_version)
    /// || lp(network_id) || claim_id || lp(subject) || lp(amount) || lp(purpose)
    /// || expires_at_ms)` where `lp` is a u32-LE length prefix.
    #[must_use]
    pub fn signing_digest(&self, domain: &SigningDomain) -> [u8; 32] {
        fn put(hasher: &mut Sha256, field: &[u8]) {
            #[allow(clippy::cast_possible_truncation)]
            hasher.update((field.len() as u32).to_le_bytes());
            hasher.update(field);
        }

        let mut hasher = Sha256::new();
        hasher.update(CLAIM_DIGEST_TAG);
        put(&mut hasher, domain.app_name.as_bytes());
        put(&mut hasher, domain.app_version.as_bytes());
        put(&mut hasher, domain.network_id.as_bytes());
        hasher.update(self.claim_id.as_bytes());
        put(&mut hasher, self.subject.as_str().as_bytes());
        put(&mut hasher, self.amount.to_string().as_bytes());
        put(&mut hasher, self.purpose.as_str().as_bytes());
        hasher.update(self.expires_at.timestamp_millis().to_le_bytes());

        let result = hasher.finalize();
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&result);
        digest
    }

    /// Returns `true` if `now` is past expiry plus the skew tolerance.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        now > self.expires_at + skew
    }
}

/// Signer identity plus ed25519 signature over the payload digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSignature {
    pub signer: SignerId,
    #[serde(with = "crate::hex_serde")]
    pub bytes: Vec<u8>,
}

/// What `IssueClaim` returns and `SubmitClaim` accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedClaim {
    pub payload: ClaimPayload,
    pub signature: ClaimSignature,
}

/// Dummy record for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl ClaimRecord {
    /// Create an unused record valid for one hour.
    #[must_use]
    pub fn dummy(subject: &str, amount: u64) -> Self {
        Self::issue(
            Subject::new(subject).unwrap_or_else(|e| panic!("dummy subject: {e}")),
            TokenAmount::from_u64(amount),
            ClaimPurpose::Reward,
            Utc::now(),
            Duration::hours(1),
        )
    }
}
