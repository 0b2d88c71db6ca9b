//! Claim issuance.
//!
//! ```text
//!   subject, purpose, context
//!          │
//!          ▼
//!   AmountCalculator ──▶ ClaimRecord (used = false) ──▶ ledger (bounded wait)
//!                                                            │ confirmed
//!                                                            ▼
//!                                              sign(domain digest) ──▶ SignedClaim
//! ```
//!
//! A signature is only produced after the ledger confirmed the record.

use std::sync::Arc;

use chrono::Duration;

use claimvault_ledger::ClaimLedger;
use claimvault_types::{
    ClaimPayload, ClaimPurpose, ClaimRecord, ClaimSignature, ClaimvaultError, Clock, EngineConfig,
    Result, SignedClaim, SignerId, SigningDomain, Subject,
};

use crate::{AmountCalculator, ClaimSigningKey};

/// Mints claims: computes, persists, signs.
pub struct ClaimSigner {
    ledger: Arc<dyn ClaimLedger>,
    calculator: Arc<dyn AmountCalculator>,
    key: Arc<dyn ClaimSigningKey>,
    clock: Arc<dyn Clock>,
    domain: SigningDomain,
    claim_ttl: Duration,
    persist_timeout: std::time::Duration,
}

impl ClaimSigner {
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        ledger: Arc<dyn ClaimLedger>,
        calculator: Arc<dyn AmountCalculator>,
        key: Arc<dyn ClaimSigningKey>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            calculator,
            key,
            clock,
            domain: config.domain.clone(),
            claim_ttl: config.claim_ttl(),
            persist_timeout: config.persist_timeout(),
        }
    }

    #[must_use]
    pub fn signer_id(&self) -> SignerId {
        self.key.signer_id()
    }

    #[must_use]
    pub fn domain(&self) -> &SigningDomain {
        &self.domain
    }

    /// Issue a new claim for `subject`.
    ///
    /// # Errors
    /// - `ComputationError` if the calculator refuses or returns zero
    /// - `LedgerTimeout` / `Ledger` if the record could not be confirmed;
    ///   no signature is returned in that case
    pub async fn issue_claim(
        &self,
        subject: &Subject,
        purpose: ClaimPurpose,
        context: &serde_json::Value,
    ) -> Result<SignedClaim> {
        let amount = self
            .calculator
            .compute_amount(subject, purpose, context)
            .await?;
        if !amount.is_positive() {
            return Err(ClaimvaultError::ComputationError {
                reason: format!("calculator returned non-positive amount {amount} for {subject}"),
            });
        }

        let record = ClaimRecord::issue(
            subject.clone(),
            amount,
            purpose,
            self.clock.now(),
            self.claim_ttl,
        );
        self.persist(&record).await?;
        let signed = self.sign(&record.payload())?;

        tracing::info!(
            claim_id = %record.claim_id,
            subject = %record.subject,
            amount = %record.amount,
            purpose = %record.purpose,
            expires_at = %record.expires_at,
            "Claim issued"
        );
        Ok(signed)
    }

    /// Build an unsaved replacement for a failed claim: same terms, fresh id
    /// and expiry, linked back through `supersedes`.
    #[must_use]
    pub fn prepare_replacement(&self, original: &ClaimRecord) -> ClaimRecord {
        let mut replacement = ClaimRecord::issue(
            original.subject.clone(),
            original.amount.clone(),
            original.purpose,
            self.clock.now(),
            self.claim_ttl,
        );
        replacement.supersedes = Some(original.claim_id);
        replacement
    }

    /// Sign a payload whose record is already durable.
    pub fn sign(&self, payload: &ClaimPayload) -> Result<SignedClaim> {
        let digest = payload.signing_digest(&self.domain);
        let bytes = self.key.sign_digest(&digest)?;
        Ok(SignedClaim {
            payload: payload.clone(),
            signature: ClaimSignature {
                signer: self.key.signer_id(),
                bytes,
            },
        })
    }

    async fn persist(&self, record: &ClaimRecord) -> Result<()> {
        match tokio::time::timeout(self.persist_timeout, self.ledger.insert_claim(record)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(
                    claim_id = %record.claim_id,
                    subject = %record.subject,
                    error = %e,
                    "Claim not persisted; refusing to sign"
                );
                Err(e.into())
            }
            Err(_) => {
                let timeout_ms = u64::try_from(self.persist_timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::error!(
                    claim_id = %record.claim_id,
                    subject = %record.subject,
                    timeout_ms,
                    "Claim persistence timed out; refusing to sign"
                );
                Err(ClaimvaultError::LedgerTimeout {
                    operation: "insert_claim",
                    timeout_ms,
                })
            }
        }
    }
}
