//! Operator workflow for effects that failed after consumption.
//!
//! A failed record is never reopened. The operator looks at what failed,
//! settles it out of band, and records how:
//!
//! | resolution   | effect                                                   |
//! |--------------|----------------------------------------------------------|
//! | `Refunded`   | none; compensation happened elsewhere                    |
//! | `WrittenOff` | none                                                     |
//! | `Reissued`   | claims only: a fresh claim with the same terms is signed |
//!
//! Resolution is conditional on no earlier resolution, so two operators
//! racing on the same failure get one `Resolved` and one `AlreadyResolved`.
//!
//! A record consumed longer than `reconcile_stale_after` ago with no outcome
//! was interrupted between consumption and its outcome write. It is listed
//! alongside real failures, and resolving it marks it failed first.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use claimvault_issuance::ClaimSigner;
use claimvault_ledger::{ClaimLedger, FailedRecord, ReconcileTarget, ResolveOutcome};
use claimvault_types::{
    ClaimId, ClaimRecord, ClaimvaultError, Clock, EngineConfig, Resolution, ResolutionRecord,
    Result, SignedClaim,
};

/// What an operator gets back from [`Reconciler::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Resolved,
    /// The replacement claim, ready to hand to the subject.
    Reissued(SignedClaim),
}

pub struct Reconciler {
    ledger: Arc<dyn ClaimLedger>,
    signer: Arc<ClaimSigner>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        ledger: Arc<dyn ClaimLedger>,
        signer: Arc<ClaimSigner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            signer,
            clock,
            stale_after: config.reconcile_stale_after(),
        }
    }

    fn stale_before(&self) -> DateTime<Utc> {
        self.clock.now() - self.stale_after
    }

    /// Unresolved failures across claims, actions and external references,
    /// including interrupted ones, oldest first.
    pub async fn list_failures(&self, limit: usize) -> Result<Vec<FailedRecord>> {
        Ok(self
            .ledger
            .list_unresolved_failures(limit, self.stale_before())
            .await?)
    }

    /// Record `resolution` against a failed record.
    ///
    /// # Errors
    /// - `InvalidPayload` for an empty operator name, or `Reissued` on
    ///   anything but a claim
    /// - `NotFound`, `NotReconcilable` (neither failed nor interrupted),
    ///   `AlreadyResolved`
    pub async fn resolve(
        &self,
        target: &ReconcileTarget,
        resolution: Resolution,
        operator: &str,
        note: Option<String>,
    ) -> Result<ReconcileOutcome> {
        let operator = operator.trim();
        if operator.is_empty() {
            return Err(ClaimvaultError::InvalidPayload {
                reason: "operator name is required".into(),
            });
        }

        let stale_before = self.stale_before();
        let mut record = ResolutionRecord {
            resolution,
            resolved_by: operator.to_string(),
            resolved_at: self.clock.now(),
            note,
            replacement_claim_id: None,
        };

        let replacement = match (resolution, target) {
            (Resolution::Reissued, ReconcileTarget::Claim(claim_id)) => {
                let original = self.reissuable(*claim_id, stale_before).await?;
                let replacement = self.signer.prepare_replacement(&original);
                record.replacement_claim_id = Some(replacement.claim_id);
                Some(replacement)
            }
            (Resolution::Reissued, _) => {
                return Err(ClaimvaultError::InvalidPayload {
                    reason: format!("only claims can be reissued, not {target}"),
                });
            }
            _ => None,
        };

        match self
            .ledger
            .resolve(target, &record, replacement.as_ref(), stale_before)
            .await?
        {
            ResolveOutcome::Resolved => {}
            ResolveOutcome::AlreadyResolved => {
                return Err(ClaimvaultError::AlreadyResolved {
                    target: target.to_string(),
                });
            }
            ResolveOutcome::NotReconcilable => {
                return Err(ClaimvaultError::NotReconcilable {
                    target: target.to_string(),
                });
            }
            ResolveOutcome::NotFound => return Err(not_found(target)),
        }

        tracing::info!(
            target_record = %target,
            resolution = %resolution,
            operator,
            replacement = ?record.replacement_claim_id,
            "Failure resolved"
        );

        match replacement {
            // The replacement row is committed with the resolution, so
            // signing it now cannot hand out an unrecorded claim.
            Some(replacement) => Ok(ReconcileOutcome::Reissued(
                self.signer.sign(&replacement.payload())?,
            )),
            None => Ok(ReconcileOutcome::Resolved),
        }
    }

    async fn reissuable(
        &self,
        claim_id: ClaimId,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimRecord> {
        let original = self
            .ledger
            .get_claim(claim_id)
            .await?
            .ok_or_else(|| ClaimvaultError::claim_not_found(claim_id))?;
        if original.resolution.is_some() {
            return Err(ClaimvaultError::AlreadyResolved {
                target: ReconcileTarget::Claim(claim_id).to_string(),
            });
        }
        let interrupted = original.is_in_flight()
            && original.used_at.is_some_and(|used_at| used_at < stale_before);
        if !(original.awaiting_reconciliation() || interrupted) {
            return Err(ClaimvaultError::NotReconcilable {
                target: ReconcileTarget::Claim(claim_id).to_string(),
            });
        }
        Ok(original)
    }
}

fn not_found(target: &ReconcileTarget) -> ClaimvaultError {
    match target {
        ReconcileTarget::Claim(id) => ClaimvaultError::claim_not_found(*id),
        ReconcileTarget::Action(id) => ClaimvaultError::action_not_found(*id),
        ReconcileTarget::ExternalTx(hash) => ClaimvaultError::tx_not_found(hash),
    }
}
