//! Durable replay protection for external transaction references.
//!
//! ```text
//!   raw hash ──▶ normalize ──▶ exists? ──yes──▶ Duplicate
//!                                 │ no
//!                                 ▼
//!                        ReferenceVerifier ──invalid──▶ InvalidReference
//!                                 │ valid
//!                                 ▼
//!                     INSERT (primary key decides) ──conflict──▶ Duplicate
//!                                 │ committed
//!                                 ▼
//!                           StateMutator ──▶ applied | failed
//! ```
//!
//! The row is committed before the effect runs. A crash in between leaves
//! a `recorded` row that is never replayable; the opposite order would
//! leave an applied effect with nothing stopping a second submission.

use std::sync::Arc;

use claimvault_ledger::{ClaimLedger, TxInsert};
use claimvault_types::{
    ClaimvaultError, Clock, Effect, EffectReceipt, ExternalTxRecord, ExternalTxStatus, Result,
    Subject, TxHash,
};

use crate::{ConflictKind, ConflictMonitor, ReferenceVerifier, StateMutator};

/// Outcome of [`ReplayGuard::record_and_check`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayVerdict {
    /// First sighting; the effect was applied.
    Accepted {
        tx_hash: TxHash,
        receipt: EffectReceipt,
    },
    /// This reference was recorded before. Nothing was applied.
    Duplicate { tx_hash: TxHash },
}

impl ReplayVerdict {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    #[must_use]
    pub fn tx_hash(&self) -> &TxHash {
        match self {
            Self::Accepted { tx_hash, .. } | Self::Duplicate { tx_hash } => tx_hash,
        }
    }
}

pub struct ReplayGuard {
    ledger: Arc<dyn ClaimLedger>,
    references: Arc<dyn ReferenceVerifier>,
    mutator: Arc<dyn StateMutator>,
    monitor: Arc<ConflictMonitor>,
    clock: Arc<dyn Clock>,
}

impl ReplayGuard {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn ClaimLedger>,
        references: Arc<dyn ReferenceVerifier>,
        mutator: Arc<dyn StateMutator>,
        monitor: Arc<ConflictMonitor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            references,
            mutator,
            monitor,
            clock,
        }
    }

    /// Accept `raw_hash` for `subject` at most once, ever.
    ///
    /// `declared` is whatever the client said about the transaction. It is
    /// stored for audit only; the effect uses the metadata the external
    /// ledger reports.
    ///
    /// # Errors
    /// - `InvalidTxHash` for a malformed hash
    /// - `InvalidReference` if the external ledger does not confirm it, or
    ///   attributes it to a different subject
    /// - `EffectFailed` if the mutator failed (the reference stays recorded)
    pub async fn record_and_check(
        &self,
        raw_hash: &str,
        subject: &Subject,
        declared: serde_json::Value,
    ) -> Result<ReplayVerdict> {
        let tx_hash = TxHash::parse(raw_hash)?;

        // Cheap early exit; the insert below is what actually decides.
        if self.ledger.external_tx_exists(&tx_hash).await? {
            return Ok(self.duplicate(tx_hash, subject));
        }

        let reference = self.references.verify_reference(&tx_hash).await?;
        if !reference.valid {
            tracing::warn!(tx_hash = %tx_hash, subject = %subject, "External reference not confirmed");
            return Err(ClaimvaultError::InvalidReference {
                tx_hash,
                reason: "not confirmed by the external ledger".into(),
            });
        }
        if let Some(owner) = &reference.subject {
            if owner != subject {
                tracing::warn!(
                    tx_hash = %tx_hash,
                    subject = %subject,
                    owner = %owner,
                    "External reference belongs to another subject"
                );
                return Err(ClaimvaultError::InvalidReference {
                    tx_hash,
                    reason: format!("reference belongs to {owner}"),
                });
            }
        }

        let record = ExternalTxRecord::recorded(
            tx_hash.clone(),
            subject.clone(),
            reference.metadata.clone(),
            declared,
            self.clock.now(),
        );
        if self.ledger.insert_external_tx(&record).await? == TxInsert::Duplicate {
            return Ok(self.duplicate(tx_hash, subject));
        }

        let effect = Effect::ExternalTransaction {
            tx_hash: tx_hash.clone(),
            metadata: reference.metadata,
        };
        match self.mutator.apply_effect(subject, &effect).await {
            Ok(receipt) => {
                self.finish(&tx_hash, ExternalTxStatus::Applied, Some(receipt.reference.clone()))
                    .await;
                tracing::info!(
                    tx_hash = %tx_hash,
                    subject = %subject,
                    reference = %receipt.reference,
                    "External transaction applied"
                );
                Ok(ReplayVerdict::Accepted { tx_hash, receipt })
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(
                    tx_hash = %tx_hash,
                    subject = %subject,
                    error = %reason,
                    "Effect failed after reference recorded; awaiting reconciliation"
                );
                self.finish(&tx_hash, ExternalTxStatus::Failed, Some(reason.clone()))
                    .await;
                Err(ClaimvaultError::EffectFailed {
                    target: format!("external transaction {tx_hash}"),
                    reason,
                })
            }
        }
    }

    fn duplicate(&self, tx_hash: TxHash, subject: &Subject) -> ReplayVerdict {
        tracing::debug!(tx_hash = %tx_hash, subject = %subject, "Duplicate external reference");
        self.monitor
            .record(subject, ConflictKind::DuplicateReference, self.clock.now());
        ReplayVerdict::Duplicate { tx_hash }
    }

    async fn finish(&self, tx_hash: &TxHash, status: ExternalTxStatus, detail: Option<String>) {
        match self
            .ledger
            .finish_external_tx(tx_hash, status, detail, self.clock.now())
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::error!(
                tx_hash = %tx_hash,
                status = %status,
                "External transaction already settled; status not recorded"
            ),
            Err(e) => tracing::error!(
                tx_hash = %tx_hash,
                status = %status,
                error = %e,
                "External transaction status not recorded"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingMutator, InMemoryBalanceMutator, StaticReferenceVerifier};
    use claimvault_ledger::SqliteLedger;
    use claimvault_types::ManualClock;

    struct Fixture {
        _dir: tempfile::TempDir,
        ledger: Arc<SqliteLedger>,
        references: Arc<StaticReferenceVerifier>,
        guard: Arc<ReplayGuard>,
    }

    fn fixture(references: StaticReferenceVerifier, mutator: Arc<dyn StateMutator>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(
            SqliteLedger::open(dir.path().join("ledger.db"), std::time::Duration::from_secs(5))
                .unwrap(),
        );
        let references = Arc::new(references);
        let guard = Arc::new(ReplayGuard::new(
            ledger.clone(),
            references.clone(),
            mutator,
            Arc::new(ConflictMonitor::new(60_000, 100)),
            Arc::new(ManualClock::starting_now()),
        ));
        Fixture {
            _dir: dir,
            ledger,
            references,
            guard,
        }
    }

    fn alice() -> Subject {
        Subject::new("0xAAA").unwrap()
    }

    #[tokio::test]
    async fn reference_is_accepted_once() {
        let mutator = Arc::new(InMemoryBalanceMutator::new());
        let verifier = StaticReferenceVerifier::new().with_valid(
            "0xdead111",
            &alice(),
            serde_json::json!({"paid": "5"}),
        );
        let f = fixture(verifier, mutator.clone());

        let first = f
            .guard
            .record_and_check("0xdead111", &alice(), serde_json::json!({"paid": "500"}))
            .await
            .unwrap();
        assert!(first.is_accepted());

        // Case and whitespace do not make a new reference.
        let second = f
            .guard
            .record_and_check(" 0xDEAD111 ", &alice(), serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(
            second,
            ReplayVerdict::Duplicate {
                tx_hash: TxHash::parse("0xdead111").unwrap()
            }
        );
        assert_eq!(mutator.external_count(&alice()), 1);
        // The pre-check answered; the external ledger was asked once.
        assert_eq!(f.references.calls(), 1);

        let stored = f
            .ledger
            .get_external_tx(first.tx_hash())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExternalTxStatus::Applied);
        assert_eq!(stored.metadata, serde_json::json!({"paid": "5"}));
        assert_eq!(stored.declared_metadata, serde_json::json!({"paid": "500"}));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_submissions_apply_once() {
        const N: usize = 12;
        let mutator = Arc::new(InMemoryBalanceMutator::with_delay(
            std::time::Duration::from_millis(10),
        ));
        let verifier =
            StaticReferenceVerifier::new().with_valid("0xbeef", &alice(), serde_json::Value::Null);
        let f = fixture(verifier, mutator.clone());

        let mut handles = Vec::with_capacity(N);
        for i in 0..N {
            let guard = f.guard.clone();
            let raw = if i % 2 == 0 { "0xBEEF" } else { "beef" };
            handles.push(tokio::spawn(async move {
                guard
                    .record_and_check(raw, &alice(), serde_json::Value::Null)
                    .await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_accepted() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(mutator.external_count(&alice()), 1);
    }

    #[tokio::test]
    async fn unconfirmed_reference_is_not_recorded() {
        let mutator = Arc::new(InMemoryBalanceMutator::new());
        let f = fixture(StaticReferenceVerifier::new(), mutator.clone());

        let err = f
            .guard
            .record_and_check("0xfeed", &alice(), serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimvaultError::InvalidReference { .. }));
        assert!(
            !f.ledger
                .external_tx_exists(&TxHash::parse("0xfeed").unwrap())
                .await
                .unwrap()
        );
        assert_eq!(mutator.applied(), 0);
    }

    #[tokio::test]
    async fn reference_of_another_subject_is_rejected() {
        let mutator = Arc::new(InMemoryBalanceMutator::new());
        let verifier =
            StaticReferenceVerifier::new().with_valid("0xfeed", &alice(), serde_json::Value::Null);
        let f = fixture(verifier, mutator.clone());

        let err = f
            .guard
            .record_and_check("0xfeed", &Subject::new("0xBBB").unwrap(), serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimvaultError::InvalidReference { .. }));
        assert_eq!(mutator.applied(), 0);
    }

    #[tokio::test]
    async fn malformed_hash_is_rejected() {
        let f = fixture(
            StaticReferenceVerifier::new(),
            Arc::new(InMemoryBalanceMutator::new()),
        );
        let err = f
            .guard
            .record_and_check("0xnothex", &alice(), serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimvaultError::InvalidTxHash { .. }));
        assert_eq!(f.references.calls(), 0);
    }

    #[tokio::test]
    async fn failed_effect_keeps_reference_recorded() {
        let mutator = Arc::new(FailingMutator::new("credit service down"));
        let verifier =
            StaticReferenceVerifier::new().with_valid("0xcafe", &alice(), serde_json::Value::Null);
        let f = fixture(verifier, mutator.clone());

        let err = f
            .guard
            .record_and_check("0xcafe", &alice(), serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimvaultError::EffectFailed { .. }));

        let stored = f
            .ledger
            .get_external_tx(&TxHash::parse("0xcafe").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExternalTxStatus::Failed);
        assert!(stored.awaiting_reconciliation());

        let again = f
            .guard
            .record_and_check("0xcafe", &alice(), serde_json::Value::Null)
            .await
            .unwrap();
        assert!(!again.is_accepted());
        assert_eq!(mutator.attempts(), 1);
    }
}
