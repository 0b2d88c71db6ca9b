//! Exactly-once execution of claims and pending actions.
//!
//! Both paths use the same shape:
//!
//! ```text
//!   conditional update in the ledger ──┬─ lost ──▶ AlreadyUsed / Conflict (no effect)
//!                                      └─ won ───▶ re-validate ──▶ StateMutator
//!                                                                    │
//!                                                  applied ◀─────────┴────────▶ failed
//!                                                  (terminal)          (stays consumed,
//!                                                                       awaits reconciliation)
//! ```
//!
//! There is no retry loop and no in-process lock. A consumed claim or a
//! bound execution token is never released, whatever the mutator says.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use claimvault_issuance::ClaimVerifier;
use claimvault_ledger::{ActionTransition, ClaimLedger, ClaimTransition};
use claimvault_types::{
    ActionId, ActionStatus, ClaimId, ClaimOutcome, ClaimRecord, ClaimvaultError, Clock, Effect,
    EffectReceipt, EngineConfig, ExecutionToken, PendingAction, Result, SignedClaim, Subject,
    TokenAmount,
};

use crate::{ConflictKind, ConflictMonitor, StateMutator};

/// Successful `submit_claim`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSettlement {
    pub claim_id: ClaimId,
    pub subject: Subject,
    pub amount: TokenAmount,
    pub receipt: EffectReceipt,
}

/// Successful `execute_pending_action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecution {
    pub action_id: ActionId,
    pub execution_token: ExecutionToken,
    pub receipt: EffectReceipt,
}

pub struct ExecutionCoordinator {
    ledger: Arc<dyn ClaimLedger>,
    verifier: Arc<ClaimVerifier>,
    mutator: Arc<dyn StateMutator>,
    monitor: Arc<ConflictMonitor>,
    clock: Arc<dyn Clock>,
    /// Written to `consumed_by` on every claim this instance wins.
    instance_id: String,
    skew: Duration,
}

impl ExecutionCoordinator {
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        ledger: Arc<dyn ClaimLedger>,
        verifier: Arc<ClaimVerifier>,
        mutator: Arc<dyn StateMutator>,
        monitor: Arc<ConflictMonitor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            verifier,
            mutator,
            monitor,
            clock,
            instance_id: config.instance_id.clone(),
            skew: config.clock_skew_tolerance(),
        }
    }

    // =================================================================
    // Claims
    // =================================================================

    /// Verify, consume and apply a signed claim.
    ///
    /// Only the caller whose conditional update flips `used` gets to call
    /// the mutator. Everyone else gets `AlreadyUsed`.
    ///
    /// # Errors
    /// - `InvalidSignature` / `Expired` from verification or the ledger
    /// - `NotFound` if the claim was never issued (or has been purged)
    /// - `AlreadyUsed` if another caller consumed it first
    /// - `AmountMismatch` / `ClaimMismatch` if the signed payload disagrees
    ///   with the issued record (the claim stays consumed)
    /// - `EffectFailed` if the mutator failed (the claim stays consumed)
    pub async fn submit_claim(&self, signed: &SignedClaim) -> Result<ClaimSettlement> {
        let verified = self.verifier.verify(signed)?;
        let payload = &verified.payload;
        let claim_id = payload.claim_id;

        let transition = self
            .ledger
            .consume_claim(claim_id, &self.instance_id, self.clock.now(), self.skew)
            .await?;
        let record = match transition {
            ClaimTransition::Consumed(record) => record,
            ClaimTransition::AlreadyUsed => {
                tracing::debug!(claim_id = %claim_id, subject = %payload.subject, "Claim already used");
                self.monitor
                    .record(&payload.subject, ConflictKind::AlreadyUsed, self.clock.now());
                return Err(ClaimvaultError::AlreadyUsed(claim_id));
            }
            ClaimTransition::Expired { expires_at } => {
                return Err(ClaimvaultError::Expired {
                    claim_id,
                    expires_at,
                });
            }
            ClaimTransition::NotFound => return Err(ClaimvaultError::claim_not_found(claim_id)),
        };

        if let Err(mismatch) = record.check_matches(payload) {
            tracing::error!(
                claim_id = %claim_id,
                subject = %record.subject,
                amount = %record.amount,
                error = %mismatch,
                "Signed payload disagrees with issued record"
            );
            self.record_outcome(&record, ClaimOutcome::Rejected, Some(mismatch.to_string()))
                .await;
            return Err(mismatch);
        }

        let effect = Effect::Credit {
            claim_id,
            amount: record.amount.clone(),
            purpose: record.purpose,
        };
        match self.mutator.apply_effect(&record.subject, &effect).await {
            Ok(receipt) => {
                self.record_outcome(&record, ClaimOutcome::Applied, Some(receipt.reference.clone()))
                    .await;
                tracing::info!(
                    claim_id = %claim_id,
                    subject = %record.subject,
                    amount = %record.amount,
                    purpose = %record.purpose,
                    reference = %receipt.reference,
                    "Claim applied"
                );
                Ok(ClaimSettlement {
                    claim_id,
                    subject: record.subject,
                    amount: record.amount,
                    receipt,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(
                    claim_id = %claim_id,
                    subject = %record.subject,
                    amount = %record.amount,
                    error = %reason,
                    "Effect failed after claim consumed; awaiting reconciliation"
                );
                self.record_outcome(&record, ClaimOutcome::Failed, Some(reason.clone()))
                    .await;
                Err(ClaimvaultError::EffectFailed {
                    target: format!("claim {claim_id}"),
                    reason,
                })
            }
        }
    }

    async fn record_outcome(&self, record: &ClaimRecord, outcome: ClaimOutcome, detail: Option<String>) {
        match self
            .ledger
            .record_claim_outcome(record.claim_id, outcome, detail, self.clock.now())
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::error!(
                claim_id = %record.claim_id,
                outcome = %outcome,
                "Claim outcome already recorded by another writer"
            ),
            Err(e) => tracing::error!(
                claim_id = %record.claim_id,
                subject = %record.subject,
                outcome = %outcome,
                error = %e,
                "Claim outcome not recorded"
            ),
        }
    }

    // =================================================================
    // Pending actions
    // =================================================================

    /// Persist a new pending action for `subject`.
    ///
    /// # Errors
    /// `InvalidActionType` for a malformed type, ledger errors otherwise.
    pub async fn create_pending_action(
        &self,
        subject: &Subject,
        action_type: &str,
        payload: serde_json::Value,
    ) -> Result<ActionId> {
        let action = PendingAction::new(subject.clone(), action_type, payload, self.clock.now())?;
        self.ledger.insert_action(&action).await?;
        tracing::info!(
            action_id = %action.action_id,
            subject = %subject,
            action_type,
            "Pending action created"
        );
        Ok(action.action_id)
    }

    /// Execute a pending action exactly once.
    ///
    /// A fresh execution token is bound by one conditional update; only its
    /// holder runs the effect and moves the action to a terminal state.
    ///
    /// # Errors
    /// - `NotFound` if no such action exists for `subject`
    /// - `Conflict` if another caller already holds the token, or the
    ///   action is already terminal
    /// - `EffectFailed` if the mutator failed (the action stays `failed`)
    pub async fn execute_pending_action(
        &self,
        action_id: ActionId,
        subject: &Subject,
    ) -> Result<ActionExecution> {
        let token = ExecutionToken::new();
        let action = match self
            .ledger
            .claim_action(action_id, subject, token, self.clock.now())
            .await? {
            ActionTransition::Claimed(action) => action,
            ActionTransition::Conflict => {
                tracing::debug!(action_id = %action_id, subject = %subject, "Pending action conflict");
                self.monitor
                    .record(subject, ConflictKind::ActionConflict, self.clock.now());
                return Err(ClaimvaultError::Conflict(action_id));
            }
            ActionTransition::NotFound => {
                return Err(ClaimvaultError::action_not_found(action_id));
            }
        };

        let effect = Effect::Action {
            action_type: action.action_type.clone(),
            payload: action.payload.clone(),
        };
        match self.mutator.apply_effect(&action.subject, &effect).await {
            Ok(receipt) => {
                self.finish(&action, token, ActionStatus::Executed, Some(receipt.reference.clone()))
                    .await;
                tracing::info!(
                    action_id = %action_id,
                    subject = %action.subject,
                    action_type = %action.action_type,
                    reference = %receipt.reference,
                    "Pending action executed"
                );
                Ok(ActionExecution {
                    action_id,
                    execution_token: token,
                    receipt,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(
                    action_id = %action_id,
                    subject = %action.subject,
                    action_type = %action.action_type,
                    error = %reason,
                    "Effect failed after action claimed; awaiting reconciliation"
                );
                self.finish(&action, token, ActionStatus::Failed, Some(reason.clone()))
                    .await;
                Err(ClaimvaultError::EffectFailed {
                    target: format!("pending action {action_id}"),
                    reason,
                })
            }
        }
    }

    async fn finish(
        &self,
        action: &PendingAction,
        token: ExecutionToken,
        status: ActionStatus,
        detail: Option<String>,
    ) {
        let at: DateTime<Utc> = self.clock.now();
        match self
            .ledger
            .finish_action(action.action_id, token, status, detail, at)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::error!(
                action_id = %action.action_id,
                status = %status,
                "Action no longer executing under our token; status not recorded"
            ),
            Err(e) => tracing::error!(
                action_id = %action.action_id,
                subject = %action.subject,
                status = %status,
                error = %e,
                "Action status not recorded"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingMutator, InMemoryBalanceMutator};
    use claimvault_issuance::ClaimSigner;
    use claimvault_issuance::testing::FixedAmountCalculator;
    use claimvault_ledger::SqliteLedger;
    use claimvault_types::{ClaimPurpose, ManualClock};
    use ed25519_dalek::SigningKey;

    struct Fixture {
        _dir: tempfile::TempDir,
        ledger: Arc<SqliteLedger>,
        signer: ClaimSigner,
        coordinator: Arc<ExecutionCoordinator>,
        monitor: Arc<ConflictMonitor>,
        clock: ManualClock,
        config: EngineConfig,
    }

    fn fixture(mutator: Arc<dyn StateMutator>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            instance_id: "node-a".into(),
            ..EngineConfig::default()
        };
        let ledger = Arc::new(
            SqliteLedger::open(dir.path().join("ledger.db"), std::time::Duration::from_secs(5))
                .unwrap(),
        );
        let clock = ManualClock::starting_now();
        let signer = ClaimSigner::new(
            &config,
            ledger.clone(),
            Arc::new(FixedAmountCalculator::new(100)),
            Arc::new(SigningKey::generate(&mut rand::rngs::OsRng)),
            Arc::new(clock.clone()),
        );
        let verifier = ClaimVerifier::new(
            signer.signer_id(),
            config.domain.clone(),
            config.clock_skew_tolerance(),
            Arc::new(clock.clone()),
        )
        .unwrap();
        let monitor = Arc::new(ConflictMonitor::new(60_000, 100));
        let coordinator = Arc::new(ExecutionCoordinator::new(
            &config,
            ledger.clone(),
            Arc::new(verifier),
            mutator,
            monitor.clone(),
            Arc::new(clock.clone()),
        ));
        Fixture {
            _dir: dir,
            ledger,
            signer,
            coordinator,
            monitor,
            clock,
            config,
        }
    }

    fn alice() -> Subject {
        Subject::new("0xAAA").unwrap()
    }

    async fn issue(f: &Fixture) -> SignedClaim {
        f.signer
            .issue_claim(&alice(), ClaimPurpose::Reward, &serde_json::Value::Null)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn claim_applies_once() {
        let mutator = Arc::new(InMemoryBalanceMutator::new());
        let f = fixture(mutator.clone());
        let signed = issue(&f).await;

        let settled = f.coordinator.submit_claim(&signed).await.unwrap();
        assert_eq!(settled.amount, TokenAmount::from_u64(100));
        assert_eq!(mutator.balance(&alice()), TokenAmount::from_u64(100));

        let err = f.coordinator.submit_claim(&signed).await.unwrap_err();
        assert!(matches!(err, ClaimvaultError::AlreadyUsed(id) if id == signed.payload.claim_id));
        assert_eq!(mutator.balance(&alice()), TokenAmount::from_u64(100));
        assert_eq!(f.monitor.recent(&alice(), f.clock.now()), 1);

        let stored = f.ledger.get_claim(signed.payload.claim_id).await.unwrap().unwrap();
        assert!(stored.used);
        assert_eq!(stored.consumed_by.as_deref(), Some("node-a"));
        assert_eq!(stored.outcome, Some(ClaimOutcome::Applied));
        assert_eq!(stored.outcome_detail, Some(settled.receipt.reference));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submits_have_one_winner() {
        const N: usize = 16;
        let mutator = Arc::new(InMemoryBalanceMutator::with_delay(
            std::time::Duration::from_millis(20),
        ));
        let f = fixture(mutator.clone());
        let signed = issue(&f).await;

        let mut handles = Vec::with_capacity(N);
        for _ in 0..N {
            let coordinator = f.coordinator.clone();
            let signed = signed.clone();
            handles.push(tokio::spawn(async move {
                coordinator.submit_claim(&signed).await
            }));
        }

        let mut wins = 0;
        let mut already_used = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(ClaimvaultError::AlreadyUsed(_)) => already_used += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(already_used, N - 1);
        assert_eq!(mutator.applied(), 1);
        assert_eq!(mutator.balance(&alice()), TokenAmount::from_u64(100));
    }

    #[tokio::test]
    async fn expired_claim_is_not_consumed() {
        let mutator = Arc::new(InMemoryBalanceMutator::new());
        let f = fixture(mutator.clone());
        let signed = issue(&f).await;

        f.clock
            .advance(f.config.claim_ttl() + f.config.clock_skew_tolerance() + Duration::seconds(1));
        let err = f.coordinator.submit_claim(&signed).await.unwrap_err();
        assert!(matches!(err, ClaimvaultError::Expired { .. }));
        assert_eq!(mutator.applied(), 0);

        let stored = f.ledger.get_claim(signed.payload.claim_id).await.unwrap().unwrap();
        assert!(!stored.used);
    }

    #[tokio::test]
    async fn never_issued_claim_is_not_found() {
        let f = fixture(Arc::new(InMemoryBalanceMutator::new()));
        let orphan = ClaimRecord::dummy("0xAAA", 100);
        let signed = f.signer.sign(&orphan.payload()).unwrap();

        let err = f.coordinator.submit_claim(&signed).await.unwrap_err();
        assert!(matches!(err, ClaimvaultError::NotFound { .. }));
    }

    #[tokio::test]
    async fn tampered_claim_leaves_record_unused() {
        let mutator = Arc::new(InMemoryBalanceMutator::new());
        let f = fixture(mutator.clone());
        let mut signed = issue(&f).await;
        signed.payload.amount = TokenAmount::from_u64(1_000_000);

        let err = f.coordinator.submit_claim(&signed).await.unwrap_err();
        assert!(matches!(err, ClaimvaultError::InvalidSignature { .. }));
        let stored = f.ledger.get_claim(signed.payload.claim_id).await.unwrap().unwrap();
        assert!(!stored.used);
        assert_eq!(mutator.applied(), 0);
    }

    #[tokio::test]
    async fn payload_disagreeing_with_record_is_rejected() {
        // A validly signed payload whose amount differs from the stored row
        // is only possible if the signer and ledger drift apart.
        let mutator = Arc::new(InMemoryBalanceMutator::new());
        let f = fixture(mutator.clone());
        let record = ClaimRecord::dummy("0xAAA", 100);
        f.ledger.insert_claim(&record).await.unwrap();
        let mut payload = record.payload();
        payload.amount = TokenAmount::from_u64(1_000);
        let signed = f.signer.sign(&payload).unwrap();

        let err = f.coordinator.submit_claim(&signed).await.unwrap_err();
        assert!(matches!(err, ClaimvaultError::AmountMismatch { .. }));
        assert_eq!(mutator.applied(), 0);

        let stored = f.ledger.get_claim(record.claim_id).await.unwrap().unwrap();
        assert!(stored.used);
        assert_eq!(stored.outcome, Some(ClaimOutcome::Rejected));

        // The honest payload cannot be used afterwards either.
        let honest = f.signer.sign(&record.payload()).unwrap();
        let err = f.coordinator.submit_claim(&honest).await.unwrap_err();
        assert!(matches!(err, ClaimvaultError::AlreadyUsed(_)));
    }

    #[tokio::test]
    async fn effect_failure_keeps_claim_consumed() {
        let mutator = Arc::new(FailingMutator::new("balance service down"));
        let f = fixture(mutator.clone());
        let signed = issue(&f).await;

        let err = f.coordinator.submit_claim(&signed).await.unwrap_err();
        assert!(matches!(err, ClaimvaultError::EffectFailed { .. }));

        let stored = f.ledger.get_claim(signed.payload.claim_id).await.unwrap().unwrap();
        assert!(stored.used);
        assert_eq!(stored.outcome, Some(ClaimOutcome::Failed));
        assert!(stored.outcome_detail.as_deref().unwrap().contains("balance service down"));
        assert!(stored.awaiting_reconciliation());

        let err = f.coordinator.submit_claim(&signed).await.unwrap_err();
        assert!(matches!(err, ClaimvaultError::AlreadyUsed(_)));
        assert_eq!(mutator.attempts(), 1);
    }

    #[tokio::test]
    async fn pending_action_executes_once() {
        let mutator = Arc::new(InMemoryBalanceMutator::new());
        let f = fixture(mutator.clone());
        let action_id = f
            .coordinator
            .create_pending_action(&alice(), "upgrade.pickaxe", serde_json::json!({"level": 2}))
            .await
            .unwrap();

        let done = f
            .coordinator
            .execute_pending_action(action_id, &alice())
            .await
            .unwrap();
        assert_eq!(mutator.action_count(&alice(), "upgrade.pickaxe"), 1);

        let err = f
            .coordinator
            .execute_pending_action(action_id, &alice())
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimvaultError::Conflict(id) if id == action_id));

        let stored = f.ledger.get_action(action_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActionStatus::Executed);
        assert_eq!(stored.execution_token, Some(done.execution_token));
        assert!(stored.executed_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_executions_have_one_winner() {
        const N: usize = 10;
        let mutator = Arc::new(InMemoryBalanceMutator::with_delay(
            std::time::Duration::from_millis(20),
        ));
        let f = fixture(mutator.clone());
        let action_id = f
            .coordinator
            .create_pending_action(&alice(), "unlock.level", serde_json::Value::Null)
            .await
            .unwrap();

        let mut handles = Vec::with_capacity(N);
        for _ in 0..N {
            let coordinator = f.coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator.execute_pending_action(action_id, &alice()).await
            }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(ClaimvaultError::Conflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(conflicts, N - 1);
        assert_eq!(mutator.action_count(&alice(), "unlock.level"), 1);
    }

    #[tokio::test]
    async fn action_of_another_subject_is_not_found() {
        let mutator = Arc::new(InMemoryBalanceMutator::new());
        let f = fixture(mutator.clone());
        let action_id = f
            .coordinator
            .create_pending_action(&alice(), "unlock.level", serde_json::Value::Null)
            .await
            .unwrap();

        let mallory = Subject::new("0xBBB").unwrap();
        let err = f
            .coordinator
            .execute_pending_action(action_id, &mallory)
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimvaultError::NotFound { .. }));
        assert_eq!(mutator.applied(), 0);

        let err = f
            .coordinator
            .execute_pending_action(ActionId::new(), &alice())
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimvaultError::NotFound { .. }));
    }

    #[tokio::test]
    async fn failed_action_is_terminal() {
        let mutator = Arc::new(FailingMutator::new("inventory offline"));
        let f = fixture(mutator.clone());
        let action_id = f
            .coordinator
            .create_pending_action(&alice(), "upgrade.pickaxe", serde_json::Value::Null)
            .await
            .unwrap();

        let err = f
            .coordinator
            .execute_pending_action(action_id, &alice())
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimvaultError::EffectFailed { .. }));

        let stored = f.ledger.get_action(action_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActionStatus::Failed);
        assert!(stored.execution_token.is_some());

        let err = f
            .coordinator
            .execute_pending_action(action_id, &alice())
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimvaultError::Conflict(_)));
        assert_eq!(mutator.attempts(), 1);
    }

    #[tokio::test]
    async fn malformed_action_type_is_rejected() {
        let f = fixture(Arc::new(InMemoryBalanceMutator::new()));
        let err = f
            .coordinator
            .create_pending_action(&alice(), "drop table", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimvaultError::InvalidActionType { .. }));
    }
}
