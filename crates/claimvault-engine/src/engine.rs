//! The [`ClaimEngine`] facade.

use std::sync::Arc;

use claimvault_issuance::{AmountCalculator, ClaimSigner, ClaimSigningKey, ClaimVerifier, VerifiedClaim};
use claimvault_ledger::{ClaimLedger, SqliteLedger};
use claimvault_settlement::{
    ActionExecution, ClaimSettlement, ConflictMonitor, ExecutionCoordinator, ReferenceVerifier,
    ReplayGuard, ReplayVerdict, StateMutator,
};
use claimvault_types::{
    ActionId, ClaimPurpose, ClaimvaultError, Clock, EffectReceipt, EngineConfig, Result,
    SignedClaim, SignerId, Subject,
};

use crate::Reconciler;

/// Everything the engine calls out to.
pub struct Collaborators {
    /// Authoritative source of claim amounts.
    pub calculator: Arc<dyn AmountCalculator>,
    /// External state store that effects are applied to.
    pub mutator: Arc<dyn StateMutator>,
    /// Confirms external transaction references.
    pub references: Arc<dyn ReferenceVerifier>,
    /// The one authorized signing key.
    pub key: Arc<dyn ClaimSigningKey>,
    pub clock: Arc<dyn Clock>,
}

/// One instance of the claim service.
///
/// Any number of engines may share one ledger file; use-once decisions are
/// made by the ledger, not by the engine.
pub struct ClaimEngine {
    config: EngineConfig,
    ledger: Arc<dyn ClaimLedger>,
    signer: Arc<ClaimSigner>,
    verifier: Arc<ClaimVerifier>,
    coordinator: ExecutionCoordinator,
    replay_guard: ReplayGuard,
    reconciler: Reconciler,
    monitor: Arc<ConflictMonitor>,
    clock: Arc<dyn Clock>,
}

impl ClaimEngine {
    /// Open (or create) the SQLite ledger at `config.ledger_path` and wire
    /// the engine around it.
    pub fn open(config: EngineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let busy_timeout = std::time::Duration::from_millis(config.ledger_busy_timeout_ms);
        let ledger = SqliteLedger::open(&config.ledger_path, busy_timeout)?;
        Self::with_ledger(config, Arc::new(ledger), collaborators)
    }

    /// Wire the engine around an existing ledger.
    pub fn with_ledger(
        config: EngineConfig,
        ledger: Arc<dyn ClaimLedger>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let Collaborators {
            calculator,
            mutator,
            references,
            key,
            clock,
        } = collaborators;

        let signer = Arc::new(ClaimSigner::new(
            &config,
            ledger.clone(),
            calculator,
            key,
            clock.clone(),
        ));
        let verifier = Arc::new(ClaimVerifier::new(
            signer.signer_id(),
            config.domain.clone(),
            config.clock_skew_tolerance(),
            clock.clone(),
        )?);
        let monitor = Arc::new(ConflictMonitor::from_config(&config));
        let coordinator = ExecutionCoordinator::new(
            &config,
            ledger.clone(),
            verifier.clone(),
            mutator.clone(),
            monitor.clone(),
            clock.clone(),
        );
        let replay_guard = ReplayGuard::new(
            ledger.clone(),
            references,
            mutator,
            monitor.clone(),
            clock.clone(),
        );
        let reconciler = Reconciler::new(&config, ledger.clone(), signer.clone(), clock.clone());

        tracing::info!(
            instance_id = %config.instance_id,
            signer = %signer.signer_id(),
            app = %config.domain.app_name,
            network = %config.domain.network_id,
            "Claim engine ready"
        );

        Ok(Self {
            config,
            ledger,
            signer,
            verifier,
            coordinator,
            replay_guard,
            reconciler,
            monitor,
            clock,
        })
    }

    /// Compute, persist and sign a new claim.
    pub async fn issue_claim(
        &self,
        subject: &Subject,
        purpose: ClaimPurpose,
        context: &serde_json::Value,
    ) -> Result<SignedClaim> {
        self.signer.issue_claim(subject, purpose, context).await
    }

    /// Check signer and expiry without touching the ledger.
    pub fn verify_claim(&self, signed: &SignedClaim) -> Result<VerifiedClaim> {
        self.verifier.verify(signed)
    }

    /// Consume a signed claim and apply its credit exactly once.
    pub async fn submit_claim(&self, signed: &SignedClaim) -> Result<ClaimSettlement> {
        self.coordinator.submit_claim(signed).await
    }

    pub async fn create_pending_action(
        &self,
        subject: &Subject,
        action_type: &str,
        payload: serde_json::Value,
    ) -> Result<ActionId> {
        self.coordinator
            .create_pending_action(subject, action_type, payload)
            .await
    }

    pub async fn execute_pending_action(
        &self,
        action_id: ActionId,
        subject: &Subject,
    ) -> Result<ActionExecution> {
        self.coordinator
            .execute_pending_action(action_id, subject)
            .await
    }

    /// Accept an external transaction reference once.
    ///
    /// # Errors
    /// A repeated reference is `DuplicateReference`. Use
    /// [`Self::check_external_transaction`] to get it as a verdict instead.
    pub async fn record_external_transaction(
        &self,
        tx_hash: &str,
        subject: &Subject,
        metadata: serde_json::Value,
    ) -> Result<EffectReceipt> {
        match self.check_external_transaction(tx_hash, subject, metadata).await? {
            ReplayVerdict::Accepted { receipt, .. } => Ok(receipt),
            ReplayVerdict::Duplicate { tx_hash } => Err(ClaimvaultError::DuplicateReference(tx_hash)),
        }
    }

    pub async fn check_external_transaction(
        &self,
        tx_hash: &str,
        subject: &Subject,
        metadata: serde_json::Value,
    ) -> Result<ReplayVerdict> {
        self.replay_guard
            .record_and_check(tx_hash, subject, metadata)
            .await
    }

    /// Delete unused claims that expired more than `gc_grace` ago.
    ///
    /// Consumed claims are history and are kept.
    pub async fn purge_expired_claims(&self) -> Result<u64> {
        let now = self.clock.now();
        let cutoff = now - self.config.gc_grace();
        let purged = self.ledger.purge_expired_claims(cutoff).await?;
        let tracked = self.monitor.sweep(now);
        tracing::info!(purged, cutoff = %cutoff, tracked_subjects = tracked, "Expired claims purged");
        Ok(purged)
    }

    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    #[must_use]
    pub fn conflict_monitor(&self) -> &ConflictMonitor {
        &self.monitor
    }

    #[must_use]
    pub fn signer_id(&self) -> SignerId {
        self.signer.signer_id()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
