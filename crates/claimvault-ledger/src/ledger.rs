use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use claimvault_types::{
    ActionId, ActionStatus, ClaimId, ClaimOutcome, ClaimRecord, ExecutionToken, ExternalTxRecord,
    ExternalTxStatus, PendingAction, ResolutionRecord, Subject, TxHash,
};

use crate::LedgerError;

/// Result of the conditional mark-used on a claim.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimTransition {
    /// This caller won; the record as it stands after the update.
    Consumed(ClaimRecord),
    AlreadyUsed,
    /// Unused but past `expires_at` plus the skew tolerance.
    Expired { expires_at: DateTime<Utc> },
    NotFound,
}

/// Result of the conditional execution-token assignment on an action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionTransition {
    /// This caller won and now holds the execution token.
    Claimed(PendingAction),
    /// Another caller already holds the token, or the action is terminal.
    Conflict,
    /// No action with this id belongs to the subject.
    NotFound,
}

/// Result of insert-if-absent on an external transaction reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxInsert {
    /// Committed. The effect may now run.
    Recorded,
    Duplicate,
}

/// A record an operator can resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReconcileTarget {
    Claim(ClaimId),
    Action(ActionId),
    ExternalTx(TxHash),
}

impl fmt::Display for ReconcileTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claim(id) => write!(f, "claim {id}"),
            Self::Action(id) => write!(f, "pending action {id}"),
            Self::ExternalTx(hash) => write!(f, "external transaction {hash}"),
        }
    }
}

/// A consumed record with no resolution whose effect either failed or was
/// interrupted before an outcome was written.
#[derive(Debug, Clone, PartialEq)]
pub enum FailedRecord {
    Claim(ClaimRecord),
    Action(PendingAction),
    ExternalTx(ExternalTxRecord),
}

impl FailedRecord {
    #[must_use]
    pub fn target(&self) -> ReconcileTarget {
        match self {
            Self::Claim(c) => ReconcileTarget::Claim(c.claim_id),
            Self::Action(a) => ReconcileTarget::Action(a.action_id),
            Self::ExternalTx(t) => ReconcileTarget::ExternalTx(t.tx_hash.clone()),
        }
    }

    #[must_use]
    pub fn subject(&self) -> &Subject {
        match self {
            Self::Claim(c) => &c.subject,
            Self::Action(a) => &a.subject,
            Self::ExternalTx(t) => &t.subject,
        }
    }

    /// When the failure was recorded, or for an interrupted record, when it
    /// was consumed.
    #[must_use]
    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Claim(c) => c.settled_at.or(c.used_at),
            Self::Action(a) => a.executed_at.or(a.claimed_at),
            Self::ExternalTx(t) => t.settled_at.or(Some(t.recorded_at)),
        }
    }

    /// Consumed, but the process stopped before writing an outcome.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Claim(c) => c.is_in_flight(),
            Self::Action(a) => a.status == ActionStatus::Executing,
            Self::ExternalTx(t) => t.status == ExternalTxStatus::Recorded,
        }
    }
}

/// Result of the conditional resolve on a failed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved,
    AlreadyResolved,
    /// The record exists but has neither failed nor been in flight past the
    /// staleness cutoff.
    NotReconcilable,
    NotFound,
}

/// Durable store for every use-once resource the engine guards.
///
/// ## Atomicity
///
/// Each state transition is one conditional statement whose affected-row
/// count decides the winner:
///
/// - `consume_claim`: `UPDATE claims SET used = 1 ... WHERE used = 0`
/// - `claim_action`: `UPDATE pending_actions SET status = 'executing',
///   execution_token = ? WHERE status = 'pending' AND execution_token IS NULL`
/// - `insert_external_tx`: primary-key `INSERT`, committed before returning
///
/// Losing callers get a transition variant, not an error. Implementations
/// must not keep authoritative state in process memory; every instance
/// sharing the store sees the same answers.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so one store can be shared
/// across tasks behind an `Arc`.
#[async_trait]
pub trait ClaimLedger: Send + Sync + 'static {
    // ── Claims ───────────────────────────────────────────────────────────────

    /// Persist a freshly issued claim.
    ///
    /// Returns `Err(LedgerError::Duplicate)` if the id is already present.
    async fn insert_claim(&self, record: &ClaimRecord) -> Result<(), LedgerError>;

    async fn get_claim(&self, claim_id: ClaimId) -> Result<Option<ClaimRecord>, LedgerError>;

    /// Mark a claim used if it is unused and `now <= expires_at + skew`.
    async fn consume_claim(
        &self,
        claim_id: ClaimId,
        consumed_by: &str,
        now: DateTime<Utc>,
        skew: Duration,
    ) -> Result<ClaimTransition, LedgerError>;

    /// Record the outcome of a consumed claim.
    ///
    /// Returns `false` if an outcome was already recorded.
    async fn record_claim_outcome(
        &self,
        claim_id: ClaimId,
        outcome: ClaimOutcome,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, LedgerError>;

    /// Delete unused claims that expired before `cutoff`. Returns the count.
    async fn purge_expired_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, LedgerError>;

    // ── Pending actions ──────────────────────────────────────────────────────

    async fn insert_action(&self, action: &PendingAction) -> Result<(), LedgerError>;

    async fn get_action(&self, action_id: ActionId) -> Result<Option<PendingAction>, LedgerError>;

    /// Move `pending -> executing` and bind `token`, for `subject` only.
    /// `now` is stored as the claim time.
    async fn claim_action(
        &self,
        action_id: ActionId,
        subject: &Subject,
        token: ExecutionToken,
        now: DateTime<Utc>,
    ) -> Result<ActionTransition, LedgerError>;

    /// Move `executing -> executed | failed`, only for the token holder.
    ///
    /// Returns `false` if the action is not executing under `token`.
    async fn finish_action(
        &self,
        action_id: ActionId,
        token: ExecutionToken,
        status: ActionStatus,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, LedgerError>;

    // ── External transactions ────────────────────────────────────────────────

    async fn external_tx_exists(&self, tx_hash: &TxHash) -> Result<bool, LedgerError>;

    /// Insert the reference and commit. A primary-key violation is the final
    /// arbiter between racing callers.
    async fn insert_external_tx(&self, record: &ExternalTxRecord) -> Result<TxInsert, LedgerError>;

    async fn get_external_tx(
        &self,
        tx_hash: &TxHash,
    ) -> Result<Option<ExternalTxRecord>, LedgerError>;

    /// Move `recorded -> applied | failed`.
    async fn finish_external_tx(
        &self,
        tx_hash: &TxHash,
        status: ExternalTxStatus,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, LedgerError>;

    // ── Reconciliation ───────────────────────────────────────────────────────

    /// Records without a resolution, oldest first: failed ones, plus those
    /// consumed before `stale_before` that still have no outcome.
    async fn list_unresolved_failures(
        &self,
        limit: usize,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<FailedRecord>, LedgerError>;

    /// Attach a resolution to a failed record, once.
    ///
    /// A record consumed before `stale_before` with no outcome is first
    /// marked failed in the same transaction, so a late outcome write from
    /// the interrupted caller can no longer land.
    ///
    /// When `replacement` is given it is inserted in the same transaction,
    /// so a reissued claim exists if and only if the resolution does.
    async fn resolve(
        &self,
        target: &ReconcileTarget,
        resolution: &ResolutionRecord,
        replacement: Option<&ClaimRecord>,
        stale_before: DateTime<Utc>,
    ) -> Result<ResolveOutcome, LedgerError>;
}
