//! State survives reopening the ledger, and reconciliation is resolve-once.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use claimvault_ledger::{
    ActionTransition, ClaimLedger, ClaimTransition, FailedRecord, LedgerError, ReconcileTarget,
    ResolveOutcome, SqliteLedger, TxInsert,
};
use claimvault_types::{
    ActionStatus, ClaimOutcome, ClaimRecord, ExecutionToken, ExternalTxRecord, ExternalTxStatus,
    PendingAction, Resolution, ResolutionRecord, Subject, TxHash,
};

fn open(path: &std::path::Path) -> SqliteLedger {
    SqliteLedger::open(path, StdDuration::from_secs(5)).unwrap()
}

fn resolution(kind: Resolution) -> ResolutionRecord {
    ResolutionRecord {
        resolution: kind,
        resolved_by: "ops@example".into(),
        resolved_at: Utc::now(),
        note: Some("ticket 42".into()),
        replacement_claim_id: None,
    }
}

/// Records consumed earlier than this and still without an outcome count
/// as interrupted.
fn stale_cutoff() -> DateTime<Utc> {
    Utc::now() - Duration::minutes(5)
}

fn tx_at(raw: &str, at: DateTime<Utc>) -> ExternalTxRecord {
    ExternalTxRecord::recorded(
        TxHash::parse(raw).unwrap(),
        Subject::new("0xAAA").unwrap(),
        serde_json::json!({"amount": "5"}),
        serde_json::Value::Null,
        at,
    )
}

fn tx(raw: &str) -> ExternalTxRecord {
    tx_at(raw, Utc::now())
}

#[tokio::test]
async fn used_claim_stays_used_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let rec = ClaimRecord::dummy("0xAAA", 100);

    {
        let ledger = open(&path);
        ledger.insert_claim(&rec).await.unwrap();
        let t = ledger
            .consume_claim(rec.claim_id, "node-a", Utc::now(), Duration::zero())
            .await
            .unwrap();
        assert!(matches!(t, ClaimTransition::Consumed(_)));
    }

    let reopened = open(&path);
    let t = reopened
        .consume_claim(rec.claim_id, "node-b", Utc::now(), Duration::zero())
        .await
        .unwrap();
    assert_eq!(t, ClaimTransition::AlreadyUsed);
}

#[tokio::test]
async fn external_tx_duplicate_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");

    {
        let ledger = open(&path);
        assert_eq!(
            ledger.insert_external_tx(&tx("0xdead111")).await.unwrap(),
            TxInsert::Recorded
        );
    }

    let reopened = open(&path);
    let hash = TxHash::parse("0xDEAD111").unwrap();
    assert!(reopened.external_tx_exists(&hash).await.unwrap());
    assert_eq!(
        reopened.insert_external_tx(&tx("DEAD111")).await.unwrap(),
        TxInsert::Duplicate
    );
}

#[tokio::test]
async fn action_lifecycle_and_token_ownership() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open(&dir.path().join("ledger.db"));
    let subject = Subject::new("0xAAA").unwrap();
    let action = PendingAction::new(subject.clone(), "unlock", serde_json::json!({}), Utc::now())
        .unwrap();
    ledger.insert_action(&action).await.unwrap();

    // Another subject cannot even see it.
    let stranger = Subject::new("0xBBB").unwrap();
    let t = ledger
        .claim_action(action.action_id, &stranger, ExecutionToken::new(), Utc::now())
        .await
        .unwrap();
    assert_eq!(t, ActionTransition::NotFound);

    let token = ExecutionToken::new();
    let t = ledger
        .claim_action(action.action_id, &subject, token, Utc::now())
        .await
        .unwrap();
    assert!(matches!(t, ActionTransition::Claimed(_)));

    // Only the token holder may finish it.
    let wrong = ledger
        .finish_action(
            action.action_id,
            ExecutionToken::new(),
            ActionStatus::Executed,
            None,
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(!wrong);
    let done = ledger
        .finish_action(action.action_id, token, ActionStatus::Executed, None, Utc::now())
        .await
        .unwrap();
    assert!(done);

    // Terminal: cannot be finished again, cannot be re-claimed.
    let again = ledger
        .finish_action(action.action_id, token, ActionStatus::Failed, None, Utc::now())
        .await
        .unwrap();
    assert!(!again);
    let t = ledger
        .claim_action(action.action_id, &subject, ExecutionToken::new(), Utc::now())
        .await
        .unwrap();
    assert_eq!(t, ActionTransition::Conflict);

    let stored = ledger.get_action(action.action_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ActionStatus::Executed);
    assert_eq!(stored.execution_token, Some(token));
    assert!(stored.executed_at.is_some());
}

#[tokio::test]
async fn failures_are_listed_and_resolved_once() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open(&dir.path().join("ledger.db"));

    let claim = ClaimRecord::dummy("0xAAA", 100);
    ledger.insert_claim(&claim).await.unwrap();
    ledger
        .consume_claim(claim.claim_id, "node-a", Utc::now(), Duration::zero())
        .await
        .unwrap();
    ledger
        .record_claim_outcome(
            claim.claim_id,
            ClaimOutcome::Failed,
            Some("mutator down".into()),
            Utc::now(),
        )
        .await
        .unwrap();

    let record = tx("0xbeef");
    ledger.insert_external_tx(&record).await.unwrap();
    ledger
        .finish_external_tx(
            &record.tx_hash,
            ExternalTxStatus::Failed,
            Some("mutator down".into()),
            Utc::now(),
        )
        .await
        .unwrap();

    let failures = ledger.list_unresolved_failures(10, stale_cutoff()).await.unwrap();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().any(|f| matches!(f, FailedRecord::Claim(c) if c.claim_id == claim.claim_id)));
    assert!(failures.iter().any(|f| matches!(f, FailedRecord::ExternalTx(_))));

    let target = ReconcileTarget::Claim(claim.claim_id);
    let first = ledger
        .resolve(&target, &resolution(Resolution::Refunded), None, stale_cutoff())
        .await
        .unwrap();
    assert_eq!(first, ResolveOutcome::Resolved);
    let second = ledger
        .resolve(&target, &resolution(Resolution::WrittenOff), None, stale_cutoff())
        .await
        .unwrap();
    assert_eq!(second, ResolveOutcome::AlreadyResolved);

    let stored = ledger.get_claim(claim.claim_id).await.unwrap().unwrap();
    let res = stored.resolution.unwrap();
    assert_eq!(res.resolution, Resolution::Refunded);
    assert_eq!(res.resolved_by, "ops@example");
    // Resolution never reopens the claim.
    assert!(stored.used);

    let remaining = ledger.list_unresolved_failures(10, stale_cutoff()).await.unwrap();
    assert_eq!(remaining.len(), 1);
}

#[tokio::test]
async fn resolve_rejects_healthy_and_missing_targets() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open(&dir.path().join("ledger.db"));
    let write_off = resolution(Resolution::WrittenOff);

    // Unused: no outcome column value at all.
    let unused = ClaimRecord::dummy("0xAAA", 100);
    ledger.insert_claim(&unused).await.unwrap();
    let outcome = ledger
        .resolve(&ReconcileTarget::Claim(unused.claim_id), &write_off, None, stale_cutoff())
        .await
        .unwrap();
    assert_eq!(outcome, ResolveOutcome::NotReconcilable);

    // Consumed a moment ago and still settling.
    let settling = ClaimRecord::dummy("0xAAA", 100);
    ledger.insert_claim(&settling).await.unwrap();
    ledger
        .consume_claim(settling.claim_id, "node-a", Utc::now(), Duration::zero())
        .await
        .unwrap();
    let outcome = ledger
        .resolve(&ReconcileTarget::Claim(settling.claim_id), &write_off, None, stale_cutoff())
        .await
        .unwrap();
    assert_eq!(outcome, ResolveOutcome::NotReconcilable);
    let stored = ledger.get_claim(settling.claim_id).await.unwrap().unwrap();
    assert!(stored.outcome.is_none());
    assert!(stored.resolution.is_none());

    let subject = Subject::new("0xAAA").unwrap();
    let pending = PendingAction::new(subject, "unlock", serde_json::json!({}), Utc::now()).unwrap();
    ledger.insert_action(&pending).await.unwrap();
    let outcome = ledger
        .resolve(&ReconcileTarget::Action(pending.action_id), &write_off, None, stale_cutoff())
        .await
        .unwrap();
    assert_eq!(outcome, ResolveOutcome::NotReconcilable);

    let outcome = ledger
        .resolve(
            &ReconcileTarget::ExternalTx(TxHash::parse("0x01").unwrap()),
            &write_off,
            None,
            stale_cutoff(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, ResolveOutcome::NotFound);
}

#[tokio::test]
async fn records_interrupted_mid_flight_surface_for_reconciliation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let subject = Subject::new("0xAAA").unwrap();
    let ten_minutes_ago = Utc::now() - Duration::minutes(10);

    let claim = ClaimRecord::dummy("0xAAA", 100);
    let action =
        PendingAction::new(subject.clone(), "unlock", serde_json::json!({}), ten_minutes_ago)
            .unwrap();
    let token = ExecutionToken::new();
    let reference = tx_at("0xfeed", ten_minutes_ago);

    // Each record is consumed, then the process dies before its outcome is written.
    {
        let ledger = open(&path);
        ledger.insert_claim(&claim).await.unwrap();
        ledger
            .consume_claim(claim.claim_id, "node-a", ten_minutes_ago, Duration::zero())
            .await
            .unwrap();
        ledger.insert_action(&action).await.unwrap();
        let t = ledger
            .claim_action(action.action_id, &subject, token, ten_minutes_ago)
            .await
            .unwrap();
        assert!(matches!(t, ActionTransition::Claimed(_)));
        ledger.insert_external_tx(&reference).await.unwrap();
    }

    let ledger = open(&path);

    // Not yet past a cutoff older than the crash.
    let early = ten_minutes_ago - Duration::minutes(1);
    assert!(ledger.list_unresolved_failures(10, early).await.unwrap().is_empty());

    let failures = ledger.list_unresolved_failures(10, stale_cutoff()).await.unwrap();
    assert_eq!(failures.len(), 3);
    assert!(failures.iter().all(FailedRecord::is_interrupted));
    assert!(failures.iter().all(|f| f.failed_at().is_some()));

    let write_off = resolution(Resolution::WrittenOff);
    for failure in &failures {
        let outcome = ledger
            .resolve(&failure.target(), &write_off, None, stale_cutoff())
            .await
            .unwrap();
        assert_eq!(outcome, ResolveOutcome::Resolved, "{}", failure.target());
    }
    assert!(ledger.list_unresolved_failures(10, stale_cutoff()).await.unwrap().is_empty());

    let stored = ledger.get_claim(claim.claim_id).await.unwrap().unwrap();
    assert_eq!(stored.outcome, Some(ClaimOutcome::Failed));
    assert!(stored.outcome_detail.is_some());
    assert_eq!(stored.resolution.unwrap().resolution, Resolution::WrittenOff);
    let stored = ledger.get_action(action.action_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ActionStatus::Failed);
    assert_eq!(stored.claimed_at.map(|t| t.timestamp_millis()), Some(ten_minutes_ago.timestamp_millis()));
    let stored = ledger.get_external_tx(&reference.tx_hash).await.unwrap().unwrap();
    assert_eq!(stored.status, ExternalTxStatus::Failed);

    // A late outcome write from the interrupted caller no longer lands.
    assert!(
        !ledger
            .record_claim_outcome(claim.claim_id, ClaimOutcome::Applied, None, Utc::now())
            .await
            .unwrap()
    );
    assert!(
        !ledger
            .finish_action(action.action_id, token, ActionStatus::Executed, None, Utc::now())
            .await
            .unwrap()
    );
    assert!(
        !ledger
            .finish_external_tx(&reference.tx_hash, ExternalTxStatus::Applied, None, Utc::now())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn reissue_inserts_replacement_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open(&dir.path().join("ledger.db"));
    let claim = ClaimRecord::dummy("0xAAA", 100);
    ledger.insert_claim(&claim).await.unwrap();
    ledger
        .consume_claim(claim.claim_id, "node-a", Utc::now(), Duration::zero())
        .await
        .unwrap();
    ledger
        .record_claim_outcome(claim.claim_id, ClaimOutcome::Failed, None, Utc::now())
        .await
        .unwrap();

    let mut replacement = ClaimRecord::dummy("0xAAA", 100);
    replacement.supersedes = Some(claim.claim_id);
    let mut res = resolution(Resolution::Reissued);
    res.replacement_claim_id = Some(replacement.claim_id);

    // A replacement that does not match the resolution is refused outright.
    let err = ledger
        .resolve(
            &ReconcileTarget::Claim(claim.claim_id),
            &resolution(Resolution::Refunded),
            Some(&replacement),
            stale_cutoff(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition(_)));
    assert!(ledger.get_claim(replacement.claim_id).await.unwrap().is_none());

    let outcome = ledger
        .resolve(
            &ReconcileTarget::Claim(claim.claim_id),
            &res,
            Some(&replacement),
            stale_cutoff(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, ResolveOutcome::Resolved);

    let stored = ledger.get_claim(replacement.claim_id).await.unwrap().unwrap();
    assert_eq!(stored.supersedes, Some(claim.claim_id));
    assert!(!stored.used);
    let original = ledger.get_claim(claim.claim_id).await.unwrap().unwrap();
    assert_eq!(
        original.resolution.unwrap().replacement_claim_id,
        Some(replacement.claim_id)
    );
}
