//! SQLite-backed [`ClaimLedger`].
//!
//! Every operation opens its own connection on a blocking worker. Nothing
//! about claim, action or reference state is cached in the process, so any
//! number of engine instances can share one database file and still agree
//! on who won each race.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Params, Row, TransactionBehavior, params};

use claimvault_types::{
    ActionId, ActionStatus, ClaimId, ClaimOutcome, ClaimRecord, ExecutionToken, ExternalTxRecord,
    ExternalTxStatus, PendingAction, Resolution, ResolutionRecord, Subject, TxHash,
};

use crate::schema::{ACTION_COLUMNS, CLAIM_COLUMNS, EXTERNAL_TX_COLUMNS, SCHEMA};
use crate::{
    ActionTransition, ClaimLedger, ClaimTransition, FailedRecord, LedgerError, ReconcileTarget,
    ResolveOutcome, TxInsert,
};

/// Durable ledger stored in a single SQLite file (WAL mode).
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    path: Arc<PathBuf>,
    busy_timeout: StdDuration,
}

impl SqliteLedger {
    /// Open or create the ledger at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>, busy_timeout: StdDuration) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = connect(&path, busy_timeout)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!(
            path = %path.display(),
            journal_mode = %journal_mode,
            "Claim ledger opened"
        );
        Ok(Self {
            path: Arc::new(path),
            busy_timeout,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against a fresh connection on the blocking pool.
    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, LedgerError> + Send + 'static,
    {
        let path = Arc::clone(&self.path);
        let busy_timeout = self.busy_timeout;
        tokio::task::spawn_blocking(move || {
            let mut conn = connect(&path, busy_timeout)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| LedgerError::Task {
            operation,
            reason: e.to_string(),
        })?
    }
}

fn connect(path: &Path, busy_timeout: StdDuration) -> Result<Connection, LedgerError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    Ok(conn)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn query_one<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    decode: fn(&Row<'_>) -> Result<T, LedgerError>,
) -> Result<Option<T>, LedgerError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let value = rows.next()?.map(decode).transpose()?;
    Ok(value)
}

fn query_all<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    decode: fn(&Row<'_>) -> Result<T, LedgerError>,
) -> Result<Vec<T>, LedgerError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(decode(row)?);
    }
    Ok(out)
}

// ── Row decoding ────────────────────────────────────────────────────────────

/// Decoding context naming the row, for `Corrupt` errors.
struct Decode<'a> {
    kind: &'static str,
    id: &'a str,
}

impl Decode<'_> {
    fn err(&self, reason: impl fmt::Display) -> LedgerError {
        LedgerError::Corrupt {
            kind: self.kind,
            id: self.id.to_string(),
            reason: reason.to_string(),
        }
    }

    fn parse<T>(&self, raw: &str) -> Result<T, LedgerError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        raw.parse().map_err(|e| self.err(e))
    }

    fn parse_opt<T>(&self, raw: Option<String>) -> Result<Option<T>, LedgerError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        raw.map(|s| self.parse(&s)).transpose()
    }

    fn subject(&self, raw: String) -> Result<Subject, LedgerError> {
        Subject::new(raw).map_err(|e| self.err(e))
    }

    fn time(&self, ms: i64) -> Result<DateTime<Utc>, LedgerError> {
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| self.err(format!("timestamp {ms}ms out of range")))
    }

    fn time_opt(&self, ms: Option<i64>) -> Result<Option<DateTime<Utc>>, LedgerError> {
        ms.map(|ms| self.time(ms)).transpose()
    }

    fn json(&self, raw: &str) -> Result<serde_json::Value, LedgerError> {
        serde_json::from_str(raw).map_err(|e| self.err(e))
    }

    fn resolution(
        &self,
        row: &Row<'_>,
        has_replacement: bool,
    ) -> Result<Option<ResolutionRecord>, LedgerError> {
        let Some(raw) = row.get::<_, Option<String>>("resolution")? else {
            return Ok(None);
        };
        let resolved_by: Option<String> = row.get("resolved_by")?;
        let resolved_at: Option<i64> = row.get("resolved_at_ms")?;
        let replacement_claim_id = if has_replacement {
            self.parse_opt(row.get("replacement_claim_id")?)?
        } else {
            None
        };
        Ok(Some(ResolutionRecord {
            resolution: self.parse(&raw)?,
            resolved_by: resolved_by.ok_or_else(|| self.err("resolution without resolved_by"))?,
            resolved_at: self.time(
                resolved_at.ok_or_else(|| self.err("resolution without resolved_at"))?,
            )?,
            note: row.get("resolution_note")?,
            replacement_claim_id,
        }))
    }
}

fn claim_from_row(row: &Row<'_>) -> Result<ClaimRecord, LedgerError> {
    let id: String = row.get("claim_id")?;
    let d = Decode {
        kind: "claim",
        id: &id,
    };
    Ok(ClaimRecord {
        claim_id: d.parse(&id)?,
        subject: d.subject(row.get("subject")?)?,
        amount: d.parse(&row.get::<_, String>("amount")?)?,
        purpose: d.parse(&row.get::<_, String>("purpose")?)?,
        expires_at: d.time(row.get("expires_at_ms")?)?,
        used: row.get("used")?,
        used_at: d.time_opt(row.get("used_at_ms")?)?,
        created_at: d.time(row.get("created_at_ms")?)?,
        consumed_by: row.get("consumed_by")?,
        outcome: d.parse_opt(row.get("outcome")?)?,
        outcome_detail: row.get("outcome_detail")?,
        settled_at: d.time_opt(row.get("settled_at_ms")?)?,
        resolution: d.resolution(row, true)?,
        supersedes: d.parse_opt(row.get("supersedes")?)?,
    })
}

fn action_from_row(row: &Row<'_>) -> Result<PendingAction, LedgerError> {
    let id: String = row.get("action_id")?;
    let d = Decode {
        kind: "pending action",
        id: &id,
    };
    Ok(PendingAction {
        action_id: d.parse(&id)?,
        subject: d.subject(row.get("subject")?)?,
        action_type: row.get("action_type")?,
        payload: d.json(&row.get::<_, String>("payload")?)?,
        status: d.parse(&row.get::<_, String>("status")?)?,
        execution_token: d.parse_opt(row.get("execution_token")?)?,
        created_at: d.time(row.get("created_at_ms")?)?,
        claimed_at: d.time_opt(row.get("claimed_at_ms")?)?,
        executed_at: d.time_opt(row.get("executed_at_ms")?)?,
        outcome_detail: row.get("outcome_detail")?,
        resolution: d.resolution(row, false)?,
    })
}

fn external_tx_from_row(row: &Row<'_>) -> Result<ExternalTxRecord, LedgerError> {
    let id: String = row.get("tx_hash")?;
    let d = Decode {
        kind: "external transaction",
        id: &id,
    };
    Ok(ExternalTxRecord {
        tx_hash: TxHash::parse(&id).map_err(|e| d.err(e))?,
        subject: d.subject(row.get("subject")?)?,
        metadata: d.json(&row.get::<_, String>("metadata")?)?,
        declared_metadata: d.json(&row.get::<_, String>("declared_metadata")?)?,
        status: d.parse(&row.get::<_, String>("status")?)?,
        recorded_at: d.time(row.get("recorded_at_ms")?)?,
        settled_at: d.time_opt(row.get("settled_at_ms")?)?,
        outcome_detail: row.get("outcome_detail")?,
        resolution: d.resolution(row, false)?,
    })
}

fn insert_claim_row(conn: &Connection, r: &ClaimRecord) -> Result<(), LedgerError> {
    let result = conn.execute(
        "INSERT INTO claims (claim_id, subject, amount, purpose, expires_at_ms, used,
                             used_at_ms, created_at_ms, consumed_by, supersedes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            r.claim_id.to_string(),
            r.subject.as_str(),
            r.amount.to_string(),
            r.purpose.as_str(),
            to_ms(r.expires_at),
            r.used,
            r.used_at.map(to_ms),
            to_ms(r.created_at),
            r.consumed_by,
            r.supersedes.map(|id| id.to_string()),
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(LedgerError::Duplicate {
            kind: "claim",
            id: r.claim_id.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Outcome detail written when an operator closes out an interrupted record.
const INTERRUPTED_DETAIL: &str = "interrupted before an outcome was recorded";

/// Table layout of each reconcilable record kind.
struct TargetTable {
    table: &'static str,
    key_column: &'static str,
    /// Terminal failure. Never NULL for an existing row.
    failed_predicate: &'static str,
    /// Marks a stale in-flight row failed.
    /// `?1` key, `?2` time, `?3` detail, `?4` staleness cutoff.
    interrupt: &'static str,
    key: String,
}

impl TargetTable {
    fn of(target: &ReconcileTarget) -> Self {
        match target {
            ReconcileTarget::Claim(id) => Self {
                table: "claims",
                key_column: "claim_id",
                failed_predicate: "COALESCE(outcome IN ('failed', 'rejected'), 0)",
                interrupt: "UPDATE claims SET outcome = 'failed', settled_at_ms = ?2,
                                              outcome_detail = ?3
                            WHERE claim_id = ?1 AND used = 1 AND outcome IS NULL
                              AND used_at_ms < ?4",
                key: id.to_string(),
            },
            ReconcileTarget::Action(id) => Self {
                table: "pending_actions",
                key_column: "action_id",
                failed_predicate: "status = 'failed'",
                interrupt: "UPDATE pending_actions SET status = 'failed', executed_at_ms = ?2,
                                                       outcome_detail = ?3
                            WHERE action_id = ?1 AND status = 'executing'
                              AND claimed_at_ms < ?4",
                key: id.to_string(),
            },
            ReconcileTarget::ExternalTx(hash) => Self {
                table: "external_transactions",
                key_column: "tx_hash",
                failed_predicate: "status = 'failed'",
                interrupt: "UPDATE external_transactions SET status = 'failed', settled_at_ms = ?2,
                                                             outcome_detail = ?3
                            WHERE tx_hash = ?1 AND status = 'recorded' AND recorded_at_ms < ?4",
                key: hash.as_str().to_string(),
            },
        }
    }
}

#[async_trait]
impl ClaimLedger for SqliteLedger {
    // ── Claims ───────────────────────────────────────────────────────────────

    async fn insert_claim(&self, record: &ClaimRecord) -> Result<(), LedgerError> {
        let record = record.clone();
        self.run("insert_claim", move |conn| insert_claim_row(conn, &record))
            .await
    }

    async fn get_claim(&self, claim_id: ClaimId) -> Result<Option<ClaimRecord>, LedgerError> {
        self.run("get_claim", move |conn| {
            query_one(
                conn,
                &format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE claim_id = ?1"),
                params![claim_id.to_string()],
                claim_from_row,
            )
        })
        .await
    }

    async fn consume_claim(
        &self,
        claim_id: ClaimId,
        consumed_by: &str,
        now: DateTime<Utc>,
        skew: Duration,
    ) -> Result<ClaimTransition, LedgerError> {
        let consumed_by = consumed_by.to_string();
        self.run("consume_claim", move |conn| {
            let id = claim_id.to_string();
            let consumed = query_one(
                conn,
                &format!(
                    "UPDATE claims SET used = 1, used_at_ms = ?2, consumed_by = ?3
                     WHERE claim_id = ?1 AND used = 0 AND expires_at_ms + ?4 >= ?2
                     RETURNING {CLAIM_COLUMNS}"
                ),
                params![id, to_ms(now), consumed_by, skew.num_milliseconds()],
                claim_from_row,
            )?;
            if let Some(record) = consumed {
                return Ok(ClaimTransition::Consumed(record));
            }

            // Lost: find out why. State only moves forward, so this read
            // cannot turn a loss into a win.
            let state: Option<(bool, i64)> = conn
                .query_row(
                    "SELECT used, expires_at_ms FROM claims WHERE claim_id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(match state {
                None => ClaimTransition::NotFound,
                Some((true, _)) => ClaimTransition::AlreadyUsed,
                Some((false, expires_at_ms)) => {
                    let d = Decode {
                        kind: "claim",
                        id: &id,
                    };
                    ClaimTransition::Expired {
                        expires_at: d.time(expires_at_ms)?,
                    }
                }
            })
        })
        .await
    }

    async fn record_claim_outcome(
        &self,
        claim_id: ClaimId,
        outcome: ClaimOutcome,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        self.run("record_claim_outcome", move |conn| {
            let changed = conn.execute(
                "UPDATE claims SET outcome = ?2, outcome_detail = ?3, settled_at_ms = ?4
                 WHERE claim_id = ?1 AND used = 1 AND outcome IS NULL",
                params![claim_id.to_string(), outcome.as_str(), detail, to_ms(at)],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn purge_expired_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, LedgerError> {
        self.run("purge_expired_claims", move |conn| {
            let deleted = conn.execute(
                "DELETE FROM claims WHERE used = 0 AND expires_at_ms < ?1",
                params![to_ms(cutoff)],
            )?;
            Ok(deleted as u64)
        })
        .await
    }

    // ── Pending actions ──────────────────────────────────────────────────────

    async fn insert_action(&self, action: &PendingAction) -> Result<(), LedgerError> {
        let action = action.clone();
        self.run("insert_action", move |conn| {
            let payload = serde_json::to_string(&action.payload)?;
            let result = conn.execute(
                "INSERT INTO pending_actions (action_id, subject, action_type, payload, status,
                                              execution_token, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    action.action_id.to_string(),
                    action.subject.as_str(),
                    action.action_type,
                    payload,
                    action.status.as_str(),
                    action.execution_token.map(|t| t.to_string()),
                    to_ms(action.created_at),
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(LedgerError::Duplicate {
                    kind: "pending action",
                    id: action.action_id.to_string(),
                }),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get_action(&self, action_id: ActionId) -> Result<Option<PendingAction>, LedgerError> {
        self.run("get_action", move |conn| {
            query_one(
                conn,
                &format!("SELECT {ACTION_COLUMNS} FROM pending_actions WHERE action_id = ?1"),
                params![action_id.to_string()],
                action_from_row,
            )
        })
        .await
    }

    async fn claim_action(
        &self,
        action_id: ActionId,
        subject: &Subject,
        token: ExecutionToken,
        now: DateTime<Utc>,
    ) -> Result<ActionTransition, LedgerError> {
        let subject = subject.clone();
        self.run("claim_action", move |conn| {
            let id = action_id.to_string();
            let claimed = query_one(
                conn,
                &format!(
                    "UPDATE pending_actions
                     SET status = 'executing', execution_token = ?3, claimed_at_ms = ?4
                     WHERE action_id = ?1 AND subject = ?2
                       AND status = 'pending' AND execution_token IS NULL
                     RETURNING {ACTION_COLUMNS}"
                ),
                params![id, subject.as_str(), token.to_string(), to_ms(now)],
                action_from_row,
            )?;
            if let Some(action) = claimed {
                return Ok(ActionTransition::Claimed(action));
            }

            let owner: Option<String> = conn
                .query_row(
                    "SELECT subject FROM pending_actions WHERE action_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(match owner {
                // An action owned by someone else is reported as absent.
                Some(owner) if owner == subject.as_str() => ActionTransition::Conflict,
                _ => ActionTransition::NotFound,
            })
        })
        .await
    }

    async fn finish_action(
        &self,
        action_id: ActionId,
        token: ExecutionToken,
        status: ActionStatus,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        if !ActionStatus::Executing.can_transition_to(status) {
            return Err(LedgerError::InvalidTransition(format!(
                "pending action {action_id} cannot finish as {status}"
            )));
        }
        self.run("finish_action", move |conn| {
            let changed = conn.execute(
                "UPDATE pending_actions SET status = ?3, executed_at_ms = ?4, outcome_detail = ?5
                 WHERE action_id = ?1 AND execution_token = ?2 AND status = 'executing'",
                params![
                    action_id.to_string(),
                    token.to_string(),
                    status.as_str(),
                    to_ms(at),
                    detail
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    // ── External transactions ────────────────────────────────────────────────

    async fn external_tx_exists(&self, tx_hash: &TxHash) -> Result<bool, LedgerError> {
        let tx_hash = tx_hash.clone();
        self.run("external_tx_exists", move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM external_transactions WHERE tx_hash = ?1)",
                params![tx_hash.as_str()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    async fn insert_external_tx(&self, record: &ExternalTxRecord) -> Result<TxInsert, LedgerError> {
        let record = record.clone();
        self.run("insert_external_tx", move |conn| {
            let metadata = serde_json::to_string(&record.metadata)?;
            let declared = serde_json::to_string(&record.declared_metadata)?;
            let result = conn.execute(
                "INSERT INTO external_transactions (tx_hash, subject, metadata, declared_metadata,
                                                    status, recorded_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.tx_hash.as_str(),
                    record.subject.as_str(),
                    metadata,
                    declared,
                    record.status.as_str(),
                    to_ms(record.recorded_at),
                ],
            );
            match result {
                Ok(_) => Ok(TxInsert::Recorded),
                Err(e) if is_unique_violation(&e) => Ok(TxInsert::Duplicate),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get_external_tx(
        &self,
        tx_hash: &TxHash,
    ) -> Result<Option<ExternalTxRecord>, LedgerError> {
        let tx_hash = tx_hash.clone();
        self.run("get_external_tx", move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {EXTERNAL_TX_COLUMNS} FROM external_transactions WHERE tx_hash = ?1"
                ),
                params![tx_hash.as_str()],
                external_tx_from_row,
            )
        })
        .await
    }

    async fn finish_external_tx(
        &self,
        tx_hash: &TxHash,
        status: ExternalTxStatus,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        if status == ExternalTxStatus::Recorded {
            return Err(LedgerError::InvalidTransition(format!(
                "external transaction {tx_hash} cannot finish as {status}"
            )));
        }
        let tx_hash = tx_hash.clone();
        self.run("finish_external_tx", move |conn| {
            let changed = conn.execute(
                "UPDATE external_transactions
                 SET status = ?2, settled_at_ms = ?3, outcome_detail = ?4
                 WHERE tx_hash = ?1 AND status = 'recorded'",
                params![tx_hash.as_str(), status.as_str(), to_ms(at), detail],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    // ── Reconciliation ───────────────────────────────────────────────────────

    async fn list_unresolved_failures(
        &self,
        limit: usize,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<FailedRecord>, LedgerError> {
        self.run("list_unresolved_failures", move |conn| {
            let limit_sql = limit_param(limit);
            let cutoff = to_ms(stale_before);
            let mut failures: Vec<FailedRecord> = Vec::new();
            failures.extend(
                query_all(
                    conn,
                    &format!(
                        "SELECT {CLAIM_COLUMNS} FROM claims
                         WHERE resolution IS NULL
                           AND (outcome IN ('failed', 'rejected')
                                OR (used = 1 AND outcome IS NULL AND used_at_ms < ?2))
                         ORDER BY COALESCE(settled_at_ms, used_at_ms) LIMIT ?1"
                    ),
                    params![limit_sql, cutoff],
                    claim_from_row,
                )?
                .into_iter()
                .map(FailedRecord::Claim),
            );
            failures.extend(
                query_all(
                    conn,
                    &format!(
                        "SELECT {ACTION_COLUMNS} FROM pending_actions
                         WHERE resolution IS NULL
                           AND (status = 'failed'
                                OR (status = 'executing' AND claimed_at_ms < ?2))
                         ORDER BY COALESCE(executed_at_ms, claimed_at_ms) LIMIT ?1"
                    ),
                    params![limit_sql, cutoff],
                    action_from_row,
                )?
                .into_iter()
                .map(FailedRecord::Action),
            );
            failures.extend(
                query_all(
                    conn,
                    &format!(
                        "SELECT {EXTERNAL_TX_COLUMNS} FROM external_transactions
                         WHERE resolution IS NULL
                           AND (status = 'failed'
                                OR (status = 'recorded' AND recorded_at_ms < ?2))
                         ORDER BY COALESCE(settled_at_ms, recorded_at_ms) LIMIT ?1"
                    ),
                    params![limit_sql, cutoff],
                    external_tx_from_row,
                )?
                .into_iter()
                .map(FailedRecord::ExternalTx),
            );
            failures.sort_by_key(FailedRecord::failed_at);
            failures.truncate(limit);
            Ok(failures)
        })
        .await
    }

    async fn resolve(
        &self,
        target: &ReconcileTarget,
        resolution: &ResolutionRecord,
        replacement: Option<&ClaimRecord>,
        stale_before: DateTime<Utc>,
    ) -> Result<ResolveOutcome, LedgerError> {
        if let Some(r) = replacement {
            let is_claim = matches!(target, ReconcileTarget::Claim(_));
            if !is_claim
                || resolution.resolution != Resolution::Reissued
                || resolution.replacement_claim_id != Some(r.claim_id)
            {
                return Err(LedgerError::InvalidTransition(format!(
                    "replacement claim {} does not match {} resolution of {target}",
                    r.claim_id, resolution.resolution
                )));
            }
        }

        let target = target.clone();
        let resolution = resolution.clone();
        let replacement = replacement.cloned();
        self.run("resolve", move |conn| {
            let t = TargetTable::of(&target);
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let interrupted = tx.execute(
                t.interrupt,
                params![
                    t.key,
                    to_ms(resolution.resolved_at),
                    INTERRUPTED_DETAIL,
                    to_ms(stale_before)
                ],
            )?;
            if interrupted == 1 {
                tracing::warn!(
                    target_record = %target,
                    "Interrupted record marked failed for reconciliation"
                );
            }

            let changed = if let ReconcileTarget::Claim(_) = target {
                tx.execute(
                    &format!(
                        "UPDATE claims SET resolution = ?2, resolved_by = ?3, resolved_at_ms = ?4,
                                           resolution_note = ?5, replacement_claim_id = ?6
                         WHERE claim_id = ?1 AND {} AND resolution IS NULL",
                        t.failed_predicate
                    ),
                    params![
                        t.key,
                        resolution.resolution.as_str(),
                        resolution.resolved_by,
                        to_ms(resolution.resolved_at),
                        resolution.note,
                        resolution.replacement_claim_id.map(|id| id.to_string()),
                    ],
                )?
            } else {
                tx.execute(
                    &format!(
                        "UPDATE {} SET resolution = ?2, resolved_by = ?3, resolved_at_ms = ?4,
                                       resolution_note = ?5
                         WHERE {} = ?1 AND {} AND resolution IS NULL",
                        t.table, t.key_column, t.failed_predicate
                    ),
                    params![
                        t.key,
                        resolution.resolution.as_str(),
                        resolution.resolved_by,
                        to_ms(resolution.resolved_at),
                        resolution.note,
                    ],
                )?
            };

            // An interrupt that is not followed by a resolution rolls back
            // with the transaction.
            if changed == 1 {
                if let Some(r) = &replacement {
                    insert_claim_row(&tx, r)?;
                }
                tx.commit()?;
                return Ok(ResolveOutcome::Resolved);
            }

            let state: Option<(bool, bool)> = tx
                .query_row(
                    &format!(
                        "SELECT {}, resolution IS NOT NULL FROM {} WHERE {} = ?1",
                        t.failed_predicate, t.table, t.key_column
                    ),
                    params![t.key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(match state {
                None => ResolveOutcome::NotFound,
                Some((_, true)) => ResolveOutcome::AlreadyResolved,
                Some((false, false)) => ResolveOutcome::NotReconcilable,
                Some((true, false)) => {
                    return Err(LedgerError::InvalidTransition(format!(
                        "{target} is failed and unresolved but the resolve update missed it"
                    )));
                }
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimvault_types::ClaimPurpose;

    fn open(dir: &tempfile::TempDir) -> SqliteLedger {
        SqliteLedger::open(dir.path().join("ledger.db"), StdDuration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn insert_and_get_claim_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir);
        let rec = ClaimRecord::dummy("0xAAA", 100);
        ledger.insert_claim(&rec).await.unwrap();
        let back = ledger.get_claim(rec.claim_id).await.unwrap().unwrap();
        assert_eq!(back, rec);
        assert_eq!(back.purpose, ClaimPurpose::Reward);
    }

    #[tokio::test]
    async fn duplicate_claim_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir);
        let rec = ClaimRecord::dummy("0xAAA", 100);
        ledger.insert_claim(&rec).await.unwrap();
        let err = ledger.insert_claim(&rec).await.unwrap_err();
        assert!(matches!(err, LedgerError::Duplicate { kind: "claim", .. }));
    }

    #[tokio::test]
    async fn consume_then_already_used() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir);
        let rec = ClaimRecord::dummy("0xAAA", 100);
        ledger.insert_claim(&rec).await.unwrap();

        let now = Utc::now();
        let first = ledger
            .consume_claim(rec.claim_id, "node-a", now, Duration::zero())
            .await
            .unwrap();
        let ClaimTransition::Consumed(consumed) = first else {
            panic!("expected Consumed, got {first:?}");
        };
        assert!(consumed.used);
        assert_eq!(consumed.consumed_by.as_deref(), Some("node-a"));
        assert_eq!(consumed.used_at.map(to_ms), Some(to_ms(now)));

        let second = ledger
            .consume_claim(rec.claim_id, "node-b", now, Duration::zero())
            .await
            .unwrap();
        assert_eq!(second, ClaimTransition::AlreadyUsed);
    }

    #[tokio::test]
    async fn consume_expired_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir);
        let rec = ClaimRecord::dummy("0xAAA", 100);
        ledger.insert_claim(&rec).await.unwrap();

        let late = rec.expires_at + Duration::seconds(31);
        let t = ledger
            .consume_claim(rec.claim_id, "node-a", late, Duration::seconds(30))
            .await
            .unwrap();
        assert!(matches!(t, ClaimTransition::Expired { .. }));

        // Inside the skew window it still goes through.
        let within = rec.expires_at + Duration::seconds(29);
        let t = ledger
            .consume_claim(rec.claim_id, "node-a", within, Duration::seconds(30))
            .await
            .unwrap();
        assert!(matches!(t, ClaimTransition::Consumed(_)));

        let t = ledger
            .consume_claim(ClaimId::new(), "node-a", Utc::now(), Duration::zero())
            .await
            .unwrap();
        assert_eq!(t, ClaimTransition::NotFound);
    }

    #[tokio::test]
    async fn outcome_is_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir);
        let rec = ClaimRecord::dummy("0xAAA", 100);
        ledger.insert_claim(&rec).await.unwrap();

        // Not consumed yet: nothing to record against.
        assert!(
            !ledger
                .record_claim_outcome(rec.claim_id, ClaimOutcome::Applied, None, Utc::now())
                .await
                .unwrap()
        );

        ledger
            .consume_claim(rec.claim_id, "node-a", Utc::now(), Duration::zero())
            .await
            .unwrap();
        assert!(
            ledger
                .record_claim_outcome(
                    rec.claim_id,
                    ClaimOutcome::Failed,
                    Some("mutator down".into()),
                    Utc::now()
                )
                .await
                .unwrap()
        );
        assert!(
            !ledger
                .record_claim_outcome(rec.claim_id, ClaimOutcome::Applied, None, Utc::now())
                .await
                .unwrap()
        );
        let back = ledger.get_claim(rec.claim_id).await.unwrap().unwrap();
        assert_eq!(back.outcome, Some(ClaimOutcome::Failed));
        assert_eq!(back.outcome_detail.as_deref(), Some("mutator down"));
    }

    #[tokio::test]
    async fn used_claim_cannot_be_reopened_by_hand() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir);
        let rec = ClaimRecord::dummy("0xAAA", 100);
        ledger.insert_claim(&rec).await.unwrap();
        ledger
            .consume_claim(rec.claim_id, "node-a", Utc::now(), Duration::zero())
            .await
            .unwrap();

        let conn = connect(ledger.path(), StdDuration::from_secs(1)).unwrap();
        let reopen = conn.execute(
            "UPDATE claims SET used = 0 WHERE claim_id = ?1",
            params![rec.claim_id.to_string()],
        );
        assert!(reopen.is_err());
        let bump = conn.execute(
            "UPDATE claims SET amount = '1000000' WHERE claim_id = ?1",
            params![rec.claim_id.to_string()],
        );
        assert!(bump.is_err());
    }

    #[tokio::test]
    async fn purge_only_touches_unused_expired_claims() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir);
        let now = Utc::now();
        let two_hours_ago = now - Duration::hours(2);
        let issue_old = |amount| {
            ClaimRecord::issue(
                Subject::new("0xAAA").unwrap(),
                claimvault_types::TokenAmount::from_u64(amount),
                ClaimPurpose::Reward,
                two_hours_ago,
                Duration::hours(1),
            )
        };
        let stale = issue_old(1);
        let consumed = issue_old(2);
        let fresh = ClaimRecord::dummy("0xAAA", 3);
        for r in [&stale, &consumed, &fresh] {
            ledger.insert_claim(r).await.unwrap();
        }
        ledger
            .consume_claim(consumed.claim_id, "node-a", two_hours_ago, Duration::zero())
            .await
            .unwrap();

        let purged = ledger.purge_expired_claims(now).await.unwrap();
        assert_eq!(purged, 1);
        assert!(ledger.get_claim(stale.claim_id).await.unwrap().is_none());
        assert!(ledger.get_claim(consumed.claim_id).await.unwrap().is_some());
        assert!(ledger.get_claim(fresh.claim_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn finish_action_rejects_illegal_status() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir);
        let err = ledger
            .finish_action(
                ActionId::new(),
                ExecutionToken::new(),
                ActionStatus::Pending,
                None,
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition(_)));
    }
}
