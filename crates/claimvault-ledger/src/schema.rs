//! SQLite schema for the ClaimVault ledger.
//!
//! Timestamps are stored as Unix milliseconds. Amounts are stored as their
//! canonical decimal text. Triggers keep the use-once columns monotonic even
//! against hand-written SQL.

pub(crate) const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS claims (
        claim_id             TEXT PRIMARY KEY NOT NULL,
        subject              TEXT NOT NULL,
        amount               TEXT NOT NULL,
        purpose              TEXT NOT NULL,
        expires_at_ms        INTEGER NOT NULL,
        used                 INTEGER NOT NULL DEFAULT 0 CHECK (used IN (0, 1)),
        used_at_ms           INTEGER,
        created_at_ms        INTEGER NOT NULL,
        consumed_by          TEXT,
        outcome              TEXT CHECK (outcome IN ('applied', 'failed', 'rejected')),
        outcome_detail       TEXT,
        settled_at_ms        INTEGER,
        resolution           TEXT CHECK (resolution IN ('refunded', 'reissued', 'written_off')),
        resolved_by          TEXT,
        resolved_at_ms       INTEGER,
        resolution_note      TEXT,
        replacement_claim_id TEXT,
        supersedes           TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_claims_subject
    ON claims(subject);

    CREATE INDEX IF NOT EXISTS idx_claims_unused_expiry
    ON claims(expires_at_ms) WHERE used = 0;

    CREATE INDEX IF NOT EXISTS idx_claims_unresolved
    ON claims(settled_at_ms) WHERE outcome IN ('failed', 'rejected') AND resolution IS NULL;

    CREATE INDEX IF NOT EXISTS idx_claims_in_flight
    ON claims(used_at_ms) WHERE used = 1 AND outcome IS NULL;

    CREATE TRIGGER IF NOT EXISTS claims_terms_immutable
    BEFORE UPDATE OF subject, amount, purpose, expires_at_ms, created_at_ms ON claims
    BEGIN
        SELECT RAISE(ABORT, 'claim terms are immutable');
    END;

    CREATE TRIGGER IF NOT EXISTS claims_used_monotonic
    BEFORE UPDATE OF used ON claims
    WHEN OLD.used = 1
    BEGIN
        SELECT RAISE(ABORT, 'a used claim cannot be reopened');
    END;

    CREATE TABLE IF NOT EXISTS pending_actions (
        action_id        TEXT PRIMARY KEY NOT NULL,
        subject          TEXT NOT NULL,
        action_type      TEXT NOT NULL,
        payload          TEXT NOT NULL,
        status           TEXT NOT NULL DEFAULT 'pending'
                         CHECK (status IN ('pending', 'executing', 'executed', 'failed')),
        execution_token  TEXT,
        created_at_ms    INTEGER NOT NULL,
        claimed_at_ms    INTEGER,
        executed_at_ms   INTEGER,
        outcome_detail   TEXT,
        resolution       TEXT CHECK (resolution IN ('refunded', 'reissued', 'written_off')),
        resolved_by      TEXT,
        resolved_at_ms   INTEGER,
        resolution_note  TEXT
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_pending_actions_token
    ON pending_actions(execution_token) WHERE execution_token IS NOT NULL;

    CREATE INDEX IF NOT EXISTS idx_pending_actions_subject
    ON pending_actions(subject);

    CREATE INDEX IF NOT EXISTS idx_pending_actions_unresolved
    ON pending_actions(executed_at_ms) WHERE status = 'failed' AND resolution IS NULL;

    CREATE INDEX IF NOT EXISTS idx_pending_actions_in_flight
    ON pending_actions(claimed_at_ms) WHERE status = 'executing';

    CREATE TRIGGER IF NOT EXISTS pending_actions_terminal
    BEFORE UPDATE OF status ON pending_actions
    WHEN OLD.status IN ('executed', 'failed')
    BEGIN
        SELECT RAISE(ABORT, 'pending action is already terminal');
    END;

    CREATE TRIGGER IF NOT EXISTS pending_actions_token_once
    BEFORE UPDATE OF execution_token ON pending_actions
    WHEN OLD.execution_token IS NOT NULL
         AND (NEW.execution_token IS NULL OR NEW.execution_token <> OLD.execution_token)
    BEGIN
        SELECT RAISE(ABORT, 'execution token cannot be replaced');
    END;

    CREATE TABLE IF NOT EXISTS external_transactions (
        tx_hash            TEXT PRIMARY KEY NOT NULL,
        subject            TEXT NOT NULL,
        metadata           TEXT NOT NULL,
        declared_metadata  TEXT NOT NULL,
        status             TEXT NOT NULL DEFAULT 'recorded'
                           CHECK (status IN ('recorded', 'applied', 'failed')),
        recorded_at_ms     INTEGER NOT NULL,
        settled_at_ms      INTEGER,
        outcome_detail     TEXT,
        resolution         TEXT CHECK (resolution IN ('refunded', 'reissued', 'written_off')),
        resolved_by        TEXT,
        resolved_at_ms     INTEGER,
        resolution_note    TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_external_transactions_subject
    ON external_transactions(subject);

    CREATE INDEX IF NOT EXISTS idx_external_transactions_unresolved
    ON external_transactions(settled_at_ms) WHERE status = 'failed' AND resolution IS NULL;

    CREATE INDEX IF NOT EXISTS idx_external_transactions_in_flight
    ON external_transactions(recorded_at_ms) WHERE status = 'recorded';
";

pub(crate) const CLAIM_COLUMNS: &str = "claim_id, subject, amount, purpose, expires_at_ms, used, \
     used_at_ms, created_at_ms, consumed_by, outcome, outcome_detail, settled_at_ms, resolution, \
     resolved_by, resolved_at_ms, resolution_note, replacement_claim_id, supersedes";

pub(crate) const ACTION_COLUMNS: &str = "action_id, subject, action_type, payload, status, \
     execution_token, created_at_ms, claimed_at_ms, executed_at_ms, outcome_detail, resolution, \
     resolved_by, resolved_at_ms, resolution_note";

pub(crate) const EXTERNAL_TX_COLUMNS: &str = "tx_hash, subject, metadata, declared_metadata, \
     status, recorded_at_ms, settled_at_ms, outcome_detail, resolution, resolved_by, \
     resolved_at_ms, resolution_note";
