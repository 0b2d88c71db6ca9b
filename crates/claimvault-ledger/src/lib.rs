//! # claimvault-ledger
//!
//! Durable storage for ClaimVault's use-once resources: issued claims,
//! pending actions and external transaction references.
//!
//! ## Architecture
//!
//! ```text
//!   ExecutionCoordinator ──┐
//!   ReplayGuard ───────────┼──▶ ClaimLedger (trait) ──▶ SqliteLedger ──▶ claims
//!   ClaimSigner ───────────┤                                          ├─▶ pending_actions
//!   Reconciler ────────────┘                                          └─▶ external_transactions
//! ```
//!
//! Every transition is decided by one conditional statement in the store.
//! The process never holds the answer to "has this been used?".

pub mod error;
pub mod ledger;
pub mod schema;
pub mod sqlite;

pub use error::LedgerError;
pub use ledger::{
    ActionTransition, ClaimLedger, ClaimTransition, FailedRecord, ReconcileTarget, ResolveOutcome,
    TxInsert,
};
pub use sqlite::SqliteLedger;
