//! # claimvault-engine
//!
//! Server-authoritative signed claims with exactly-once execution and
//! durable replay protection.
//!
//! ```text
//!                       ┌──────────────────────── ClaimEngine ────────────────────────┐
//!   issue_claim ───────▶│ ClaimSigner ──▶ ledger.insert_claim ──▶ sign                │
//!   submit_claim ──────▶│ ClaimVerifier ──▶ ExecutionCoordinator ──▶ StateMutator     │
//!   *_pending_action ──▶│ ExecutionCoordinator (execution token CAS) ──▶ StateMutator │
//!   record_external_tx ▶│ ReplayGuard (primary-key insert) ──▶ StateMutator           │
//!   reconciler() ──────▶│ Reconciler (resolve / reissue failed effects)               │
//!                       └──────────────────────────────┬──────────────────────────────┘
//!                                                      ▼
//!                                            ClaimLedger (SQLite)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let engine = ClaimEngine::open(EngineConfig::from_json_file("claimvault.json")?, collaborators)?;
//! let signed = engine.issue_claim(&subject, ClaimPurpose::Reward, &context).await?;
//! let settled = engine.submit_claim(&signed).await?;
//! ```

pub mod engine;
pub mod reconciler;
pub mod telemetry;

pub use engine::{ClaimEngine, Collaborators};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use telemetry::init_tracing;

pub use claimvault_ledger::{FailedRecord, ReconcileTarget};
