//! # claimvault-settlement
//!
//! **Execution plane**: turns verified authorizations into exactly one
//! state change each.
//!
//! ## Architecture
//!
//! - [`ExecutionCoordinator`]: consumes signed claims and executes pending
//!   actions through the ledger's conditional updates, then calls the
//!   [`StateMutator`] once for the single winner.
//! - [`ReplayGuard`]: accepts an external transaction reference once, ever,
//!   after the [`ReferenceVerifier`] confirms it.
//! - [`ConflictMonitor`]: advisory per-subject rate of lost races.
//!
//! Effects that fail after consumption are never retried. The record stays
//! consumed with outcome `failed` until an operator reconciles it.

pub mod coordinator;
pub mod monitor;
pub mod mutator;
pub mod reference;
pub mod replay_guard;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use coordinator::{ActionExecution, ClaimSettlement, ExecutionCoordinator};
pub use monitor::{ConflictKind, ConflictMonitor};
pub use mutator::StateMutator;
pub use reference::{ReferenceVerifier, VerifiedReference};
pub use replay_guard::{ReplayGuard, ReplayVerdict};
