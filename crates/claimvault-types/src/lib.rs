//! # claimvault-types
//!
//! Shared types, errors, and configuration for the **ClaimVault** engine.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`ClaimId`], [`ActionId`], [`ExecutionToken`], [`Subject`], [`TxHash`], [`SignerId`]
//! - **Amounts**: [`TokenAmount`]
//! - **Claim model**: [`ClaimRecord`], [`ClaimPurpose`], [`ClaimOutcome`], [`ClaimPayload`], [`SignedClaim`]
//! - **Pending actions**: [`PendingAction`], [`ActionStatus`]
//! - **External references**: [`ExternalTxRecord`], [`ExternalTxStatus`]
//! - **Effects**: [`Effect`], [`EffectReceipt`]
//! - **Reconciliation**: [`Resolution`], [`ResolutionRecord`]
//! - **Time**: [`Clock`], [`SystemClock`]
//! - **Configuration**: [`EngineConfig`], [`SigningDomain`]
//! - **Errors**: [`ClaimvaultError`] with `CV_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod action;
pub mod amount;
pub mod claim;
pub mod clock;
pub mod config;
pub mod constants;
pub mod effect;
pub mod error;
pub mod external_tx;
pub mod ids;
pub mod resolution;

mod hex_serde;

// Re-export all primary types at crate root for ergonomic imports:
//   use claimvault_types::{ClaimRecord, SignedClaim, PendingAction, ...};

pub use action::*;
pub use amount::*;
pub use claim::*;
pub use clock::*;
pub use config::*;
pub use effect::*;
pub use error::*;
pub use external_tx::*;
pub use ids::*;
pub use resolution::*;

// Constants are accessed via `claimvault_types::constants::FOO`
// (not re-exported to avoid name collisions).
