//! The external state store the engine authorizes changes against.

use async_trait::async_trait;

use claimvault_types::{Effect, EffectReceipt, Result, Subject};

/// Applies an authorized effect to the subject's state (balance, inventory,
/// unlocks, ...).
///
/// The engine calls this at most once per consumed resource. Any `Err` is
/// treated as a failed effect: the resource stays consumed and the failure
/// is left for reconciliation, never retried.
#[async_trait]
pub trait StateMutator: Send + Sync + 'static {
    async fn apply_effect(&self, subject: &Subject, effect: &Effect) -> Result<EffectReceipt>;
}
