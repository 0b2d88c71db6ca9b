use async_trait::async_trait;

use claimvault_types::{ClaimPurpose, Result, Subject, TokenAmount};

/// Domain logic that decides how much a claim is worth.
///
/// This is the only source of claim amounts. Whatever the client sent in
/// `context` is input to the computation, never the result.
#[async_trait]
pub trait AmountCalculator: Send + Sync + 'static {
    /// Return the authoritative amount, or `ComputationError` if the input
    /// does not entitle the subject to anything.
    async fn compute_amount(
        &self,
        subject: &Subject,
        purpose: ClaimPurpose,
        context: &serde_json::Value,
    ) -> Result<TokenAmount>;
}
