//! Calculator doubles. **Never use in production.**

use async_trait::async_trait;

use claimvault_types::{ClaimPurpose, ClaimvaultError, Result, Subject, TokenAmount};

use crate::AmountCalculator;

/// Always returns the same amount.
#[derive(Debug, Clone)]
pub struct FixedAmountCalculator {
    amount: TokenAmount,
}

impl FixedAmountCalculator {
    #[must_use]
    pub fn new(amount: u64) -> Self {
        Self {
            amount: TokenAmount::from_u64(amount),
        }
    }
}

#[async_trait]
impl AmountCalculator for FixedAmountCalculator {
    async fn compute_amount(
        &self,
        _subject: &Subject,
        _purpose: ClaimPurpose,
        _context: &serde_json::Value,
    ) -> Result<TokenAmount> {
        Ok(self.amount.clone())
    }
}

/// Pays `per_point` tokens for each point of `context.score`.
///
/// Ignores any `amount` the client puts in the context.
#[derive(Debug, Clone, Copy)]
pub struct ScoreCalculator {
    pub per_point: u64,
}

#[async_trait]
impl AmountCalculator for ScoreCalculator {
    async fn compute_amount(
        &self,
        subject: &Subject,
        _purpose: ClaimPurpose,
        context: &serde_json::Value,
    ) -> Result<TokenAmount> {
        let score = context
            .get("score")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| ClaimvaultError::ComputationError {
                reason: format!("no numeric score in context for {subject}"),
            })?;
        let amount = score
            .checked_mul(self.per_point)
            .ok_or_else(|| ClaimvaultError::ComputationError {
                reason: format!("score {score} overflows"),
            })?;
        Ok(TokenAmount::from_u64(amount))
    }
}
