//! Collaborator doubles. **Never use in production.**

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use claimvault_types::{
    ClaimvaultError, Effect, EffectReceipt, Result, Subject, TokenAmount, TxHash,
};

use crate::{ReferenceVerifier, StateMutator, VerifiedReference};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Ledgers {
    balances: HashMap<Subject, TokenAmount>,
    /// `(subject, action_type) → times executed`
    actions: HashMap<(Subject, String), u64>,
    /// `subject → external transactions applied`
    external: HashMap<Subject, u64>,
}

/// Stand-in for the external state store: balances, action counters and
/// applied external transactions, all in memory.
///
/// An optional delay inside `apply_effect` widens race windows in
/// concurrency tests.
#[derive(Debug, Default)]
pub struct InMemoryBalanceMutator {
    state: Mutex<Ledgers>,
    applied: AtomicU64,
    delay: Option<std::time::Duration>,
}

impl InMemoryBalanceMutator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_delay(delay: std::time::Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn balance(&self, subject: &Subject) -> TokenAmount {
        lock(&self.state)
            .balances
            .get(subject)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn action_count(&self, subject: &Subject, action_type: &str) -> u64 {
        lock(&self.state)
            .actions
            .get(&(subject.clone(), action_type.to_string()))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn external_count(&self, subject: &Subject) -> u64 {
        lock(&self.state).external.get(subject).copied().unwrap_or(0)
    }

    /// Total effects applied, of any kind.
    #[must_use]
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateMutator for InMemoryBalanceMutator {
    async fn apply_effect(&self, subject: &Subject, effect: &Effect) -> Result<EffectReceipt> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut state = lock(&self.state);
            match effect {
                Effect::Credit { amount, .. } => {
                    let balance = state.balances.entry(subject.clone()).or_default();
                    *balance = balance.checked_add(amount)?;
                }
                Effect::Action { action_type, .. } => {
                    *state
                        .actions
                        .entry((subject.clone(), action_type.clone()))
                        .or_insert(0) += 1;
                }
                Effect::ExternalTransaction { .. } => {
                    *state.external.entry(subject.clone()).or_insert(0) += 1;
                }
            }
        }
        let n = self.applied.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(EffectReceipt::new(format!("mutation-{n}"), Utc::now()))
    }
}

/// Refuses every effect, counting attempts.
#[derive(Debug)]
pub struct FailingMutator {
    reason: String,
    attempts: AtomicU64,
}

impl FailingMutator {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            attempts: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateMutator for FailingMutator {
    async fn apply_effect(&self, _subject: &Subject, _effect: &Effect) -> Result<EffectReceipt> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ClaimvaultError::Io(self.reason.clone()))
    }
}

/// Answers from a fixed table; unknown hashes are reported invalid.
#[derive(Debug, Default)]
pub struct StaticReferenceVerifier {
    known: HashMap<TxHash, VerifiedReference>,
    calls: AtomicU64,
}

impl StaticReferenceVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `raw` as a valid transaction of `subject`.
    ///
    /// # Panics
    /// If `raw` is not a valid hash.
    #[must_use]
    pub fn with_valid(mut self, raw: &str, subject: &Subject, metadata: serde_json::Value) -> Self {
        let tx_hash = TxHash::parse(raw).unwrap_or_else(|e| panic!("test hash {raw:?}: {e}"));
        self.known.insert(
            tx_hash,
            VerifiedReference {
                valid: true,
                subject: Some(subject.clone()),
                metadata,
            },
        );
        self
    }

    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReferenceVerifier for StaticReferenceVerifier {
    async fn verify_reference(&self, tx_hash: &TxHash) -> Result<VerifiedReference> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .known
            .get(tx_hash)
            .cloned()
            .unwrap_or_else(VerifiedReference::invalid))
    }
}
