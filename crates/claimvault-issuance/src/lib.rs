//! # claimvault-issuance
//!
//! The signing half of ClaimVault.
//!
//! - [`ClaimSigner`]: asks the [`AmountCalculator`] for the authoritative
//!   amount, persists the claim, and only then signs it.
//! - [`ClaimVerifier`]: pure check of signer identity, signature and expiry.
//!
//! Signatures cover a domain-separated SHA-256 digest (application name,
//! version and network id folded in), so a claim signed for one deployment
//! is worthless on another.

pub mod calculator;
pub mod key;
pub mod signer;
pub mod verifier;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use calculator::AmountCalculator;
pub use key::ClaimSigningKey;
pub use signer::ClaimSigner;
pub use verifier::{ClaimVerifier, VerifiedClaim};
