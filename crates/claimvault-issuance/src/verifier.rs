//! Stateless claim verification.
//!
//! Checks who signed a claim and whether it is still fresh. It never looks
//! at the ledger, so any number of verifications can run in parallel.

use std::sync::Arc;

use chrono::Duration;
use ed25519_dalek::{Signature, VerifyingKey};

use claimvault_types::{
    ClaimPayload, ClaimvaultError, Clock, Result, SignedClaim, SignerId, SigningDomain, Subject,
};

/// A claim whose signature and freshness have been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaim {
    pub subject: Subject,
    pub signer: SignerId,
    pub payload: ClaimPayload,
}

pub struct ClaimVerifier {
    authorized: SignerId,
    key: VerifyingKey,
    domain: SigningDomain,
    skew: Duration,
    clock: Arc<dyn Clock>,
}

impl ClaimVerifier {
    /// Build a verifier that accepts only claims signed by `authorized`.
    ///
    /// # Errors
    /// `Configuration` if `authorized` is not a valid ed25519 public key.
    pub fn new(
        authorized: SignerId,
        domain: SigningDomain,
        skew: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let key = VerifyingKey::from_bytes(authorized.as_bytes()).map_err(|e| {
            ClaimvaultError::Configuration(format!("authorized signer {authorized}: {e}"))
        })?;
        Ok(Self {
            authorized,
            key,
            domain,
            skew,
            clock,
        })
    }

    #[must_use]
    pub fn authorized_signer(&self) -> SignerId {
        self.authorized
    }

    /// Authenticate `signed` and check it has not expired.
    ///
    /// Authenticity is checked first, so a tampered `expires_at` reports
    /// `InvalidSignature`, not `Expired`.
    ///
    /// # Errors
    /// `InvalidSignature` or `Expired`.
    pub fn verify(&self, signed: &SignedClaim) -> Result<VerifiedClaim> {
        let payload = &signed.payload;
        let signer = signed.signature.signer;

        if signer != self.authorized {
            tracing::warn!(
                claim_id = %payload.claim_id,
                subject = %payload.subject,
                signer = %signer,
                "Claim signed by unauthorized key"
            );
            return Err(ClaimvaultError::InvalidSignature {
                reason: format!("{signer} is not the authorized signer"),
            });
        }

        let signature = Signature::from_slice(&signed.signature.bytes).map_err(|_| {
            ClaimvaultError::InvalidSignature {
                reason: format!(
                    "signature must be 64 bytes, got {}",
                    signed.signature.bytes.len()
                ),
            }
        })?;
        let digest = payload.signing_digest(&self.domain);
        if self.key.verify_strict(&digest, &signature).is_err() {
            tracing::warn!(
                claim_id = %payload.claim_id,
                subject = %payload.subject,
                "Claim signature rejected"
            );
            return Err(ClaimvaultError::InvalidSignature {
                reason: "signature does not match payload".into(),
            });
        }

        if payload.is_expired_at(self.clock.now(), self.skew) {
            return Err(ClaimvaultError::Expired {
                claim_id: payload.claim_id,
                expires_at: payload.expires_at,
            });
        }

        Ok(VerifiedClaim {
            subject: payload.subject.clone(),
            signer,
            payload: payload.clone(),
        })
    }
}
