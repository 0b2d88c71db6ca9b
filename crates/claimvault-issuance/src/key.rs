//! Signing-key abstraction.

use ed25519_dalek::{Signer, SigningKey};

use claimvault_types::{Result, SignerId};

/// An opaque ed25519 signing service (local key, KMS, HSM).
pub trait ClaimSigningKey: Send + Sync + 'static {
    /// Public identity that verifiers are configured with.
    fn signer_id(&self) -> SignerId;

    /// Sign a 32-byte claim digest, returning the 64-byte signature.
    fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>>;
}

impl ClaimSigningKey for SigningKey {
    fn signer_id(&self) -> SignerId {
        SignerId::from_pubkey(self.verifying_key().to_bytes())
    }

    fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>> {
        Ok(self.sign(digest).to_bytes().to_vec())
    }
}
