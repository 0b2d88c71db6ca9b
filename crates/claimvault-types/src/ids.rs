//! Identifiers used throughout ClaimVault.
//!
//! Claim ids and execution tokens are bearer-like values handed to
//! untrusted clients, so they use random UUIDv4. Pending action ids use
//! UUIDv7 for time-ordered sorting. Subjects and transaction hashes are
//! validated strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{MAX_SUBJECT_LEN, MAX_TX_HASH_DIGITS};
use crate::{ClaimvaultError, Result};

// ---------------------------------------------------------------------------
// ClaimId
// ---------------------------------------------------------------------------

/// Globally unique, unguessable claim identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ClaimId(pub Uuid);

impl ClaimId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClaimId {
    type Err = ClaimvaultError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ClaimvaultError::InvalidPayload {
                reason: format!("claim id {s:?}: {e}"),
            })
    }
}

// ---------------------------------------------------------------------------
// ActionId
// ---------------------------------------------------------------------------

/// Pending action identifier. Uses UUIDv7 for time-ordered sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ActionId(pub Uuid);

impl ActionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActionId {
    type Err = ClaimvaultError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ClaimvaultError::InvalidPayload {
                reason: format!("action id {s:?}: {e}"),
            })
    }
}

// ---------------------------------------------------------------------------
// ExecutionToken
// ---------------------------------------------------------------------------

/// Token written by the single winner of a pending-action race.
///
/// Only the holder of the token may move the action to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionToken(pub Uuid);

impl ExecutionToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExecutionToken {
    type Err = ClaimvaultError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ClaimvaultError::InvalidPayload {
                reason: format!("execution token {s:?}: {e}"),
            })
    }
}

// ---------------------------------------------------------------------------
// Subject
// ---------------------------------------------------------------------------

/// The identity a claim or action is bound to (account, wallet address, ...).
///
/// Compared byte-for-byte; no case folding is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subject(String);

impl Subject {
    /// Validate and wrap a subject identity.
    ///
    /// # Errors
    /// Returns `InvalidSubject` if the value is empty, longer than
    /// [`MAX_SUBJECT_LEN`] characters, or contains whitespace or control
    /// characters.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ClaimvaultError::InvalidSubject {
                reason: "subject is empty".into(),
            });
        }
        let len = raw.chars().count();
        if len > MAX_SUBJECT_LEN {
            return Err(ClaimvaultError::InvalidSubject {
                reason: format!("subject has {len} characters (max {MAX_SUBJECT_LEN})"),
            });
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ClaimvaultError::InvalidSubject {
                reason: "subject contains whitespace or control characters".into(),
            });
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Subject {
    type Error = ClaimvaultError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Subject> for String {
    fn from(value: Subject) -> Self {
        value.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// TxHash
// ---------------------------------------------------------------------------

/// Case-normalized reference to a transaction on an external ledger.
///
/// Canonical form is lowercase with a `0x` prefix, so `0xDEAD`, `dead`
/// and ` 0xdead ` all name the same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash(String);

impl TxHash {
    /// Normalize and validate a transaction hash.
    ///
    /// # Errors
    /// Returns `InvalidTxHash` if the value is empty, has more than
    /// [`MAX_TX_HASH_DIGITS`] digits, or contains non-hex characters.
    pub fn parse(raw: &str) -> Result<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let digits = lowered.strip_prefix("0x").unwrap_or(&lowered);
        if digits.is_empty() {
            return Err(ClaimvaultError::InvalidTxHash {
                reason: "transaction hash is empty".into(),
            });
        }
        if digits.len() > MAX_TX_HASH_DIGITS {
            return Err(ClaimvaultError::InvalidTxHash {
                reason: format!(
                    "transaction hash has {} digits (max {MAX_TX_HASH_DIGITS})",
                    digits.len()
                ),
            });
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ClaimvaultError::InvalidTxHash {
                reason: format!("transaction hash {raw:?} is not hexadecimal"),
            });
        }
        Ok(Self(format!("0x{digits}")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TxHash {
    type Error = ClaimvaultError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TxHash> for String {
    fn from(value: TxHash) -> Self {
        value.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// SignerId
// ---------------------------------------------------------------------------

/// Identity of a claim signer: the raw ed25519 public key (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SignerId(pub [u8; 32]);

impl SignerId {
    #[must_use]
    pub fn from_pubkey(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl FromStr for SignerId {
    type Err = ClaimvaultError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|e| {
            ClaimvaultError::InvalidPayload {
                reason: format!("signer id: {e}"),
            }
        })?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ClaimvaultError::InvalidPayload {
                reason: "signer id must be 32 bytes".into(),
            })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for SignerId {
    type Error = ClaimvaultError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SignerId> for String {
    fn from(value: SignerId) -> Self {
        value.to_hex()
    }
}

impl fmt::Display for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signer:{}", hex::encode(&self.0[..8]))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
