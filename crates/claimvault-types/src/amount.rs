//! Token amounts.
//!
//! A [`TokenAmount`] is a non-negative integer of any size, held as its
//! canonical decimal text (no sign, no leading zeros, no fractional part).
//! That text is what the ledger stores and what gets signed, so no
//! fixed-width type sits between issuance and execution.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::constants::MAX_AMOUNT_DIGITS;
use crate::{ClaimvaultError, Result};

/// Non-negative integral token amount.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenAmount(String);

impl TokenAmount {
    #[must_use]
    pub fn zero() -> Self {
        Self("0".to_string())
    }

    /// Convert a decimal, rejecting negative or fractional values.
    ///
    /// Trailing zero scale (`100.00`) is normalized away.
    ///
    /// # Errors
    /// Returns `InvalidAmount` for negative or fractional values.
    pub fn new(value: Decimal) -> Result<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(ClaimvaultError::InvalidAmount {
                reason: format!("{value} is negative"),
            });
        }
        if value.fract() != Decimal::ZERO {
            return Err(ClaimvaultError::InvalidAmount {
                reason: format!("{value} is not an integer"),
            });
        }
        Ok(Self(value.trunc().normalize().abs().to_string()))
    }

    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        Self(value.to_string())
    }

    /// Parse the canonical decimal-string form.
    ///
    /// Only ASCII digits are accepted, without sign, exponent or leading
    /// zeros, so that every amount has exactly one text form.
    ///
    /// # Errors
    /// Returns `InvalidAmount` if `s` is not canonical or longer than
    /// [`MAX_AMOUNT_DIGITS`].
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClaimvaultError::InvalidAmount {
                reason: format!("{s:?} is not a decimal integer"),
            });
        }
        if s.len() > 1 && s.starts_with('0') {
            return Err(ClaimvaultError::InvalidAmount {
                reason: format!("{s:?} has leading zeros"),
            });
        }
        if s.len() > MAX_AMOUNT_DIGITS {
            return Err(ClaimvaultError::InvalidAmount {
                reason: format!("{} digits exceeds the {MAX_AMOUNT_DIGITS}-digit limit", s.len()),
            });
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == "0"
    }

    #[must_use]
    pub fn is_positive(&self) -> bool {
        !self.is_zero()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The amount as a `Decimal`, for stores that keep balances in one.
    ///
    /// Returns `None` when the amount needs more than the 28 digits a
    /// `Decimal` holds.
    #[must_use]
    pub fn to_decimal(&self) -> Option<Decimal> {
        Decimal::from_str_exact(&self.0).ok()
    }

    /// Exact sum of two amounts.
    ///
    /// # Errors
    /// Returns `InvalidAmount` if the sum is longer than [`MAX_AMOUNT_DIGITS`].
    pub fn checked_add(&self, other: &Self) -> Result<Self> {
        let (a, b) = (self.0.as_bytes(), other.0.as_bytes());
        let mut digits = Vec::with_capacity(a.len().max(b.len()) + 1);
        let mut carry = 0u8;
        let mut ia = a.iter().rev();
        let mut ib = b.iter().rev();
        loop {
            let (da, db) = (ia.next(), ib.next());
            if da.is_none() && db.is_none() {
                break;
            }
            let sum = da.map_or(0, |d| d - b'0') + db.map_or(0, |d| d - b'0') + carry;
            digits.push(b'0' + sum % 10);
            carry = sum / 10;
        }
        if carry > 0 {
            digits.push(b'0' + carry);
        }
        digits.reverse();
        if digits.len() > MAX_AMOUNT_DIGITS {
            return Err(ClaimvaultError::InvalidAmount {
                reason: format!("{self} + {other} exceeds the {MAX_AMOUNT_DIGITS}-digit limit"),
            });
        }
        // Inputs are canonical, so the sum is ASCII digits with no leading zero.
        Ok(Self(digits.into_iter().map(char::from).collect()))
    }
}

impl Default for TokenAmount {
    fn default() -> Self {
        Self::zero()
    }
}

impl Ord for TokenAmount {
    fn cmp(&self, other: &Self) -> Ordering {
        // Canonical form: more digits means larger.
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for TokenAmount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TokenAmount {
    type Err = ClaimvaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TokenAmount {
    type Error = ClaimvaultError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TokenAmount> for String {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}
