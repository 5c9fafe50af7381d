//! Domain primitives: Address, ReferralCode.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Starknet account/contract address.
///
/// Stored normalized: lowercase hex, `0x` prefix, no leading zeros.
/// The same felt written with or without padding compares equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressParseError {
    #[error("address is empty")]
    Empty,
    #[error("address is not hex: {0}")]
    NotHex(String),
    #[error("address longer than a felt: {0}")]
    TooLong(String),
}

impl Address {
    /// Parse and normalize an address.
    pub fn parse(raw: &str) -> Result<Self, AddressParseError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() {
            return Err(AddressParseError::Empty);
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressParseError::NotHex(raw.to_string()));
        }
        let significant = digits.trim_start_matches('0').to_ascii_lowercase();
        if significant.len() > 64 {
            return Err(AddressParseError::TooLong(raw.to_string()));
        }
        if significant.is_empty() {
            return Ok(Address("0x0".to_string()));
        }
        Ok(Address(format!("0x{}", significant)))
    }

    /// The zero address used as the mint/burn endpoint of transfers.
    pub fn zero() -> Self {
        Address("0x0".to_string())
    }

    /// True for the zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == "0x0"
    }

    /// Get the address as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Referral code attached to a deposit, e.g. "9EFE5".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReferralCode(String);

impl ReferralCode {
    /// Build a referral code. Blank input yields `None`.
    pub fn new(code: impl AsRef<str>) -> Option<Self> {
        let trimmed = code.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(ReferralCode(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReferralCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalizes_padding_and_case() {
        let a = Address::parse("0x00000ABCdef").unwrap();
        let b = Address::parse("0xabcdef").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "0xabcdef");
    }

    #[test]
    fn test_address_zero() {
        assert!(Address::parse("0x0000").unwrap().is_zero());
        assert!(Address::parse("0").unwrap().is_zero());
        assert!(!Address::parse("0x1").unwrap().is_zero());
        assert_eq!(Address::zero().to_string(), "0x0");
    }

    #[test]
    fn test_address_rejects_garbage() {
        assert_eq!(Address::parse(""), Err(AddressParseError::Empty));
        assert!(matches!(
            Address::parse("0xnothex"),
            Err(AddressParseError::NotHex(_))
        ));
        let too_long = format!("0x1{}", "0".repeat(64));
        assert!(matches!(
            Address::parse(&too_long),
            Err(AddressParseError::TooLong(_))
        ));
    }

    #[test]
    fn test_referral_code_blank_is_none() {
        assert!(ReferralCode::new("   ").is_none());
        assert_eq!(ReferralCode::new(" 9EFE5 ").unwrap().as_str(), "9EFE5");
    }
}
