//! Core value objects shared across the gateway.
//!
//! Addresses are kept in their canonical lowercase `0x`-prefixed hex form so
//! that every membership or ownership comparison in the crate is
//! case-insensitive by construction rather than by convention.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::str::FromStr;
use std::time::{SystemTime, SystemTimeError};

/// A 20-byte Ethereum address in canonical lowercase form.
///
/// Parsing accepts any hex casing (checksummed or not); display and
/// serialization always produce lowercase `0x`-hex. Equality and hashing act
/// on the raw bytes, so two spellings of the same address always compare
/// equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvmAddress(Address);

impl EvmAddress {
    pub fn new(address: Address) -> Self {
        Self(address)
    }

    /// The underlying Alloy address.
    pub fn address(&self) -> Address {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        self.0.as_ref()
    }

    /// Canonical lowercase `0x`-prefixed hex rendering.
    pub fn canonical(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<Address> for EvmAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl From<EvmAddress> for Address {
    fn from(address: EvmAddress) -> Self {
        address.0
    }
}

impl FromStr for EvmAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_str(s)
            .map(Self)
            .map_err(|e| format!("invalid address: {e}"))
    }
}

impl Display for EvmAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl Serialize for EvmAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for EvmAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A Unix timestamp in whole seconds.
///
/// All expiry arithmetic in the gateway runs on second granularity; callers
/// pass `now` explicitly so expiry behavior is testable without a live clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixTimestamp(pub u64);

impl UnixTimestamp {
    pub fn try_now() -> Result<Self, SystemTimeError> {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_secs();
        Ok(Self(now))
    }

    /// Current time, falling back to the epoch if the system clock is broken.
    ///
    /// The fallback makes every timestamp comparison fail closed (everything
    /// appears expired) instead of panicking on the hot path.
    pub fn now() -> Self {
        Self::try_now().unwrap_or(Self(0))
    }

    pub fn seconds_since_epoch(&self) -> u64 {
        self.0
    }

    pub fn saturating_sub(&self, other: UnixTimestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        UnixTimestamp(self.0.saturating_add(rhs))
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a request's identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimsSource {
    #[serde(rename = "siwe-token")]
    SiweToken,
    #[serde(rename = "api-key")]
    ApiKey,
}

impl Display for ClaimsSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimsSource::SiweToken => write!(f, "siwe-token"),
            ClaimsSource::ApiKey => write!(f, "api-key"),
        }
    }
}

/// Request-scoped identity facts attached after successful authentication.
///
/// Claims are never persisted; they travel through the middleware pipeline as
/// a request extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub address: EvmAddress,
    pub scopes: Vec<String>,
    pub source: ClaimsSource,
}

impl Claims {
    pub fn new(address: EvmAddress, scopes: Vec<String>, source: ClaimsSource) -> Self {
        Self {
            address,
            scopes,
            source,
        }
    }

    /// Literal scope membership. No wildcard expansion.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// An unsigned 256-bit token quantity in base units.
///
/// Serialized as a decimal string to survive JSON number precision limits;
/// deserialization also accepts a bare non-negative integer for small values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    pub fn from_u64(value: u64) -> Self {
        Self(U256::from(value))
    }

    pub fn value(&self) -> U256 {
        self.0
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl FromStr for TokenAmount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_str_radix(s, 10)
            .map(Self)
            .map_err(|e| format!("invalid token amount: {e}"))
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(TokenAmount(U256::from(n))),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parsing_is_case_insensitive() {
        let lower: EvmAddress = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045"
            .parse()
            .unwrap();
        let checksummed: EvmAddress = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
            .parse()
            .unwrap();
        assert_eq!(lower, checksummed);
    }

    #[test]
    fn address_renders_lowercase() {
        let address: EvmAddress = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
            .parse()
            .unwrap();
        assert_eq!(
            address.canonical(),
            "0xd8da6bf26964af9d7eed9e03e53415d37aa96045"
        );
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"0xd8da6bf26964af9d7eed9e03e53415d37aa96045\"");
    }

    #[test]
    fn address_rejects_malformed_input() {
        assert!("0x1234".parse::<EvmAddress>().is_err());
        assert!("not-an-address".parse::<EvmAddress>().is_err());
    }

    #[test]
    fn scope_membership_is_literal() {
        let claims = Claims::new(
            "0xd8da6bf26964af9d7eed9e03e53415d37aa96045"
                .parse()
                .unwrap(),
            vec!["read".to_string(), "admin:users".to_string()],
            ClaimsSource::ApiKey,
        );
        assert!(claims.has_scope("read"));
        assert!(claims.has_scope("admin:users"));
        assert!(!claims.has_scope("admin"));
        assert!(!claims.has_scope("admin:*"));
        assert!(!claims.has_scope("Read"));
    }

    #[test]
    fn token_amount_accepts_decimal_strings_and_numbers() {
        let from_text: TokenAmount = serde_json::from_str("\"1000000000000000000000\"").unwrap();
        assert_eq!(from_text.to_string(), "1000000000000000000000");
        let from_number: TokenAmount = serde_json::from_str("1000").unwrap();
        assert_eq!(from_number, TokenAmount::from_u64(1000));
    }

    #[test]
    fn timestamp_arithmetic_saturates() {
        let t = UnixTimestamp(u64::MAX);
        assert_eq!(t + 10, UnixTimestamp(u64::MAX));
        assert_eq!(UnixTimestamp(5).saturating_sub(UnixTimestamp(10)), 0);
        assert_eq!(UnixTimestamp(10).saturating_sub(UnixTimestamp(4)), 6);
    }
}
