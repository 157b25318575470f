// Core primitives: digests, addresses, amounts and protocol policy
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::str::FromStr;

use super::error::{ChainError, Result};

/// Token amounts in the smallest unit (10^18 per whole token).
pub type Balance = u128;
pub type Height = u64;
/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;
pub type Gas = u64;

/// SHA-256 digest used for transaction, block and state commitments
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct H256(#[serde(with = "hex::serde")] pub [u8; 32]);

impl H256 {
    pub fn zero() -> Self {
        H256([0u8; 32])
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        H256(bytes)
    }

    pub fn from_data(data: &[u8]) -> Self {
        hash_data(data)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for H256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Account address. Canonical text form is `0x` followed by 40 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const LEN: usize = 20;

    pub fn zero() -> Self {
        Address([0u8; 20])
    }

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    /// Derives an address from a public key (last 20 bytes of its SHA-256).
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let digest = hash_data(public_key);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.0[12..]);
        Address(bytes)
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        let stripped = text.strip_prefix("0x").unwrap_or(text);
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(stripped, &mut bytes)
            .map_err(|e| ChainError::InvalidOperation(format!("invalid address {}: {}", text, e)))?;
        Ok(Address(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self> {
        Address::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Address::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// Protocol constants
pub struct Policy;

impl Policy {
    /// Static chain identifier reported to callers
    pub const CHAIN_ID: &'static str = "agc-devnet-1";

    pub const GENESIS_HEIGHT: Height = 0;

    /// 2025-01-01T00:00:00Z in milliseconds
    pub const GENESIS_TIMESTAMP: Timestamp = 1_735_689_600_000;

    pub const BLOCK_VERSION: u32 = 1;

    /// Block interval in milliseconds
    pub const BLOCK_TIME: u64 = 2_000;

    /// One whole token in base units
    pub const TOKEN: Balance = 1_000_000_000_000_000_000;

    /// Stake is converted to voting power in whole-token units
    pub const STAKE_UNIT: Balance = Self::TOKEN;

    pub const MIN_VALIDATOR_STAKE: Balance = 10_000 * Self::TOKEN;

    pub const BLOCK_REWARD: Balance = 5 * Self::TOKEN;

    pub const MAX_POOL_SIZE: usize = 10_000;

    pub const DEFAULT_BATCH_SIZE: usize = 100;

    pub const ANNOUNCEMENT_CAPACITY: usize = 64;

    pub const MAX_STACK_DEPTH: usize = 1024;
}

pub fn hash_data(data: &[u8]) -> H256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    H256(hasher.finalize().into())
}

pub fn hash_json<T: Serialize>(data: &T) -> Result<H256> {
    let json = serde_json::to_vec(data)?;
    Ok(hash_data(&json))
}

/// Field-by-field SHA-256 writer for canonical, infallible digests.
///
/// Variable-length fields are length-prefixed so adjacent fields can never alias.
pub struct DigestWriter {
    hasher: Sha256,
}

impl DigestWriter {
    pub fn new(domain: &str) -> Self {
        let mut writer = Self { hasher: Sha256::new() };
        writer.put_str(domain);
        writer
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.hasher.update([value]);
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.hasher.update(value.to_be_bytes());
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(value.to_be_bytes());
        self
    }

    pub fn put_i64(&mut self, value: i64) -> &mut Self {
        self.hasher.update(value.to_be_bytes());
        self
    }

    pub fn put_u128(&mut self, value: u128) -> &mut Self {
        self.hasher.update(value.to_be_bytes());
        self
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update((bytes.len() as u64).to_be_bytes());
        self.hasher.update(bytes);
        self
    }

    pub fn put_str(&mut self, text: &str) -> &mut Self {
        self.put_bytes(text.as_bytes())
    }

    pub fn put_option<T, F>(&mut self, value: Option<&T>, put: F) -> &mut Self
    where
        F: FnOnce(&mut Self, &T),
    {
        match value {
            Some(inner) => {
                self.put_u8(1);
                put(self, inner);
            }
            None => {
                self.put_u8(0);
            }
        }
        self
    }

    pub fn finish(self) -> H256 {
        H256(self.hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_hex_round_trip() {
        let address = Address::from_public_key(b"alice");
        let text = address.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 42);
        assert_eq!(Address::from_hex(&text).unwrap(), address);
        assert_eq!(Address::from_hex(&text[2..]).unwrap(), address);
    }

    #[test]
    fn test_address_rejects_bad_hex() {
        assert!(Address::from_hex("0x1234").is_err());
        assert!(Address::from_hex("not an address").is_err());
    }

    #[test]
    fn test_address_serializes_as_string() {
        let address = Address::from_public_key(b"bob");
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", address));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }

    #[test]
    fn test_digest_writer_length_prefix() {
        let mut a = DigestWriter::new("test");
        a.put_bytes(b"ab").put_bytes(b"c");
        let mut b = DigestWriter::new("test");
        b.put_bytes(b"a").put_bytes(b"bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_policy_amounts_fit() {
        assert_eq!(Policy::MIN_VALIDATOR_STAKE / Policy::STAKE_UNIT, 10_000);
        assert_eq!(Policy::BLOCK_REWARD, 5 * Policy::TOKEN);
    }
}
