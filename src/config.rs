// Node configuration
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::consensus::ProducerConfig;
use crate::execution::NoncePolicy;
use crate::mempool::TieBreak;
use crate::primitives::{Address, Balance, ChainError, Policy, Result};

/// A validator seeded at genesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub address: Address,
    #[serde(with = "hex::serde")]
    pub public_key: Vec<u8>,
    pub stake: Balance,
    #[serde(default)]
    pub reputation_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub chain_id: String,
    pub block_interval_ms: u64,
    pub batch_size: usize,
    pub pool_capacity: usize,
    pub tie_break: TieBreak,
    pub nonce_policy: NoncePolicy,
    pub announcement_capacity: usize,
    pub genesis_accounts: BTreeMap<Address, Balance>,
    pub genesis_validators: Vec<GenesisValidator>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_id: Policy::CHAIN_ID.to_string(),
            block_interval_ms: Policy::BLOCK_TIME,
            batch_size: Policy::DEFAULT_BATCH_SIZE,
            pool_capacity: Policy::MAX_POOL_SIZE,
            tie_break: TieBreak::default(),
            nonce_policy: NoncePolicy::default(),
            announcement_capacity: Policy::ANNOUNCEMENT_CAPACITY,
            genesis_accounts: BTreeMap::new(),
            genesis_validators: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Reads a JSON config file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ChainError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: NodeConfig = serde_json::from_str(&text)
            .map_err(|e| ChainError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chain_id.is_empty() {
            return Err(ChainError::Config("chain_id must not be empty".to_string()));
        }
        if self.block_interval_ms == 0 {
            return Err(ChainError::Config("block_interval_ms must be positive".to_string()));
        }
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("pool_capacity", self.pool_capacity),
            ("announcement_capacity", self.announcement_capacity),
        ] {
            if value == 0 {
                return Err(ChainError::Config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            block_interval: Duration::from_millis(self.block_interval_ms),
            announcement_capacity: self.announcement_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy() {
        let config = NodeConfig::default();
        assert_eq!(config.block_interval_ms, 2_000);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.pool_capacity, 10_000);
        assert_eq!(config.announcement_capacity, 64);
        assert_eq!(config.nonce_policy, NoncePolicy::Unchecked);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "chain_id": "agc-test",
            "block_interval_ms": 500,
            "tie_break": "arrival",
            "nonce_policy": "reject_stale",
            "genesis_accounts": { "0x00000000000000000000000000000000000000aa": 1000 }
        }"#;
        let config: NodeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.chain_id, "agc-test");
        assert_eq!(config.block_interval_ms, 500);
        assert_eq!(config.tie_break, TieBreak::Arrival);
        assert_eq!(config.nonce_policy, NoncePolicy::RejectStale);
        assert_eq!(config.batch_size, Policy::DEFAULT_BATCH_SIZE);
        assert_eq!(config.genesis_accounts.values().copied().collect::<Vec<_>>(), vec![1000]);
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = NodeConfig::default();
        config.block_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ChainError::Config(_))));

        let mut config = NodeConfig::default();
        config.announcement_capacity = 0;
        assert!(matches!(config.validate(), Err(ChainError::Config(_))));
    }
}
