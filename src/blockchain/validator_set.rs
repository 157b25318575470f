// Validator registry: staked participants and their voting power
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::primitives::{Address, Balance, ChainError, Height, Policy, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    #[serde(with = "hex::serde")]
    pub public_key: Vec<u8>,
    pub stake: Balance,
    /// Earned through verified inference proofs
    pub reputation_score: f64,
    /// Derived from stake and reputation, see [`voting_power`]
    pub voting_power: i64,
}

impl Validator {
    pub fn new(address: Address, public_key: Vec<u8>, stake: Balance, reputation_score: f64) -> Self {
        Self {
            address,
            public_key,
            stake,
            reputation_score,
            voting_power: voting_power(stake, reputation_score),
        }
    }
}

/// `floor(stake / STAKE_UNIT) + floor(reputation * 100)`.
///
/// Must be reproducible bit-for-bit: both terms are floored independently and
/// the sum saturates instead of wrapping.
pub fn voting_power(stake: Balance, reputation_score: f64) -> i64 {
    let stake_power = i64::try_from(stake / Policy::STAKE_UNIT).unwrap_or(i64::MAX);
    let boost = (reputation_score * 100.0).floor();
    // NaN maps to zero, infinities saturate
    let boost = if boost.is_nan() { 0 } else { boost as i64 };
    stake_power.saturating_add(boost)
}

pub struct ValidatorRegistry {
    validators: RwLock<BTreeMap<Address, Validator>>,
    minimum_stake: Balance,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::with_minimum_stake(Policy::MIN_VALIDATOR_STAKE)
    }

    pub fn with_minimum_stake(minimum_stake: Balance) -> Self {
        Self {
            validators: RwLock::new(BTreeMap::new()),
            minimum_stake,
        }
    }

    pub fn minimum_stake(&self) -> Balance {
        self.minimum_stake
    }

    /// Registers (or replaces) a validator. Voting power is recomputed here so a
    /// caller-supplied value is never trusted.
    pub async fn add_validator(&self, mut validator: Validator) -> Result<()> {
        if validator.stake < self.minimum_stake {
            return Err(ChainError::BelowMinimumStake {
                stake: validator.stake,
                minimum: self.minimum_stake,
            });
        }
        validator.voting_power = voting_power(validator.stake, validator.reputation_score);

        let mut validators = self.validators.write().await;
        let address = validator.address;
        let power = validator.voting_power;
        if validators.insert(address, validator).is_some() {
            debug!("Replaced existing validator {}", address);
        }
        info!("Validator registered: {} (voting power {})", address, power);
        Ok(())
    }

    pub async fn remove_validator(&self, address: &Address) -> Option<Validator> {
        let removed = self.validators.write().await.remove(address);
        if removed.is_some() {
            info!("Validator removed: {}", address);
        }
        removed
    }

    pub async fn get(&self, address: &Address) -> Option<Validator> {
        self.validators.read().await.get(address).cloned()
    }

    pub async fn contains(&self, address: &Address) -> bool {
        self.validators.read().await.contains_key(address)
    }

    pub async fn len(&self) -> usize {
        self.validators.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.validators.read().await.is_empty()
    }

    /// Voting power of a validator record
    pub fn voting_power(validator: &Validator) -> i64 {
        voting_power(validator.stake, validator.reputation_score)
    }

    pub async fn update_reputation(&self, address: &Address, reputation_score: f64) -> Result<i64> {
        let mut validators = self.validators.write().await;
        let validator = validators
            .get_mut(address)
            .ok_or(ChainError::UnknownValidator(*address))?;
        validator.reputation_score = reputation_score;
        validator.voting_power = voting_power(validator.stake, reputation_score);
        Ok(validator.voting_power)
    }

    /// Sum of non-negative voting power
    pub async fn total_voting_power(&self) -> i64 {
        self.validators
            .read()
            .await
            .values()
            .map(|v| v.voting_power.max(0))
            .fold(0i64, |acc, p| acc.saturating_add(p))
    }

    /// All validators ordered by address
    pub async fn validators(&self) -> Vec<Validator> {
        self.validators.read().await.values().cloned().collect()
    }

    /// Deterministic stake-weighted proposer for a height.
    ///
    /// Walks validators in address order accumulating voting power until the
    /// cumulative weight passes `height mod total`.
    pub async fn proposer_for_height(&self, height: Height) -> Option<Address> {
        let validators = self.validators.read().await;
        let total: u64 = validators
            .values()
            .map(|v| v.voting_power.max(0) as u64)
            .fold(0u64, |acc, p| acc.saturating_add(p));
        if total == 0 {
            return None;
        }

        let target = height % total;
        let mut cumulative = 0u64;
        for validator in validators.values() {
            cumulative = cumulative.saturating_add(validator.voting_power.max(0) as u64);
            if target < cumulative {
                return Some(validator.address);
            }
        }
        None
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(seed: &[u8], whole_tokens: u128, reputation: f64) -> Validator {
        Validator::new(
            Address::from_public_key(seed),
            seed.to_vec(),
            whole_tokens * Policy::TOKEN,
            reputation,
        )
    }

    #[test]
    fn test_voting_power_formula() {
        assert_eq!(voting_power(10_000 * Policy::TOKEN, 0.0), 10_000);
        assert_eq!(voting_power(10_000 * Policy::TOKEN + Policy::TOKEN - 1, 0.0), 10_000);
        assert_eq!(voting_power(10_000 * Policy::TOKEN, 1.5), 10_150);
        assert_eq!(voting_power(10_000 * Policy::TOKEN, 0.019), 10_001);
        assert_eq!(voting_power(0, f64::NAN), 0);
    }

    #[tokio::test]
    async fn test_rejects_stake_below_minimum() {
        let registry = ValidatorRegistry::new();
        let result = registry.add_validator(validator(b"v1", 9_999, 0.0)).await;

        assert!(matches!(result, Err(ChainError::BelowMinimumStake { .. })));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_add_and_lookup() {
        let registry = ValidatorRegistry::new();
        let mut v = validator(b"v1", 10_000, 0.5);
        v.voting_power = 999_999; // ignored
        registry.add_validator(v.clone()).await.unwrap();

        let stored = registry.get(&v.address).await.unwrap();
        assert_eq!(stored.voting_power, 10_050);
        assert_eq!(registry.total_voting_power().await, 10_050);
    }

    #[tokio::test]
    async fn test_update_reputation() {
        let registry = ValidatorRegistry::new();
        let v = validator(b"v1", 20_000, 0.0);
        registry.add_validator(v.clone()).await.unwrap();

        assert_eq!(registry.update_reputation(&v.address, 2.0).await.unwrap(), 20_200);

        let unknown = Address::from_public_key(b"nobody");
        assert!(matches!(
            registry.update_reputation(&unknown, 1.0).await,
            Err(ChainError::UnknownValidator(_))
        ));
    }

    #[tokio::test]
    async fn test_proposer_selection_is_deterministic_and_weighted() {
        let registry = ValidatorRegistry::new();
        registry.add_validator(validator(b"small", 10_000, 0.0)).await.unwrap();
        registry.add_validator(validator(b"large", 30_000, 0.0)).await.unwrap();

        let mut counts = BTreeMap::new();
        for height in 0..40_000u64 {
            let proposer = registry.proposer_for_height(height).await.unwrap();
            *counts.entry(proposer).or_insert(0u64) += 1;
        }

        assert_eq!(counts[&Address::from_public_key(b"small")], 10_000);
        assert_eq!(counts[&Address::from_public_key(b"large")], 30_000);
        assert_eq!(
            registry.proposer_for_height(17).await,
            registry.proposer_for_height(17).await
        );
    }

    #[tokio::test]
    async fn test_empty_registry_has_no_proposer() {
        let registry = ValidatorRegistry::new();
        assert_eq!(registry.proposer_for_height(1).await, None);
    }
}
