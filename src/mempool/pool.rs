// Bounded, deduplicating pool of pending transactions with fee-priority selection
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use crate::blockchain::Transaction;
use crate::primitives::{Balance, ChainError, Policy, Result, H256};

/// Secondary ordering among transactions with equal gas price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Ascending transaction hash; identical on every node
    #[default]
    Hash,
    /// Insertion order; only deterministic within a single node
    Arrival,
}

/// Position in the selection order: highest gas price first
type OrderKey = (Reverse<Balance>, u64, H256);

#[derive(Default)]
struct PoolInner {
    transactions: HashMap<H256, (OrderKey, Transaction)>,
    order: BTreeMap<OrderKey, H256>,
    next_sequence: u64,
}

pub struct AdmissionPool {
    inner: RwLock<PoolInner>,
    capacity: usize,
    tie_break: TieBreak,
}

impl AdmissionPool {
    pub fn new() -> Self {
        Self::with_capacity(Policy::MAX_POOL_SIZE, TieBreak::default())
    }

    pub fn with_capacity(capacity: usize, tie_break: TieBreak) -> Self {
        Self {
            inner: RwLock::new(PoolInner::default()),
            capacity,
            tie_break,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admits a transaction, returning its hash.
    ///
    /// Fails closed when full (nothing is evicted) and rejects content already
    /// pending, whatever its signature.
    pub async fn add(&self, transaction: Transaction) -> Result<H256> {
        let hash = transaction.hash();
        let mut inner = self.inner.write().await;

        if inner.transactions.contains_key(&hash) {
            debug!("Rejected duplicate transaction {}", hash);
            return Err(ChainError::DuplicateTransaction(hash));
        }
        if inner.transactions.len() >= self.capacity {
            debug!("Rejected transaction {}: pool full", hash);
            return Err(ChainError::PoolFull);
        }

        let sequence = match self.tie_break {
            TieBreak::Arrival => inner.next_sequence,
            TieBreak::Hash => 0,
        };
        inner.next_sequence += 1;

        let key = (Reverse(transaction.gas_price), sequence, hash);
        inner.order.insert(key, hash);
        inner.transactions.insert(hash, (key, transaction));
        Ok(hash)
    }

    /// Removes and returns up to `max_count` transactions in selection order
    pub async fn pop_batch(&self, max_count: usize) -> Vec<Transaction> {
        let mut inner = self.inner.write().await;
        let mut batch = Vec::with_capacity(max_count.min(inner.order.len()));

        while batch.len() < max_count {
            let Some((_, hash)) = inner.order.pop_first() else {
                break;
            };
            if let Some((_, tx)) = inner.transactions.remove(&hash) {
                batch.push(tx);
            }
        }
        batch
    }

    /// Drops a pending transaction, returning it if it was present
    pub async fn remove(&self, hash: &H256) -> Option<Transaction> {
        let mut inner = self.inner.write().await;
        let (key, tx) = inner.transactions.remove(hash)?;
        inner.order.remove(&key);
        Some(tx)
    }

    pub async fn contains(&self, hash: &H256) -> bool {
        self.inner.read().await.transactions.contains_key(hash)
    }

    pub async fn size(&self) -> usize {
        self.inner.read().await.transactions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.size().await == 0
    }
}

impl Default for AdmissionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Address;

    fn addr(seed: &str) -> Address {
        Address::from_public_key(seed.as_bytes())
    }

    fn transfer(value: Balance, gas_price: Balance) -> Transaction {
        Transaction::transfer(addr("a"), addr("b"), value, 0, gas_price)
    }

    #[tokio::test]
    async fn test_duplicate_rejected_regardless_of_signature() {
        let pool = AdmissionPool::new();
        let tx = transfer(10, 1);

        let hash = pool.add(tx.clone().with_signature(vec![1])).await.unwrap();
        let second = pool.add(tx.with_signature(vec![2])).await;

        assert_eq!(second, Err(ChainError::DuplicateTransaction(hash)));
        assert_eq!(pool.size().await, 1);
    }

    #[tokio::test]
    async fn test_full_pool_fails_closed() {
        let pool = AdmissionPool::with_capacity(2, TieBreak::Hash);
        pool.add(transfer(1, 1)).await.unwrap();
        pool.add(transfer(2, 1)).await.unwrap();

        assert_eq!(pool.add(transfer(3, 100)).await, Err(ChainError::PoolFull));
        assert_eq!(pool.size().await, 2);
    }

    #[tokio::test]
    async fn test_pop_batch_orders_by_gas_price() {
        let pool = AdmissionPool::new();
        for (value, price) in [(1, 5), (2, 50), (3, 1), (4, 20), (5, 20)] {
            pool.add(transfer(value, price)).await.unwrap();
        }

        let batch = pool.pop_batch(4).await;
        let prices: Vec<Balance> = batch.iter().map(|t| t.gas_price).collect();
        assert_eq!(prices.len(), 4);
        assert!(prices.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(prices[0], 50);
        assert_eq!(pool.size().await, 1);

        for tx in &batch {
            assert!(!pool.contains(&tx.hash()).await);
        }
    }

    #[tokio::test]
    async fn test_hash_tie_break_is_canonical() {
        let first = AdmissionPool::with_capacity(10, TieBreak::Hash);
        let second = AdmissionPool::with_capacity(10, TieBreak::Hash);
        let txs: Vec<Transaction> = (0..5).map(|v| transfer(v, 7)).collect();

        for tx in &txs {
            first.add(tx.clone()).await.unwrap();
        }
        for tx in txs.iter().rev() {
            second.add(tx.clone()).await.unwrap();
        }

        let a: Vec<H256> = first.pop_batch(5).await.iter().map(|t| t.hash()).collect();
        let b: Vec<H256> = second.pop_batch(5).await.iter().map(|t| t.hash()).collect();
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_arrival_tie_break() {
        let pool = AdmissionPool::with_capacity(10, TieBreak::Arrival);
        let txs: Vec<Transaction> = (0..4).map(|v| transfer(v, 3)).collect();
        for tx in &txs {
            pool.add(tx.clone()).await.unwrap();
        }
        assert_eq!(pool.pop_batch(10).await, txs);
    }

    #[tokio::test]
    async fn test_pop_from_empty_and_remove() {
        let pool = AdmissionPool::new();
        assert!(pool.pop_batch(3).await.is_empty());

        let hash = pool.add(transfer(1, 1)).await.unwrap();
        assert!(pool.remove(&hash).await.is_some());
        assert!(pool.is_empty().await);
        assert!(pool.pop_batch(1).await.is_empty());
    }
}
