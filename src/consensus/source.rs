// Batch sources polled by the block producer at each tick
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::blockchain::Transaction;
use crate::mempool::AdmissionPool;

/// Supplies the batch for the block being built. Polled once per tick and
/// never waits for work: an empty batch yields an empty block.
#[async_trait]
pub trait BatchSource: Send {
    async fn next_batch(&mut self) -> Vec<Transaction>;
}

/// Batches handed over by an upstream component. One batch per tick.
#[async_trait]
impl BatchSource for mpsc::Receiver<Vec<Transaction>> {
    async fn next_batch(&mut self) -> Vec<Transaction> {
        match self.try_recv() {
            Ok(batch) => batch,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Vec::new(),
        }
    }
}

/// Selects from the admission pool at tick time. Pending transactions stay in
/// the pool until a block takes them.
pub struct PoolBatches {
    pool: Arc<AdmissionPool>,
    batch_size: usize,
}

impl PoolBatches {
    pub fn new(pool: Arc<AdmissionPool>, batch_size: usize) -> Self {
        Self { pool, batch_size }
    }
}

#[async_trait]
impl BatchSource for PoolBatches {
    async fn next_batch(&mut self) -> Vec<Transaction> {
        self.pool.pop_batch(self.batch_size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Address;

    fn addr(seed: &str) -> Address {
        Address::from_public_key(seed.as_bytes())
    }

    #[tokio::test]
    async fn test_pool_batches_respect_batch_size_and_priority() {
        let pool = Arc::new(AdmissionPool::new());
        for price in 1..=5 {
            pool.add(Transaction::transfer(addr("a"), addr("b"), 1, 0, price)).await.unwrap();
        }
        let mut source = PoolBatches::new(pool.clone(), 2);

        let prices = |batch: Vec<Transaction>| batch.iter().map(|tx| tx.gas_price).collect::<Vec<_>>();
        assert_eq!(prices(source.next_batch().await), vec![5, 4]);
        assert_eq!(pool.size().await, 3);
        assert_eq!(prices(source.next_batch().await), vec![3, 2]);
        assert_eq!(prices(source.next_batch().await), vec![1]);
        assert!(source.next_batch().await.is_empty());
    }

    #[tokio::test]
    async fn test_channel_yields_one_batch_per_poll() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(vec![Transaction::transfer(addr("a"), addr("b"), 1, 0, 1)]).await.unwrap();
        tx.send(vec![Transaction::transfer(addr("a"), addr("b"), 2, 1, 1)]).await.unwrap();

        assert_eq!(rx.next_batch().await.len(), 1);
        assert_eq!(rx.next_batch().await[0].value, 2);
        assert!(rx.next_batch().await.is_empty());

        drop(tx);
        assert!(rx.next_batch().await.is_empty());
    }
}
