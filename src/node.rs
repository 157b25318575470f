// Node assembly: ledger, pool, registry, engine and producer wired together
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::blockchain::{Block, Transaction, Validator, ValidatorRegistry};
use crate::config::NodeConfig;
use crate::consensus::{BlockProducer, PoolBatches};
use crate::execution::ExecutionEngine;
use crate::mempool::AdmissionPool;
use crate::primitives::{Address, ChainError, Result, H256};
use crate::state::{Account, AgentRecord, Ledger};

/// Boundary used by request front-ends (RPC, CLI tooling)
#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn submit_transaction(&self, transaction: Transaction) -> Result<H256>;

    async fn get_account(&self, address: &Address) -> Account;

    async fn get_agent(&self, identifier: &str) -> Result<AgentRecord>;

    async fn pool_size(&self) -> usize;

    fn chain_id(&self) -> &str;
}

pub struct Node {
    config: NodeConfig,
    ledger: Arc<Ledger>,
    pool: Arc<AdmissionPool>,
    validators: Arc<ValidatorRegistry>,
    producer: Arc<BlockProducer>,
}

impl Node {
    pub async fn new(config: NodeConfig) -> Result<Self> {
        Self::with_engine(config, ExecutionEngine::new()).await
    }

    /// Builds a node around a preconfigured engine (custom precompiles or receipt
    /// verifier). The configured nonce policy replaces the engine's.
    pub async fn with_engine(config: NodeConfig, engine: ExecutionEngine) -> Result<Self> {
        config.validate()?;
        let engine = engine.with_nonce_policy(config.nonce_policy);

        let ledger = Arc::new(Ledger::new());
        for (address, balance) in &config.genesis_accounts {
            ledger.set_balance(*address, *balance).await;
        }

        let validators = Arc::new(ValidatorRegistry::new());
        for genesis in &config.genesis_validators {
            validators
                .add_validator(Validator::new(
                    genesis.address,
                    genesis.public_key.clone(),
                    genesis.stake,
                    genesis.reputation_score,
                ))
                .await?;
        }

        let pool = Arc::new(AdmissionPool::with_capacity(config.pool_capacity, config.tie_break));
        let producer = Arc::new(BlockProducer::new(
            ledger.clone(),
            validators.clone(),
            Arc::new(engine),
            config.producer_config(),
        ));

        info!(
            "Node initialized for chain {} ({} genesis accounts, {} validators)",
            config.chain_id,
            config.genesis_accounts.len(),
            config.genesis_validators.len()
        );

        Ok(Self {
            config,
            ledger,
            pool,
            validators,
            producer,
        })
    }

    /// Replaces the block producer, e.g. to attach a signer. Only valid before `start`.
    pub fn with_producer<F>(mut self, build: F) -> Result<Self>
    where
        F: FnOnce(BlockProducer) -> BlockProducer,
    {
        let producer = Arc::try_unwrap(self.producer)
            .map_err(|_| ChainError::Lifecycle("block producer is shared".to_string()))?;
        self.producer = Arc::new(build(producer));
        Ok(self)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn pool(&self) -> &Arc<AdmissionPool> {
        &self.pool
    }

    pub fn validators(&self) -> &Arc<ValidatorRegistry> {
        &self.validators
    }

    pub fn producer(&self) -> &Arc<BlockProducer> {
        &self.producer
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<Arc<Block>> {
        self.producer.subscribe().await
    }

    pub async fn tip(&self) -> Arc<Block> {
        self.producer.tip().await
    }

    /// Starts block production for `proposer`. Each tick selects up to
    /// `batch_size` transactions from the pool, so pending transactions stay
    /// pooled until a block consumes them.
    pub async fn start(&self, proposer: Address) -> Result<()> {
        self.producer
            .start(proposer, PoolBatches::new(self.pool.clone(), self.config.batch_size))
            .await?;
        info!("Node started on chain {}", self.config.chain_id);
        Ok(())
    }

    /// Stops block production after the in-flight tick
    pub async fn stop(&self) -> Result<()> {
        self.producer.stop().await?;
        info!("Node stopped");
        Ok(())
    }
}

#[async_trait]
impl NodeApi for Node {
    async fn submit_transaction(&self, transaction: Transaction) -> Result<H256> {
        self.pool.add(transaction).await
    }

    async fn get_account(&self, address: &Address) -> Account {
        self.ledger.get_account(address).await
    }

    async fn get_agent(&self, identifier: &str) -> Result<AgentRecord> {
        self.ledger.get_agent(identifier).await
    }

    async fn pool_size(&self) -> usize {
        self.pool.size().await
    }

    fn chain_id(&self) -> &str {
        &self.config.chain_id
    }
}
