// Timer-driven block producer
//
// One background task per running producer. Each tick polls its batch source
// once, executes the batch against the ledger, advances the tip and announces
// the block. Announcements go out on a broadcast channel, so a
// lagging subscriber loses the oldest blocks instead of stalling production.
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::blockchain::{Block, BlockHeader, Transaction, ValidatorRegistry};
use crate::execution::ExecutionEngine;
use crate::primitives::{Address, ChainError, Height, Policy, Result, Timestamp, H256};
use crate::state::{DigestCommitter, Ledger, LedgerState, StateCommitter};
use super::signing::{AcceptAllVerifier, BlockSigner, NoopSigner, SignatureVerifier};
use super::source::BatchSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Idle,
    Proposing,
    Published,
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub block_interval: Duration,
    pub announcement_capacity: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            block_interval: Duration::from_millis(Policy::BLOCK_TIME),
            announcement_capacity: Policy::ANNOUNCEMENT_CAPACITY,
        }
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct BlockProducer {
    ledger: Arc<Ledger>,
    validators: Arc<ValidatorRegistry>,
    engine: Arc<ExecutionEngine>,
    committer: Arc<dyn StateCommitter>,
    signer: Arc<dyn BlockSigner>,
    verifier: Arc<dyn SignatureVerifier>,
    config: ProducerConfig,
    tip: RwLock<Arc<Block>>,
    state: RwLock<ProducerState>,
    announcer: RwLock<Option<broadcast::Sender<Arc<Block>>>>,
    running: Mutex<Option<Running>>,
}

impl BlockProducer {
    pub fn new(
        ledger: Arc<Ledger>,
        validators: Arc<ValidatorRegistry>,
        engine: Arc<ExecutionEngine>,
        config: ProducerConfig,
    ) -> Self {
        Self {
            ledger,
            validators,
            engine,
            committer: Arc::new(DigestCommitter),
            signer: Arc::new(NoopSigner),
            verifier: Arc::new(AcceptAllVerifier),
            config,
            tip: RwLock::new(Arc::new(Block::genesis())),
            state: RwLock::new(ProducerState::Idle),
            announcer: RwLock::new(None),
            running: Mutex::new(None),
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn BlockSigner>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_committer(mut self, committer: Arc<dyn StateCommitter>) -> Self {
        self.committer = committer;
        self
    }

    pub async fn tip(&self) -> Arc<Block> {
        self.tip.read().await.clone()
    }

    pub async fn height(&self) -> Height {
        self.tip.read().await.height()
    }

    pub async fn state(&self) -> ProducerState {
        *self.state.read().await
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Receiver for produced and imported blocks. A receiver that falls more
    /// than the announcement capacity behind observes `Lagged` and skips ahead.
    pub async fn subscribe(&self) -> broadcast::Receiver<Arc<Block>> {
        let mut announcer = self.announcer.write().await;
        match announcer.as_ref() {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = broadcast::channel(self.config.announcement_capacity.max(1));
                *announcer = Some(sender);
                receiver
            }
        }
    }

    /// Launches the production loop for `proposer`, taking one batch from
    /// `batches` per tick. An inbound `mpsc::Receiver` of batches or a
    /// `PoolBatches` over the admission pool both work.
    pub async fn start<S>(self: &Arc<Self>, proposer: Address, batches: S) -> Result<()>
    where
        S: BatchSource + 'static,
    {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ChainError::Lifecycle("block producer already running".to_string()));
        }

        {
            let mut announcer = self.announcer.write().await;
            if announcer.is_none() {
                let (sender, _) = broadcast::channel(self.config.announcement_capacity.max(1));
                *announcer = Some(sender);
            }
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::run(
            Arc::downgrade(self),
            proposer,
            self.config.block_interval,
            batches,
            shutdown_rx,
        ));
        *running = Some(Running { shutdown, handle });

        info!("Block producer started for {} ({:?} interval)", proposer, self.config.block_interval);
        Ok(())
    }

    /// Signals the loop, waits for the in-flight tick to finish and releases the
    /// announcement channel. A no-op when not running.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        // Ignored: the loop may already have exited
        let _ = running.shutdown.send(true);
        running
            .handle
            .await
            .map_err(|e| ChainError::Lifecycle(format!("producer task failed: {}", e)))?;

        self.announcer.write().await.take();
        *self.state.write().await = ProducerState::Idle;
        info!("Block producer stopped at height {}", self.height().await);
        Ok(())
    }

    async fn run<S: BatchSource>(
        producer: Weak<Self>,
        proposer: Address,
        interval: Duration,
        mut batches: S,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let Some(producer) = producer.upgrade() else {
                        break;
                    };
                    let batch = batches.next_batch().await;
                    if let Err(e) = producer.propose_block(proposer, batch).await {
                        warn!("Block proposal failed: {}", e);
                    }
                    *producer.state.write().await = ProducerState::Idle;
                }
            }
        }
        debug!("Block production loop exited");
    }

    /// Builds, executes and publishes the next block from `batch`.
    ///
    /// Transactions are applied in batch order. A failing transaction is
    /// dropped from the block and never retried.
    pub async fn propose_block(&self, proposer: Address, batch: Vec<Transaction>) -> Result<Arc<Block>> {
        *self.state.write().await = ProducerState::Proposing;

        let mut tip = self.tip.write().await;
        let height = tip.height() + 1;
        let previous_hash = tip.hash();

        let mut ledger = self.ledger.write().await;
        let checkpoint = ledger.checkpoint();

        let mut included = Vec::with_capacity(batch.len());
        for tx in batch {
            match self.engine.apply_transaction(&mut ledger, &tx, height) {
                Ok(_) => included.push(tx),
                Err(e) => warn!("Dropped transaction {} from block {}: {}", tx.hash(), height, e),
            }
        }

        let roots = match self.finalize_state(&mut ledger, proposer) {
            Ok(roots) => {
                ledger.commit(checkpoint);
                roots
            }
            Err(e) => {
                ledger.revert_to(checkpoint);
                drop(ledger);
                *self.state.write().await = ProducerState::Idle;
                return Err(e);
            }
        };
        drop(ledger);

        let header = BlockHeader {
            version: Policy::BLOCK_VERSION,
            height,
            timestamp: next_timestamp(tip.timestamp()),
            previous_hash,
            state_root: roots.0,
            transaction_root: Block::compute_transaction_root(&included),
            agent_root: roots.1,
            proposer,
        };
        let proposer_signature = self.signer.sign(&header.hash());
        let block = Arc::new(Block {
            header,
            proposer_signature,
            transactions: included,
        });

        *tip = block.clone();
        drop(tip);

        info!(
            "Block #{} proposed by {} with {} transactions",
            height,
            proposer,
            block.transactions.len()
        );
        self.announce(block.clone()).await;
        *self.state.write().await = ProducerState::Published;
        Ok(block)
    }

    /// Checks an externally proposed block against the current tip
    pub async fn validate_block(&self, block: &Block) -> Result<()> {
        let tip = self.tip.read().await;
        self.check_block(&tip, block).await
    }

    /// Validates `block`, replays it and adopts it as the new tip. Any failure
    /// leaves the ledger and tip untouched.
    pub async fn import_block(&self, block: Block) -> Result<Arc<Block>> {
        let mut tip = self.tip.write().await;
        self.check_block(&tip, &block).await?;

        let mut ledger = self.ledger.write().await;
        let checkpoint = ledger.checkpoint();
        match self.replay(&mut ledger, &block) {
            Ok(()) => ledger.commit(checkpoint),
            Err(e) => {
                ledger.revert_to(checkpoint);
                warn!("Rejected block #{} {}: {}", block.height(), block.hash(), e);
                return Err(e);
            }
        }
        drop(ledger);

        let block = Arc::new(block);
        *tip = block.clone();
        drop(tip);

        info!("Imported block #{} from {}", block.height(), block.proposer());
        self.announce(block.clone()).await;
        Ok(block)
    }

    async fn check_block(&self, tip: &Block, block: &Block) -> Result<()> {
        let proposer = self
            .validators
            .get(block.proposer())
            .await
            .ok_or(ChainError::UnknownValidator(*block.proposer()))?;
        self.verifier.verify(block, &proposer)?;

        let expected = tip.height() + 1;
        if block.height() != expected {
            return Err(ChainError::height_mismatch(expected, block.height()));
        }
        if *block.previous_hash() != tip.hash() {
            return Err(ChainError::InvalidBlock(format!(
                "previous hash {} does not match tip {}",
                block.previous_hash(),
                tip.hash()
            )));
        }
        if !block.has_consistent_body() {
            return Err(ChainError::InvalidBlock("transaction root mismatch".to_string()));
        }
        Ok(())
    }

    fn replay(&self, ledger: &mut LedgerState, block: &Block) -> Result<()> {
        for tx in block.transactions() {
            self.engine
                .apply_transaction(ledger, tx, block.height())
                .map_err(|e| ChainError::InvalidBlock(format!("transaction {} failed: {}", tx.hash(), e)))?;
        }

        let (state_root, agent_root) = self.finalize_state(ledger, *block.proposer())?;
        if state_root != block.header.state_root {
            return Err(ChainError::InvalidBlock(format!(
                "state root mismatch: computed {}, declared {}",
                state_root, block.header.state_root
            )));
        }
        if agent_root != block.header.agent_root {
            return Err(ChainError::InvalidBlock("agent root mismatch".to_string()));
        }
        Ok(())
    }

    /// Credits the block reward and computes the post-block roots
    fn finalize_state(&self, ledger: &mut LedgerState, proposer: Address) -> Result<(H256, H256)> {
        ledger.credit(proposer, Policy::BLOCK_REWARD)?;
        let state_root = self.committer.state_root(ledger)?;
        let agent_root = self.committer.agent_root(ledger)?;
        Ok((state_root, agent_root))
    }

    async fn announce(&self, block: Arc<Block>) {
        if let Some(sender) = self.announcer.read().await.as_ref() {
            // No subscribers is not an error
            let _ = sender.send(block);
        }
    }
}

/// Wall-clock milliseconds, kept strictly after the parent block
fn next_timestamp(parent: Timestamp) -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(parent.saturating_add(1))
}
