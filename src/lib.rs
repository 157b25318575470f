// Agent chain node library
// Ledger, admission pool, execution engine, validator registry and block producer

pub mod primitives;
pub mod crypto;
pub mod blockchain;
pub mod state;
pub mod mempool;
pub mod execution;
pub mod consensus;
pub mod config;
pub mod node;

// Re-export key types for easy access
pub use primitives::{
    primitives::*,
    error::*,
};

pub use blockchain::{
    AgentIdentity, AgentMessage, Block, BlockHeader, Capability, InferenceReceipt, MessageType,
    Transaction, TransactionType, Validator, ValidatorRegistry,
};

pub use state::{Account, AgentRecord, Ledger, LedgerSnapshot, LedgerState, StateCommitter};
pub use mempool::{AdmissionPool, TieBreak};
pub use execution::{
    ExecutionContext, ExecutionEngine, GasCosts, NoncePolicy, Opcode, Precompile, ReceiptVerifier,
};
pub use consensus::{
    BatchSource, BlockProducer, BlockSigner, PoolBatches, ProducerConfig, ProducerState,
    SignatureVerifier,
};
pub use config::{GenesisValidator, NodeConfig};
pub use node::{Node, NodeApi};

pub use crypto::{KeyPair, PrivateKey, PublicKey, Signature};
