// Error taxonomy for admission, execution, consensus and registration
use thiserror::Error;

use super::primitives::{Address, Balance, Gas, H256, Height};

pub type Result<T> = std::result::Result<T, ChainError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    // Admission
    #[error("Transaction pool is full")]
    PoolFull,

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(H256),

    // Execution
    #[error("Out of gas: used {used}, requested {requested}, limit {limit}")]
    OutOfGas { used: Gas, requested: Gas, limit: Gas },

    #[error("Insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: Balance, need: Balance },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Agent already registered: {0}")]
    AgentAlreadyRegistered(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Execution reverted")]
    ExecutionReverted,

    #[error("Invalid opcode: 0x{0:02x}")]
    InvalidOpcode(u8),

    #[error("Stack underflow")]
    StackUnderflow,

    #[error("Stale nonce: account is at {expected}, transaction has {got}")]
    StaleNonce { expected: u64, got: u64 },

    // Consensus
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Unknown validator: {0}")]
    UnknownValidator(Address),

    // Validator registration
    #[error("Stake {stake} below minimum {minimum}")]
    BelowMinimumStake { stake: Balance, minimum: Balance },

    // Plumbing
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),
}

/// Coarse grouping used by callers to decide how a failure is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected before execution, reported to the submitter
    Admission,
    /// Scoped to a single transaction, which is dropped from the block
    Execution,
    /// Raised while validating an externally proposed block
    Consensus,
    Registration,
    Internal,
}

impl ChainError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ChainError::PoolFull | ChainError::DuplicateTransaction(_) => ErrorClass::Admission,
            ChainError::OutOfGas { .. }
            | ChainError::InsufficientBalance { .. }
            | ChainError::InvalidOperation(_)
            | ChainError::AgentAlreadyRegistered(_)
            | ChainError::AgentNotFound(_)
            | ChainError::ExecutionReverted
            | ChainError::InvalidOpcode(_)
            | ChainError::StackUnderflow
            | ChainError::StaleNonce { .. } => ErrorClass::Execution,
            ChainError::InvalidBlock(_)
            | ChainError::InvalidSignature
            | ChainError::UnknownValidator(_) => ErrorClass::Consensus,
            ChainError::BelowMinimumStake { .. } => ErrorClass::Registration,
            ChainError::Serialization(_)
            | ChainError::Crypto(_)
            | ChainError::Config(_)
            | ChainError::Lifecycle(_) => ErrorClass::Internal,
        }
    }

    pub(crate) fn height_mismatch(expected: Height, got: Height) -> Self {
        ChainError::InvalidBlock(format!("expected height {}, got {}", expected, got))
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Config(err.to_string())
    }
}

impl From<crate::crypto::CryptoError> for ChainError {
    fn from(err: crate::crypto::CryptoError) -> Self {
        ChainError::Crypto(err.to_string())
    }
}
