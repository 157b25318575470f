// Blockchain data model: blocks, transactions and the validator registry

pub mod block;
pub mod transaction;
pub mod validator_set;

pub use block::{Block, BlockHeader};
pub use transaction::{
    AgentIdentity, AgentMessage, Capability, ContractCall, ContractDeployment, InferenceReceipt,
    MessageType, Transaction, TransactionType,
};
pub use validator_set::{voting_power, Validator, ValidatorRegistry};
