// Block structures and header hashing
use serde::{Deserialize, Serialize};

use crate::primitives::{Address, DigestWriter, Height, Policy, Timestamp, H256};
use super::transaction::Transaction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub height: Height,
    pub timestamp: Timestamp,
    pub previous_hash: H256,
    pub state_root: H256,
    pub transaction_root: H256,
    pub agent_root: H256,
    pub proposer: Address,
}

impl BlockHeader {
    pub fn hash(&self) -> H256 {
        let mut writer = DigestWriter::new("agc/header");
        writer
            .put_u32(self.version)
            .put_u64(self.height)
            .put_i64(self.timestamp)
            .put_bytes(self.previous_hash.as_bytes())
            .put_bytes(self.state_root.as_bytes())
            .put_bytes(self.transaction_root.as_bytes())
            .put_bytes(self.agent_root.as_bytes())
            .put_bytes(self.proposer.as_bytes());
        writer.finish()
    }
}

/// A produced block. The proposer signature covers the header hash and is
/// therefore not part of the block identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    #[serde(with = "hex::serde")]
    pub proposer_signature: Vec<u8>,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn genesis() -> Self {
        Self {
            header: BlockHeader {
                version: Policy::BLOCK_VERSION,
                height: Policy::GENESIS_HEIGHT,
                timestamp: Policy::GENESIS_TIMESTAMP,
                previous_hash: H256::zero(),
                state_root: H256::zero(),
                transaction_root: Self::compute_transaction_root(&[]),
                agent_root: H256::zero(),
                proposer: Address::zero(),
            },
            proposer_signature: Vec::new(),
            transactions: Vec::new(),
        }
    }

    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    pub fn height(&self) -> Height {
        self.header.height
    }

    pub fn timestamp(&self) -> Timestamp {
        self.header.timestamp
    }

    pub fn previous_hash(&self) -> &H256 {
        &self.header.previous_hash
    }

    pub fn proposer(&self) -> &Address {
        &self.header.proposer
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Commitment over the ordered transaction hashes
    pub fn compute_transaction_root(transactions: &[Transaction]) -> H256 {
        let mut writer = DigestWriter::new("agc/txroot");
        writer.put_u64(transactions.len() as u64);
        for tx in transactions {
            writer.put_bytes(tx.hash().as_bytes());
        }
        writer.finish()
    }

    /// Checks that the declared transaction root matches the body
    pub fn has_consistent_body(&self) -> bool {
        Self::compute_transaction_root(&self.transactions) == self.header.transaction_root
    }
}
