// State commitments published in block headers
use serde::Serialize;
use std::collections::BTreeMap;

use crate::blockchain::{AgentMessage, InferenceReceipt};
use crate::primitives::{hash_json, Address, Result, H256};
use super::ledger::{Account, LedgerState};

/// Storage backends compute the roots that go into a block header. A
/// Merkelized backend would implement this over its trie; the default hashes
/// the canonical JSON encoding of the ordered maps.
pub trait StateCommitter: Send + Sync {
    /// Commitment over accounts, the message log and accepted receipts
    fn state_root(&self, state: &LedgerState) -> Result<H256>;

    /// Commitment over agent records
    fn agent_root(&self, state: &LedgerState) -> Result<H256>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DigestCommitter;

#[derive(Serialize)]
struct StateView<'a> {
    accounts: &'a BTreeMap<Address, Account>,
    messages: &'a [AgentMessage],
    receipts: &'a [InferenceReceipt],
}

impl StateCommitter for DigestCommitter {
    fn state_root(&self, state: &LedgerState) -> Result<H256> {
        hash_json(&StateView {
            accounts: state.accounts(),
            messages: state.messages(),
            receipts: state.receipts(),
        })
    }

    fn agent_root(&self, state: &LedgerState) -> Result<H256> {
        hash_json(state.agents())
    }
}
