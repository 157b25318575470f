// Authoritative account and agent state
//
// `LedgerState` holds the maps and an undo journal; `Ledger` wraps it in a
// readers-writer lock so reads run concurrently and writes are serialized.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::blockchain::{AgentIdentity, AgentMessage, InferenceReceipt};
use crate::primitives::{Address, Balance, ChainError, Height, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub balance: Balance,
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Vec<u8>>,
}

impl Account {
    pub fn empty(address: Address) -> Self {
        Self {
            address,
            balance: 0,
            nonce: 0,
            code: None,
        }
    }

    pub fn is_contract(&self) -> bool {
        self.code.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub identity: AgentIdentity,
    pub registered_at_height: Height,
    pub message_count: u64,
    pub active: bool,
}

impl AgentRecord {
    pub fn identifier(&self) -> &str {
        &self.identity.identifier
    }
}

/// Self-describing, point-in-time copy of the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: u32,
    pub accounts: BTreeMap<Address, Account>,
    pub agents: BTreeMap<String, AgentRecord>,
    pub messages: Vec<AgentMessage>,
    pub receipts: Vec<InferenceReceipt>,
}

impl LedgerSnapshot {
    pub const VERSION: u32 = 1;

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: LedgerSnapshot = serde_json::from_slice(bytes)?;
        if snapshot.version != Self::VERSION {
            return Err(ChainError::Serialization(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }
}

#[derive(Debug, Clone)]
enum JournalEntry {
    Account { address: Address, previous: Option<Account> },
    Agent { identifier: String, previous: Option<AgentRecord> },
    MessageAppended,
    ReceiptAppended,
}

#[derive(Debug, Default)]
struct Journal {
    entries: Vec<JournalEntry>,
    depth: usize,
}

/// Position in the undo journal. Must be handed back to `commit` or `revert_to`.
#[must_use]
#[derive(Debug)]
pub struct Checkpoint {
    mark: usize,
}

#[derive(Debug, Default)]
pub struct LedgerState {
    accounts: BTreeMap<Address, Account>,
    agents: BTreeMap<String, AgentRecord>,
    messages: Vec<AgentMessage>,
    receipts: Vec<InferenceReceipt>,
    journal: Journal,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            accounts: snapshot.accounts,
            agents: snapshot.agents,
            messages: snapshot.messages,
            receipts: snapshot.receipts,
            journal: Journal::default(),
        }
    }

    // Journal

    /// Opens a (possibly nested) checkpoint; mutations are recorded until the
    /// outermost checkpoint is committed.
    pub fn checkpoint(&mut self) -> Checkpoint {
        self.journal.depth += 1;
        Checkpoint {
            mark: self.journal.entries.len(),
        }
    }

    pub fn commit(&mut self, checkpoint: Checkpoint) {
        debug_assert!(checkpoint.mark <= self.journal.entries.len());
        self.close_checkpoint();
    }

    /// Undoes every mutation made since `checkpoint` was taken
    pub fn revert_to(&mut self, checkpoint: Checkpoint) {
        while self.journal.entries.len() > checkpoint.mark {
            let Some(entry) = self.journal.entries.pop() else {
                break;
            };
            match entry {
                JournalEntry::Account { address, previous } => match previous {
                    Some(account) => {
                        self.accounts.insert(address, account);
                    }
                    None => {
                        self.accounts.remove(&address);
                    }
                },
                JournalEntry::Agent { identifier, previous } => match previous {
                    Some(record) => {
                        self.agents.insert(identifier, record);
                    }
                    None => {
                        self.agents.remove(&identifier);
                    }
                },
                JournalEntry::MessageAppended => {
                    self.messages.pop();
                }
                JournalEntry::ReceiptAppended => {
                    self.receipts.pop();
                }
            }
        }
        self.close_checkpoint();
    }

    fn close_checkpoint(&mut self) {
        self.journal.depth = self.journal.depth.saturating_sub(1);
        if self.journal.depth == 0 {
            self.journal.entries.clear();
        }
    }

    fn record(&mut self, entry: JournalEntry) {
        if self.journal.depth > 0 {
            self.journal.entries.push(entry);
        }
    }

    fn account_mut(&mut self, address: Address) -> &mut Account {
        let previous = self.accounts.get(&address).cloned();
        self.record(JournalEntry::Account { address, previous });
        self.accounts
            .entry(address)
            .or_insert_with(|| Account::empty(address))
    }

    fn agent_mut(&mut self, identifier: &str) -> Option<&mut AgentRecord> {
        let previous = self.agents.get(identifier).cloned()?;
        self.record(JournalEntry::Agent {
            identifier: identifier.to_string(),
            previous: Some(previous),
        });
        self.agents.get_mut(identifier)
    }

    // Accounts

    /// Returns the account or a zero-balance default; never fails
    pub fn account(&self, address: &Address) -> Account {
        self.accounts
            .get(address)
            .cloned()
            .unwrap_or_else(|| Account::empty(*address))
    }

    pub fn balance(&self, address: &Address) -> Balance {
        self.accounts.get(address).map(|a| a.balance).unwrap_or(0)
    }

    pub fn set_balance(&mut self, address: Address, value: Balance) {
        self.account_mut(address).balance = value;
    }

    pub fn credit(&mut self, address: Address, value: Balance) -> Result<()> {
        let updated = self
            .balance(&address)
            .checked_add(value)
            .ok_or_else(|| ChainError::InvalidOperation(format!("balance overflow for {}", address)))?;
        self.account_mut(address).balance = updated;
        Ok(())
    }

    /// Moves `value` from one account to another. Both sides are validated
    /// before either balance changes.
    pub fn transfer(&mut self, from: Address, to: Address, value: Balance) -> Result<()> {
        let have = self.balance(&from);
        if have < value {
            return Err(ChainError::InsufficientBalance { have, need: value });
        }
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance(&to)
            .checked_add(value)
            .ok_or_else(|| ChainError::InvalidOperation(format!("balance overflow for {}", to)))?;

        self.account_mut(from).balance = have - value;
        self.account_mut(to).balance = credited;
        Ok(())
    }

    pub fn increment_nonce(&mut self, address: Address) {
        let account = self.account_mut(address);
        account.nonce = account.nonce.saturating_add(1);
    }

    /// Moves the nonce forward to `next`; never moves it back
    pub fn advance_nonce(&mut self, address: Address, next: u64) {
        let account = self.account_mut(address);
        account.nonce = account.nonce.max(next);
    }

    pub fn set_code(&mut self, address: Address, code: Vec<u8>) {
        self.account_mut(address).code = Some(code);
    }

    pub fn code(&self, address: &Address) -> Option<&[u8]> {
        self.accounts.get(address).and_then(|a| a.code.as_deref())
    }

    /// Sum of all balances
    pub fn total_supply(&self) -> Balance {
        self.accounts
            .values()
            .fold(0, |acc: Balance, a| acc.saturating_add(a.balance))
    }

    pub fn accounts(&self) -> &BTreeMap<Address, Account> {
        &self.accounts
    }

    // Agents

    pub fn register_agent(&mut self, identity: AgentIdentity, height: Height) -> Result<()> {
        if self.agents.contains_key(&identity.identifier) {
            return Err(ChainError::AgentAlreadyRegistered(identity.identifier));
        }
        let identifier = identity.identifier.clone();
        self.record(JournalEntry::Agent {
            identifier: identifier.clone(),
            previous: None,
        });
        self.agents.insert(
            identifier,
            AgentRecord {
                identity,
                registered_at_height: height,
                message_count: 0,
                active: true,
            },
        );
        Ok(())
    }

    pub fn agent(&self, identifier: &str) -> Result<AgentRecord> {
        self.agents
            .get(identifier)
            .cloned()
            .ok_or_else(|| ChainError::AgentNotFound(identifier.to_string()))
    }

    pub fn agents(&self) -> &BTreeMap<String, AgentRecord> {
        &self.agents
    }

    /// Appends to the message log. The sender's counter only moves if the
    /// sender is a registered agent; the log itself is authoritative.
    pub fn record_message(&mut self, message: AgentMessage) {
        if let Some(record) = self.agent_mut(&message.from) {
            record.message_count = record.message_count.saturating_add(1);
        } else {
            debug!("Message from unregistered agent {}", message.from);
        }
        self.messages.push(message);
        self.record(JournalEntry::MessageAppended);
    }

    pub fn messages(&self) -> &[AgentMessage] {
        &self.messages
    }

    pub fn messages_from(&self, identifier: &str) -> Vec<AgentMessage> {
        self.messages
            .iter()
            .filter(|m| m.from == identifier)
            .cloned()
            .collect()
    }

    pub fn record_receipt(&mut self, receipt: InferenceReceipt) {
        self.receipts.push(receipt);
        self.record(JournalEntry::ReceiptAppended);
    }

    pub fn receipts(&self) -> &[InferenceReceipt] {
        &self.receipts
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            version: LedgerSnapshot::VERSION,
            accounts: self.accounts.clone(),
            agents: self.agents.clone(),
            messages: self.messages.clone(),
            receipts: self.receipts.clone(),
        }
    }
}

/// Shared handle to the ledger
#[derive(Debug, Default)]
pub struct Ledger {
    state: RwLock<LedgerState>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            state: RwLock::new(LedgerState::from_snapshot(snapshot)),
        }
    }

    /// Rebuilds a ledger from bytes produced by [`Ledger::snapshot`]
    pub fn restore(bytes: &[u8]) -> Result<Self> {
        Ok(Self::from_snapshot(LedgerSnapshot::from_bytes(bytes)?))
    }

    /// Shared read access; never observes a half-applied write
    pub async fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().await
    }

    /// Exclusive access for block execution
    pub async fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().await
    }

    pub async fn get_account(&self, address: &Address) -> Account {
        self.state.read().await.account(address)
    }

    pub async fn set_balance(&self, address: Address, value: Balance) {
        self.state.write().await.set_balance(address, value);
    }

    pub async fn transfer(&self, from: Address, to: Address, value: Balance) -> Result<()> {
        self.state.write().await.transfer(from, to, value)
    }

    pub async fn register_agent(&self, identity: AgentIdentity, height: Height) -> Result<()> {
        self.state.write().await.register_agent(identity, height)
    }

    pub async fn get_agent(&self, identifier: &str) -> Result<AgentRecord> {
        self.state.read().await.agent(identifier)
    }

    pub async fn record_message(&self, message: AgentMessage) {
        self.state.write().await.record_message(message);
    }

    pub async fn messages_from(&self, identifier: &str) -> Vec<AgentMessage> {
        self.state.read().await.messages_from(identifier)
    }

    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages().len()
    }

    pub async fn receipts(&self) -> Vec<InferenceReceipt> {
        self.state.read().await.receipts().to_vec()
    }

    pub async fn total_supply(&self) -> Balance {
        self.state.read().await.total_supply()
    }

    /// Consistent point-in-time copy of all accounts and agents
    pub async fn snapshot_state(&self) -> LedgerSnapshot {
        self.state.read().await.snapshot()
    }

    /// Serialized snapshot (JSON)
    pub async fn snapshot(&self) -> Result<Vec<u8>> {
        // Copy under the read lock, serialize after releasing it
        let snapshot = self.snapshot_state().await;
        snapshot.to_bytes()
    }
}
