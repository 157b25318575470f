// World state: the ledger and its commitment backend
pub mod commitment;
pub mod ledger;

pub use commitment::{DigestCommitter, StateCommitter};
pub use ledger::{Account, AgentRecord, Checkpoint, Ledger, LedgerSnapshot, LedgerState};
