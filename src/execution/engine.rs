// Transaction execution: gas metering, type dispatch and per-transaction rollback
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::blockchain::{
    AgentIdentity, AgentMessage, ContractCall, ContractDeployment, InferenceReceipt, Transaction,
    TransactionType,
};
use crate::primitives::{Address, ChainError, DigestWriter, Gas, Height, Result};
use crate::state::{Ledger, LedgerState};
use super::context::ExecutionContext;
use super::gas::GasCosts;
use super::vm::{AgentVm, Precompile};

/// Cryptographic check of an inference receipt against a registered
/// compute-provider key. Runs after the structural checks pass.
pub trait ReceiptVerifier: Send + Sync {
    fn verify(&self, receipt: &InferenceReceipt, state: &LedgerState) -> Result<()>;
}

/// Accepts every structurally valid receipt
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralReceiptVerifier;

impl ReceiptVerifier for StructuralReceiptVerifier {
    fn verify(&self, _receipt: &InferenceReceipt, _state: &LedgerState) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub gas_used: Gas,
    /// Value returned by a contract call, if any
    pub output: Option<Vec<u8>>,
}

/// Address of a contract deployed by `deployer` at `nonce`
pub fn contract_address(deployer: &Address, nonce: u64) -> Address {
    let mut writer = DigestWriter::new("agc/contract");
    writer.put_bytes(deployer.as_bytes()).put_u64(nonce);
    Address::from_public_key(writer.finish().as_bytes())
}

/// How the engine treats transaction nonces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoncePolicy {
    /// Nonces are bumped on success but never checked
    #[default]
    Unchecked,
    /// A nonce below the sender's account nonce fails with `StaleNonce`, and
    /// success moves the account nonce past the transaction's
    RejectStale,
}

pub struct ExecutionEngine {
    vm: AgentVm,
    receipt_verifier: Arc<dyn ReceiptVerifier>,
    nonce_policy: NoncePolicy,
}

impl ExecutionEngine {
    pub fn new() -> Self {
        let receipt_verifier: Arc<dyn ReceiptVerifier> = Arc::new(StructuralReceiptVerifier);
        Self {
            vm: AgentVm::new(receipt_verifier.clone()),
            receipt_verifier,
            nonce_policy: NoncePolicy::default(),
        }
    }

    pub fn with_nonce_policy(mut self, nonce_policy: NoncePolicy) -> Self {
        self.nonce_policy = nonce_policy;
        self
    }

    pub fn nonce_policy(&self) -> NoncePolicy {
        self.nonce_policy
    }

    pub fn with_receipt_verifier(mut self, receipt_verifier: Arc<dyn ReceiptVerifier>) -> Self {
        self.vm.set_receipt_verifier(receipt_verifier.clone());
        self.receipt_verifier = receipt_verifier;
        self
    }

    /// Adds an agent-specific operation to the instruction stream
    pub fn register_precompile(&mut self, opcode: u8, precompile: Arc<dyn Precompile>) -> Result<()> {
        self.vm.register(opcode, precompile)
    }

    pub fn vm(&self) -> &AgentVm {
        &self.vm
    }

    /// Applies one transaction. Either every mutation is kept and the sender's
    /// nonce advances, or the ledger is left exactly as it was.
    ///
    /// Under `NoncePolicy::Unchecked` an already included transaction can be
    /// resubmitted and executes again: the pool only deduplicates pending
    /// transactions. `NoncePolicy::RejectStale` closes that replay.
    pub fn apply_transaction(
        &self,
        state: &mut LedgerState,
        tx: &Transaction,
        height: Height,
    ) -> Result<ExecutionOutcome> {
        if self.nonce_policy == NoncePolicy::RejectStale {
            let expected = state.account(&tx.from).nonce;
            if tx.nonce < expected {
                return Err(ChainError::StaleNonce { expected, got: tx.nonce });
            }
        }

        let checkpoint = state.checkpoint();
        let mut ctx = ExecutionContext::new(state, tx.from, tx.gas_limit, height);

        match self.dispatch(&mut ctx, tx) {
            Ok(output) => {
                let gas_used = ctx.gas_used;
                match self.nonce_policy {
                    NoncePolicy::Unchecked => state.increment_nonce(tx.from),
                    NoncePolicy::RejectStale => state.advance_nonce(tx.from, tx.nonce.saturating_add(1)),
                }
                state.commit(checkpoint);
                Ok(ExecutionOutcome { gas_used, output })
            }
            Err(err) => {
                state.revert_to(checkpoint);
                debug!("Transaction {} failed: {}", tx.hash(), err);
                Err(err)
            }
        }
    }

    /// Locks the ledger for the duration of one transaction
    pub async fn apply(&self, ledger: &Ledger, tx: &Transaction, height: Height) -> Result<ExecutionOutcome> {
        let mut state = ledger.write().await;
        self.apply_transaction(&mut state, tx, height)
    }

    fn dispatch(&self, ctx: &mut ExecutionContext<'_>, tx: &Transaction) -> Result<Option<Vec<u8>>> {
        match tx.tx_type {
            TransactionType::Transfer => {
                ctx.use_gas(GasCosts::TRANSFER)?;
                let to = recipient(tx)?;
                ctx.state.transfer(tx.from, to, tx.value)?;
                Ok(None)
            }
            TransactionType::AgentRegister => {
                ctx.use_gas(GasCosts::AGENT_REGISTER)?;
                let identity: AgentIdentity = tx.decode_payload()?;
                identity.validate()?;
                ctx.state.register_agent(identity, ctx.height)?;
                Ok(None)
            }
            TransactionType::AgentMessage => {
                ctx.use_gas(GasCosts::AGENT_MESSAGE)?;
                let message: AgentMessage = tx.decode_payload()?;
                ctx.state.record_message(message);
                Ok(None)
            }
            TransactionType::InferenceReceipt => {
                ctx.use_gas(GasCosts::INFERENCE_RECEIPT)?;
                let receipt: InferenceReceipt = tx.decode_payload()?;
                receipt.validate_structure()?;
                self.receipt_verifier.verify(&receipt, ctx.state)?;
                ctx.state.record_receipt(receipt);
                Ok(None)
            }
            TransactionType::DeployContract => {
                let deployment: ContractDeployment = tx.decode_payload()?;
                ctx.use_gas(GasCosts::deployment(deployment.code.len()))?;
                if deployment.code.is_empty() {
                    return Err(ChainError::InvalidOperation("empty contract code".to_string()));
                }
                let address = contract_address(&tx.from, tx.nonce);
                if ctx.state.code(&address).is_some() {
                    return Err(ChainError::InvalidOperation(format!(
                        "contract already deployed at {}",
                        address
                    )));
                }
                ctx.state.set_code(address, deployment.code);
                debug!("Deployed contract at {}", address);
                Ok(Some(address.as_bytes().to_vec()))
            }
            TransactionType::CallContract => {
                ctx.use_gas(GasCosts::CALL_BASE)?;
                let contract = recipient(tx)?;
                let code = ctx
                    .state
                    .code(&contract)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| ChainError::InvalidOperation(format!("no contract at {}", contract)))?;
                let call: ContractCall = tx.decode_payload()?;
                self.vm.execute(ctx, &code, call.operands)
            }
            TransactionType::AgentDelegate
            | TransactionType::ValidatorStake
            | TransactionType::ValidatorUnstake => Err(ChainError::InvalidOperation(format!(
                "{} is not supported",
                tx.tx_type
            ))),
        }
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn recipient(tx: &Transaction) -> Result<Address> {
    tx.to
        .ok_or_else(|| ChainError::InvalidOperation(format!("{} requires a recipient", tx.tx_type)))
}
