// Gas schedule
use crate::primitives::Gas;

/// Gas cost constants for transactions and opcodes
pub struct GasCosts;

impl GasCosts {
    // Transaction types
    pub const TRANSFER: Gas = 21_000;
    pub const AGENT_REGISTER: Gas = 200_000;
    pub const AGENT_MESSAGE: Gas = 50_000;
    pub const INFERENCE_RECEIPT: Gas = 100_000;

    // Contracts
    pub const DEPLOY_BASE: Gas = 32_000;
    pub const DEPLOY_PER_BYTE: Gas = 200;
    pub const CALL_BASE: Gas = 700;

    // Precompiles (same price as the transaction-level operation)
    pub const OP_AGENT_REGISTER: Gas = Self::AGENT_REGISTER;
    pub const OP_AGENT_SEND: Gas = Self::AGENT_MESSAGE;
    pub const OP_INFER_PROVE: Gas = Self::INFERENCE_RECEIPT;
    pub const OP_INFER_VERIFY: Gas = 3_000;
    pub const OP_TOKEN_TRANSFER: Gas = Self::TRANSFER;

    // Structural opcodes are free
    pub const OP_STOP: Gas = 0;
    pub const OP_RETURN: Gas = 0;
    pub const OP_REVERT: Gas = 0;

    /// Payload-dependent cost of deploying `code_len` bytes
    pub fn deployment(code_len: usize) -> Gas {
        Self::DEPLOY_BASE.saturating_add(Self::DEPLOY_PER_BYTE.saturating_mul(code_len as Gas))
    }
}
