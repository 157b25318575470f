// Agent virtual machine: single-byte opcodes over an operand stack
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::blockchain::transaction::decode_operand;
use crate::blockchain::{AgentIdentity, AgentMessage, InferenceReceipt};
use crate::primitives::{Address, Balance, ChainError, Gas, Policy, Result};
use super::context::ExecutionContext;
use super::engine::ReceiptVerifier;
use super::gas::GasCosts;

/// Built-in instruction set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Stop = 0x00,
    AgentRegister = 0x10,
    AgentSend = 0x11,
    AgentDelegate = 0x12,
    InferProve = 0x20,
    InferVerify = 0x21,
    TokenTransfer = 0x30,
    Return = 0xF3,
    Revert = 0xFD,
}

impl Opcode {
    pub const ALL: [Opcode; 9] = [
        Opcode::Stop,
        Opcode::AgentRegister,
        Opcode::AgentSend,
        Opcode::AgentDelegate,
        Opcode::InferProve,
        Opcode::InferVerify,
        Opcode::TokenTransfer,
        Opcode::Return,
        Opcode::Revert,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.byte() == byte)
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn gas_cost(self) -> Gas {
        match self {
            Opcode::Stop => GasCosts::OP_STOP,
            Opcode::AgentRegister => GasCosts::OP_AGENT_REGISTER,
            Opcode::AgentSend => GasCosts::OP_AGENT_SEND,
            Opcode::AgentDelegate => 0,
            Opcode::InferProve => GasCosts::OP_INFER_PROVE,
            Opcode::InferVerify => GasCosts::OP_INFER_VERIFY,
            Opcode::TokenTransfer => GasCosts::OP_TOKEN_TRANSFER,
            Opcode::Return => GasCosts::OP_RETURN,
            Opcode::Revert => GasCosts::OP_REVERT,
        }
    }
}

/// Extension point for agent-specific operations outside the built-in set.
///
/// A precompile pops `arity()` operands (0 or 1) and pushes at most one
/// result. Gas is charged before `call` runs.
pub trait Precompile: Send + Sync {
    fn name(&self) -> &str;

    fn gas_cost(&self) -> Gas;

    /// Operands taken from the stack. `call` sees `None` when this is 0.
    fn arity(&self) -> usize {
        1
    }

    fn call(&self, ctx: &mut ExecutionContext<'_>, operand: Option<Vec<u8>>) -> Result<Option<Vec<u8>>>;
}

/// Operand for the token transfer opcode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransferArgs {
    pub to: Address,
    pub value: Balance,
}

struct OperandStack {
    items: Vec<Vec<u8>>,
}

impl OperandStack {
    fn new(operands: Vec<Vec<u8>>) -> Result<Self> {
        if operands.len() > Policy::MAX_STACK_DEPTH {
            return Err(ChainError::InvalidOperation("stack overflow".to_string()));
        }
        Ok(Self { items: operands })
    }

    fn push(&mut self, value: Vec<u8>) -> Result<()> {
        if self.items.len() >= Policy::MAX_STACK_DEPTH {
            return Err(ChainError::InvalidOperation("stack overflow".to_string()));
        }
        self.items.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Option<Vec<u8>> {
        self.items.pop()
    }
}

fn required(operand: Option<Vec<u8>>) -> Result<Vec<u8>> {
    operand.ok_or(ChainError::StackUnderflow)
}

pub struct AgentVm {
    extensions: BTreeMap<u8, Arc<dyn Precompile>>,
    receipt_verifier: Arc<dyn ReceiptVerifier>,
}

impl AgentVm {
    pub fn new(receipt_verifier: Arc<dyn ReceiptVerifier>) -> Self {
        Self {
            extensions: BTreeMap::new(),
            receipt_verifier,
        }
    }

    pub(crate) fn set_receipt_verifier(&mut self, receipt_verifier: Arc<dyn ReceiptVerifier>) {
        self.receipt_verifier = receipt_verifier;
    }

    /// Registers a handler on an opcode byte not claimed by the built-in set
    pub fn register(&mut self, opcode: u8, precompile: Arc<dyn Precompile>) -> Result<()> {
        if let Some(builtin) = Opcode::from_byte(opcode) {
            return Err(ChainError::InvalidOperation(format!(
                "opcode 0x{:02x} is reserved for {:?}",
                opcode, builtin
            )));
        }
        if precompile.arity() > 1 {
            return Err(ChainError::InvalidOperation(format!(
                "precompile {} takes {} operands, at most 1 supported",
                precompile.name(),
                precompile.arity()
            )));
        }
        if let Some(existing) = self.extensions.get(&opcode) {
            return Err(ChainError::InvalidOperation(format!(
                "opcode 0x{:02x} already registered to {}",
                opcode,
                existing.name()
            )));
        }
        info!("Registered precompile {} at 0x{:02x}", precompile.name(), opcode);
        self.extensions.insert(opcode, precompile);
        Ok(())
    }

    pub fn is_registered(&self, opcode: u8) -> bool {
        Opcode::from_byte(opcode).is_some() || self.extensions.contains_key(&opcode)
    }

    /// Runs `code` with `operands` as the initial stack (last operand on top).
    ///
    /// Returns the value yielded by `Return`, or `None` for `Stop` or running
    /// off the end. The caller owns rollback: any error means this call's
    /// mutations must be discarded.
    pub fn execute(
        &self,
        ctx: &mut ExecutionContext<'_>,
        code: &[u8],
        operands: Vec<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>> {
        let mut stack = OperandStack::new(operands)?;

        for &byte in code {
            match Opcode::from_byte(byte) {
                Some(Opcode::Stop) => return Ok(None),
                Some(Opcode::Return) => {
                    return stack.pop().map(Some).ok_or(ChainError::StackUnderflow);
                }
                Some(Opcode::Revert) => return Err(ChainError::ExecutionReverted),
                Some(op) => {
                    ctx.use_gas(op.gas_cost())?;
                    let operand = stack.pop();
                    if let Some(result) = self.call_builtin(op, ctx, operand)? {
                        stack.push(result)?;
                    }
                }
                None => {
                    let precompile = self
                        .extensions
                        .get(&byte)
                        .ok_or(ChainError::InvalidOpcode(byte))?;
                    ctx.use_gas(precompile.gas_cost())?;
                    let operand = match precompile.arity() {
                        0 => None,
                        _ => stack.pop(),
                    };
                    if let Some(result) = precompile.call(ctx, operand)? {
                        stack.push(result)?;
                    }
                }
            }
        }

        Ok(None)
    }

    fn call_builtin(
        &self,
        op: Opcode,
        ctx: &mut ExecutionContext<'_>,
        operand: Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>> {
        match op {
            Opcode::AgentRegister => {
                let identity: AgentIdentity = decode_operand(&required(operand)?)?;
                identity.validate()?;
                ctx.state.register_agent(identity, ctx.height)?;
                Ok(None)
            }
            Opcode::AgentSend => {
                let message: AgentMessage = decode_operand(&required(operand)?)?;
                ctx.state.record_message(message);
                Ok(None)
            }
            Opcode::InferProve => {
                let receipt: InferenceReceipt = decode_operand(&required(operand)?)?;
                receipt.validate_structure()?;
                self.receipt_verifier.verify(&receipt, ctx.state)?;
                debug!("Inference proof from {} accepted by precompile", ctx.caller);
                ctx.state.record_receipt(receipt);
                Ok(Some(vec![1]))
            }
            Opcode::InferVerify => {
                let receipt: InferenceReceipt = decode_operand(&required(operand)?)?;
                let valid = receipt.validate_structure().is_ok()
                    && self.receipt_verifier.verify(&receipt, ctx.state).is_ok();
                Ok(Some(vec![u8::from(valid)]))
            }
            Opcode::TokenTransfer => {
                let args: TokenTransferArgs = decode_operand(&required(operand)?)?;
                ctx.state.transfer(ctx.caller, args.to, args.value)?;
                Ok(None)
            }
            Opcode::AgentDelegate => Err(ChainError::InvalidOperation(
                "agent delegation is not supported".to_string(),
            )),
            Opcode::Stop | Opcode::Return | Opcode::Revert => Err(ChainError::InvalidOperation(
                format!("{:?} is structural", op),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::engine::StructuralReceiptVerifier;
    use crate::state::LedgerState;

    struct Echo;

    impl Precompile for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn gas_cost(&self) -> Gas {
            10
        }

        fn call(&self, _ctx: &mut ExecutionContext<'_>, operand: Option<Vec<u8>>) -> Result<Option<Vec<u8>>> {
            Ok(operand.map(|mut bytes| {
                bytes.reverse();
                bytes
            }))
        }
    }

    /// Takes no operand and credits the caller one unit
    struct Faucet;

    impl Precompile for Faucet {
        fn name(&self) -> &str {
            "faucet"
        }

        fn gas_cost(&self) -> Gas {
            5
        }

        fn arity(&self) -> usize {
            0
        }

        fn call(&self, ctx: &mut ExecutionContext<'_>, operand: Option<Vec<u8>>) -> Result<Option<Vec<u8>>> {
            assert!(operand.is_none());
            ctx.state.credit(ctx.caller, 1)?;
            Ok(None)
        }
    }

    struct Pair;

    impl Precompile for Pair {
        fn name(&self) -> &str {
            "pair"
        }

        fn gas_cost(&self) -> Gas {
            1
        }

        fn arity(&self) -> usize {
            2
        }

        fn call(&self, _ctx: &mut ExecutionContext<'_>, _operand: Option<Vec<u8>>) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    fn vm() -> AgentVm {
        AgentVm::new(Arc::new(StructuralReceiptVerifier))
    }

    fn run(vm: &AgentVm, state: &mut LedgerState, code: &[u8], operands: Vec<Vec<u8>>, gas: Gas) -> Result<Option<Vec<u8>>> {
        let mut ctx = ExecutionContext::new(state, Address::from_public_key(b"caller"), gas, 1);
        vm.execute(&mut ctx, code, operands)
    }

    #[test]
    fn test_opcode_bytes() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_byte(op.byte()), Some(op));
        }
        assert_eq!(Opcode::from_byte(0x42), None);
    }

    #[test]
    fn test_structural_instructions() {
        let vm = vm();
        let mut state = LedgerState::new();

        assert_eq!(run(&vm, &mut state, &[0x00], vec![b"x".to_vec()], 0), Ok(None));
        assert_eq!(run(&vm, &mut state, &[0xF3], vec![b"x".to_vec()], 0), Ok(Some(b"x".to_vec())));
        assert_eq!(run(&vm, &mut state, &[0xF3], vec![], 0), Err(ChainError::StackUnderflow));
        assert_eq!(run(&vm, &mut state, &[0xFD], vec![], 0), Err(ChainError::ExecutionReverted));
        assert_eq!(run(&vm, &mut state, &[0x42], vec![], 0), Err(ChainError::InvalidOpcode(0x42)));
        assert_eq!(run(&vm, &mut state, &[], vec![], 0), Ok(None));
    }

    #[test]
    fn test_agent_register_precompile() {
        let vm = vm();
        let mut state = LedgerState::new();
        let identity = AgentIdentity::new(Address::from_public_key(b"owner"), vec![5; 32]);
        let operand = serde_json::to_vec(&identity).unwrap();

        let result = run(&vm, &mut state, &[0x10, 0x00], vec![operand], GasCosts::AGENT_REGISTER);
        assert_eq!(result, Ok(None));
        assert!(state.agent(&identity.identifier).is_ok());
    }

    #[test]
    fn test_precompile_without_operand_underflows() {
        let vm = vm();
        let mut state = LedgerState::new();
        let result = run(&vm, &mut state, &[0x11], vec![], 1_000_000);
        assert_eq!(result, Err(ChainError::StackUnderflow));
    }

    #[test]
    fn test_precompile_gas_is_charged() {
        let vm = vm();
        let mut state = LedgerState::new();
        let identity = AgentIdentity::new(Address::zero(), vec![1]);
        let operand = serde_json::to_vec(&identity).unwrap();

        let result = run(&vm, &mut state, &[0x10], vec![operand], GasCosts::AGENT_REGISTER - 1);
        assert!(matches!(result, Err(ChainError::OutOfGas { .. })));
        assert!(state.agents().is_empty());
    }

    #[test]
    fn test_token_transfer_debits_caller() {
        let vm = vm();
        let mut state = LedgerState::new();
        let caller = Address::from_public_key(b"caller");
        let to = Address::from_public_key(b"to");
        state.set_balance(caller, 100);

        let args = serde_json::to_vec(&TokenTransferArgs { to, value: 40 }).unwrap();
        run(&vm, &mut state, &[0x30], vec![args], GasCosts::TRANSFER).unwrap();

        assert_eq!(state.balance(&caller), 60);
        assert_eq!(state.balance(&to), 40);
    }

    #[test]
    fn test_delegate_is_reserved() {
        let vm = vm();
        let mut state = LedgerState::new();
        let result = run(&vm, &mut state, &[0x12], vec![b"{}".to_vec()], 10);
        assert!(matches!(result, Err(ChainError::InvalidOperation(_))));
    }

    #[test]
    fn test_extension_precompile() {
        let mut vm = vm();
        vm.register(0x50, Arc::new(Echo)).unwrap();
        let mut state = LedgerState::new();

        let result = run(&vm, &mut state, &[0x50, 0xF3], vec![vec![1, 2, 3]], 10);
        assert_eq!(result, Ok(Some(vec![3, 2, 1])));

        let starved = run(&vm, &mut state, &[0x50], vec![vec![1]], 9);
        assert!(matches!(starved, Err(ChainError::OutOfGas { .. })));
    }

    #[test]
    fn test_zero_arity_extension_leaves_stack_alone() {
        let mut vm = vm();
        vm.register(0x53, Arc::new(Faucet)).unwrap();
        let mut state = LedgerState::new();

        let result = run(&vm, &mut state, &[0x53, 0x53, 0xF3], vec![b"keep".to_vec()], 10);
        assert_eq!(result, Ok(Some(b"keep".to_vec())));
        assert_eq!(state.balance(&Address::from_public_key(b"caller")), 2);
    }

    #[test]
    fn test_extension_arity_above_one_rejected() {
        let mut vm = vm();
        assert!(matches!(vm.register(0x54, Arc::new(Pair)), Err(ChainError::InvalidOperation(_))));
        assert!(!vm.is_registered(0x54));
    }

    #[test]
    fn test_extension_cannot_claim_builtin_or_taken_byte() {
        let mut vm = vm();
        assert!(vm.register(0x10, Arc::new(Echo)).is_err());
        vm.register(0x51, Arc::new(Echo)).unwrap();
        assert!(vm.register(0x51, Arc::new(Echo)).is_err());
        assert!(vm.is_registered(0x51));
        assert!(!vm.is_registered(0x52));
    }

    #[test]
    fn test_infer_verify_reports_validity() {
        let vm = vm();
        let mut state = LedgerState::new();
        let mut receipt = InferenceReceipt {
            agent_id: "did:agc:0xabc".to_string(),
            model_hash: vec![1; 32],
            input_hash: vec![2; 32],
            output_hash: vec![3; 32],
            timestamp: 1,
            prover_signature: vec![4; 64],
        };
        let good = serde_json::to_vec(&receipt).unwrap();
        receipt.model_hash.clear();
        let bad = serde_json::to_vec(&receipt).unwrap();

        assert_eq!(run(&vm, &mut state, &[0x21, 0xF3], vec![good], 10_000), Ok(Some(vec![1])));
        assert_eq!(run(&vm, &mut state, &[0x21, 0xF3], vec![bad], 10_000), Ok(Some(vec![0])));
        assert!(state.receipts().is_empty());
    }
}
