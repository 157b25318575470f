// Execution engine, gas schedule and the agent instruction-stream VM
pub mod context;
pub mod engine;
pub mod gas;
pub mod vm;

pub use context::ExecutionContext;
pub use engine::{
    contract_address, ExecutionEngine, ExecutionOutcome, NoncePolicy, ReceiptVerifier,
    StructuralReceiptVerifier,
};
pub use gas::GasCosts;
pub use vm::{AgentVm, Opcode, Precompile, TokenTransferArgs};
