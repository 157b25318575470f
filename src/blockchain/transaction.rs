// Transaction envelope and the typed payloads carried inside it
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::execution::GasCosts;
use crate::primitives::{
    hash_data, Address, Balance, ChainError, DigestWriter, Gas, Result, Timestamp, H256,
};

/// Transaction kinds, in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Transfer,
    AgentRegister,
    AgentMessage,
    AgentDelegate,
    DeployContract,
    CallContract,
    InferenceReceipt,
    ValidatorStake,
    ValidatorUnstake,
}

impl TransactionType {
    pub fn code(&self) -> u8 {
        match self {
            TransactionType::Transfer => 0,
            TransactionType::AgentRegister => 1,
            TransactionType::AgentMessage => 2,
            TransactionType::AgentDelegate => 3,
            TransactionType::DeployContract => 4,
            TransactionType::CallContract => 5,
            TransactionType::InferenceReceipt => 6,
            TransactionType::ValidatorStake => 7,
            TransactionType::ValidatorUnstake => 8,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A verified transaction. Signature checking happens before admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub from: Address,
    pub to: Option<Address>,
    pub value: Balance,
    pub gas_limit: Gas,
    pub gas_price: Balance,
    pub nonce: u64,
    /// Type-specific payload, JSON encoded
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl Transaction {
    fn new(tx_type: TransactionType, from: Address, gas_limit: Gas, nonce: u64, gas_price: Balance) -> Self {
        Self {
            tx_type,
            from,
            to: None,
            value: 0,
            gas_limit,
            gas_price,
            nonce,
            payload: Vec::new(),
            signature: Vec::new(),
        }
    }

    /// Content hash over every field except the signature
    pub fn hash(&self) -> H256 {
        let mut writer = DigestWriter::new("agc/tx");
        writer
            .put_u8(self.tx_type.code())
            .put_bytes(self.from.as_bytes())
            .put_option(self.to.as_ref(), |w, to| {
                w.put_bytes(to.as_bytes());
            })
            .put_u128(self.value)
            .put_u64(self.gas_limit)
            .put_u128(self.gas_price)
            .put_u64(self.nonce)
            .put_bytes(&self.payload);
        writer.finish()
    }

    pub fn transfer(from: Address, to: Address, value: Balance, nonce: u64, gas_price: Balance) -> Self {
        let mut tx = Self::new(TransactionType::Transfer, from, GasCosts::TRANSFER, nonce, gas_price);
        tx.to = Some(to);
        tx.value = value;
        tx
    }

    pub fn agent_register(
        from: Address,
        identity: &AgentIdentity,
        nonce: u64,
        gas_price: Balance,
    ) -> Result<Self> {
        let mut tx = Self::new(TransactionType::AgentRegister, from, GasCosts::AGENT_REGISTER, nonce, gas_price);
        tx.payload = serde_json::to_vec(identity)?;
        Ok(tx)
    }

    pub fn agent_message(
        from: Address,
        message: &AgentMessage,
        nonce: u64,
        gas_price: Balance,
    ) -> Result<Self> {
        let mut tx = Self::new(TransactionType::AgentMessage, from, GasCosts::AGENT_MESSAGE, nonce, gas_price);
        tx.payload = serde_json::to_vec(message)?;
        Ok(tx)
    }

    pub fn inference_receipt(
        from: Address,
        receipt: &InferenceReceipt,
        nonce: u64,
        gas_price: Balance,
    ) -> Result<Self> {
        let mut tx = Self::new(TransactionType::InferenceReceipt, from, GasCosts::INFERENCE_RECEIPT, nonce, gas_price);
        tx.payload = serde_json::to_vec(receipt)?;
        Ok(tx)
    }

    pub fn deploy_contract(from: Address, code: Vec<u8>, nonce: u64, gas_price: Balance) -> Result<Self> {
        let gas_limit = GasCosts::deployment(code.len());
        let mut tx = Self::new(TransactionType::DeployContract, from, gas_limit, nonce, gas_price);
        tx.payload = serde_json::to_vec(&ContractDeployment { code })?;
        Ok(tx)
    }

    pub fn call_contract(
        from: Address,
        contract: Address,
        operands: Vec<Vec<u8>>,
        gas_limit: Gas,
        nonce: u64,
        gas_price: Balance,
    ) -> Result<Self> {
        let mut tx = Self::new(TransactionType::CallContract, from, gas_limit, nonce, gas_price);
        tx.to = Some(contract);
        tx.payload = serde_json::to_vec(&ContractCall { operands })?;
        Ok(tx)
    }

    pub fn with_gas_limit(mut self, gas_limit: Gas) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }

    /// Decodes the payload as `T`; malformed payloads are an execution failure.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        decode_operand(&self.payload)
    }
}

/// Decodes a JSON operand, mapping parse failures to `InvalidOperation`
pub fn decode_operand<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| ChainError::InvalidOperation(format!("malformed payload: {}", e)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub version: String,
}

/// Decentralized identity document anchored on-chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub identifier: String,
    pub controller: Address,
    pub capabilities: Vec<Capability>,
    #[serde(with = "hex::serde")]
    pub public_key: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
}

impl AgentIdentity {
    pub const DID_PREFIX: &'static str = "did:agc:";

    /// `did:agc:0x` followed by the first 20 bytes of the key's SHA-256
    pub fn derive_identifier(public_key: &[u8]) -> String {
        let digest = hash_data(public_key);
        format!("{}0x{}", Self::DID_PREFIX, hex::encode(&digest.as_bytes()[..20]))
    }

    pub fn new(controller: Address, public_key: Vec<u8>) -> Self {
        Self {
            identifier: Self::derive_identifier(&public_key),
            controller,
            capabilities: Vec::new(),
            public_key,
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a capability unless an identical name+version pair is already present
    pub fn with_capability(mut self, name: &str, version: &str) -> Self {
        let capability = Capability {
            name: name.to_string(),
            version: version.to_string(),
        };
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(ChainError::InvalidOperation("agent identifier is empty".to_string()));
        }
        if !self.identifier.starts_with("did:") {
            return Err(ChainError::InvalidOperation(format!(
                "agent identifier {} is not a DID",
                self.identifier
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Task,
    Result,
    Delegate,
    Revoke,
}

/// Structured agent-to-agent message, appended to the ledger's message log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
    pub nonce: u64,
}

/// Claimed proof that an inference was performed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceReceipt {
    pub agent_id: String,
    #[serde(with = "hex::serde")]
    pub model_hash: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub input_hash: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub output_hash: Vec<u8>,
    pub timestamp: Timestamp,
    #[serde(with = "hex::serde")]
    pub prover_signature: Vec<u8>,
}

impl InferenceReceipt {
    /// Shape checks only; proof verification is delegated to a `ReceiptVerifier`.
    pub fn validate_structure(&self) -> Result<()> {
        if self.agent_id.is_empty() {
            return Err(ChainError::InvalidOperation("receipt has no agent id".to_string()));
        }
        for (name, digest) in [
            ("model", &self.model_hash),
            ("input", &self.input_hash),
            ("output", &self.output_hash),
        ] {
            if digest.len() != 32 {
                return Err(ChainError::InvalidOperation(format!(
                    "receipt {} hash must be 32 bytes, got {}",
                    name,
                    digest.len()
                )));
            }
        }
        if self.timestamp <= 0 {
            return Err(ChainError::InvalidOperation("receipt timestamp must be positive".to_string()));
        }
        if self.prover_signature.is_empty() {
            return Err(ChainError::InvalidOperation("receipt is unsigned".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDeployment {
    #[serde(with = "hex::serde")]
    pub code: Vec<u8>,
}

/// Operands for a contract call; the first operand ends up at the bottom of the stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
    pub operands: Vec<Vec<u8>>,
}
