// Proposer signing and verification extension points
use crate::blockchain::{Block, Validator};
use crate::crypto::{KeyPair, PublicKey, Signature};
use crate::primitives::{ChainError, Result, H256};

/// Produces the proposer signature over a header hash
pub trait BlockSigner: Send + Sync {
    fn sign(&self, header_hash: &H256) -> Vec<u8>;
}

/// Checks a proposer signature against the registered validator key
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, block: &Block, proposer: &Validator) -> Result<()>;
}

/// Leaves blocks unsigned
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSigner;

impl BlockSigner for NoopSigner {
    fn sign(&self, _header_hash: &H256) -> Vec<u8> {
        Vec::new()
    }
}

/// Accepts any signature, including none
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllVerifier;

impl SignatureVerifier for AcceptAllVerifier {
    fn verify(&self, _block: &Block, _proposer: &Validator) -> Result<()> {
        Ok(())
    }
}

pub struct Ed25519Signer {
    keypair: KeyPair,
}

impl Ed25519Signer {
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }
}

impl BlockSigner for Ed25519Signer {
    fn sign(&self, header_hash: &H256) -> Vec<u8> {
        self.keypair.sign(header_hash.as_bytes()).to_bytes().to_vec()
    }
}

/// Verifies Ed25519 signatures; the validator's `public_key` must be the raw 32-byte key
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, block: &Block, proposer: &Validator) -> Result<()> {
        let public_key =
            PublicKey::from_bytes(&proposer.public_key).map_err(|_| ChainError::InvalidSignature)?;
        let signature =
            Signature::from_bytes(&block.proposer_signature).map_err(|_| ChainError::InvalidSignature)?;

        if public_key.verify(&signature, block.hash().as_bytes()) {
            Ok(())
        } else {
            Err(ChainError::InvalidSignature)
        }
    }
}
