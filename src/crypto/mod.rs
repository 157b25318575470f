// Ed25519 key handling for block proposers
// Backs the signing and verification extension points in the consensus module

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};

use crate::primitives::Address;

// Wrapper types keep ed25519-dalek out of the public API
#[derive(Clone, Debug)]
pub struct PrivateKey {
    inner: SigningKey,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

impl PrivateKey {
    pub fn generate() -> Self {
        let seed: [u8; 32] = rand::random();
        Self {
            inner: SigningKey::from_bytes(&seed),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let seed: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self {
            inner: SigningKey::from_bytes(&seed),
        })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.verifying_key(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            inner: self.inner.sign(message),
        }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        let inner = VerifyingKey::from_bytes(&raw).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { inner })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Account address controlled by this key
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.to_bytes())
    }

    pub fn verify(&self, signature: &Signature, message: &[u8]) -> bool {
        self.inner.verify(message, &signature.inner).is_ok()
    }
}

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = ed25519_dalek::Signature::from_slice(bytes)
            .map_err(|_| CryptoError::InvalidSignature)?;
        Ok(Self { inner })
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }
}

/// Key pair for a block proposer
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_private_key(PrivateKey::generate())
    }

    pub fn from_private_key(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }

    pub fn address(&self) -> Address {
        self.public_key.address()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.private_key.sign(message)
    }
}

/// Cryptographic errors
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid private key")]
    InvalidPrivateKey,
}

pub type Result<T> = std::result::Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keys = KeyPair::generate();
        let signature = keys.sign(b"block header");

        assert!(keys.public_key.verify(&signature, b"block header"));
        assert!(!keys.public_key.verify(&signature, b"another header"));
    }

    #[test]
    fn test_key_round_trip() {
        let keys = KeyPair::generate();
        let restored = PrivateKey::from_bytes(&keys.private_key.to_bytes()).unwrap();
        assert_eq!(restored.public_key(), keys.public_key);

        let public = PublicKey::from_bytes(&keys.public_key.to_bytes()).unwrap();
        assert_eq!(public.address(), keys.address());
    }

    #[test]
    fn test_rejects_malformed_material() {
        assert!(PrivateKey::from_bytes(&[1u8; 16]).is_err());
        assert!(PublicKey::from_bytes(&[0u8; 31]).is_err());
        assert!(Signature::from_bytes(&[0u8; 10]).is_err());
    }
}
