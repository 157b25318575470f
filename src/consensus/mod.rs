// Block production, validation and import
pub mod producer;
pub mod signing;
pub mod source;

pub use producer::{BlockProducer, ProducerConfig, ProducerState};
pub use source::{BatchSource, PoolBatches};
pub use signing::{
    AcceptAllVerifier, BlockSigner, Ed25519Signer, Ed25519Verifier, NoopSigner, SignatureVerifier,
};
