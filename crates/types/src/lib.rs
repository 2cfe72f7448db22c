//! Core types for Cascade consensus.
//!
//! This crate provides the foundational types used throughout the node:
//!
//! - **Primitives**: Hash, cryptographic keys and signatures
//! - **Identifiers**: View, Epoch, StateVersion
//! - **Consensus types**: Vertex, BFTHeader, QuorumCertificate, TimeoutCertificate
//! - **Ledger types**: LedgerHeader, LedgerProof, Command
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

pub mod codec;

mod certificates;
mod command;
mod crypto;
mod hash;
mod headers;
mod identifiers;
mod leader;
mod proof;
mod signing;
mod validator_set;
mod vertex;

pub use certificates::{
    QuorumCertificate, SignatureSet, TimeoutCertificate, TimeoutVote, TimeoutVoteInfo,
    TimestampedSignature, Vote, VoteData,
};
pub use command::{Command, CommandId};
pub use crypto::{CryptoError, KeyPair, NodeKey, Signature};
pub use hash::{Hash, HexError};
pub use headers::{BFTHeader, LedgerHeader};
pub use identifiers::{Epoch, StateVersion, View};
pub use leader::leader_for;
pub use proof::{LedgerProof, ProofError, VerifiedCommandsAndProof};
pub use signing::{
    ledger_header_message, proof_message, timeout_message, vote_message, vote_opaque_hash,
    DOMAIN_LEDGER_HEADER, DOMAIN_TIMEOUT, DOMAIN_VOTE,
};
pub use validator_set::{Validator, ValidatorSet, ValidatorSetError};
pub use vertex::{Vertex, VertexId};

// Re-exported for stake arithmetic convenience.
pub use primitive_types::U256;

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Create a deterministic keypair from a seed byte.
    pub fn test_keypair(seed: u8) -> KeyPair {
        let mut seed_bytes = [seed; 32];
        // Keep the scalar inside the curve order for any seed byte.
        seed_bytes[0] = 1;
        KeyPair::from_seed(&seed_bytes).expect("valid test seed")
    }

    /// Create a validator set with the given (seed, power) pairs.
    pub fn test_validator_set(entries: &[(u8, u64)]) -> ValidatorSet {
        ValidatorSet::from_validators(entries.iter().map(|(seed, power)| Validator {
            key: test_keypair(*seed).node_key(),
            power: primitive_types::U256::from(*power),
        }))
        .expect("valid test validator set")
    }
}
