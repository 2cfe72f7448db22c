//! Ledger proofs: committed headers with validator signatures.

use crate::{
    proof_message, LedgerHeader, NodeKey, QuorumCertificate, SignatureSet, TimestampedSignature,
    U256, ValidatorSet,
};
use crate::{Command, Hash, StateVersion};
use std::fmt;

/// Errors validating a ledger proof.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProofError {
    #[error("signer {0} is not in the validator set")]
    UnknownSigner(NodeKey),
    #[error("invalid signature from {0}")]
    InvalidSignature(NodeKey),
    #[error("signed power does not reach quorum")]
    InsufficientPower,
}

/// A committed ledger header plus the validator signatures proving it.
///
/// The signatures are the quorum certificate's vote signatures; `opaque`
/// carries the consensus half of the signed vote message so the proof
/// verifies without the vote data itself.
#[derive(Clone, PartialEq, Eq)]
pub struct LedgerProof {
    opaque: Hash,
    header: LedgerHeader,
    signatures: SignatureSet,
}

impl LedgerProof {
    pub fn new(opaque: Hash, header: LedgerHeader, signatures: SignatureSet) -> Self {
        LedgerProof {
            opaque,
            header,
            signatures,
        }
    }

    /// The proof of the pristine pre-genesis ledger. Carries no signatures;
    /// it is an axiom, not a claim.
    pub fn genesis() -> Self {
        LedgerProof {
            opaque: Hash::ZERO,
            header: LedgerHeader::genesis(),
            signatures: SignatureSet::new(),
        }
    }

    /// Repackage a quorum certificate that commits a header.
    pub fn from_qc(qc: &QuorumCertificate) -> Option<Self> {
        let committed = qc.committed()?;
        Some(LedgerProof {
            opaque: crate::vote_opaque_hash(qc.vote_data()),
            header: committed.ledger_header.clone(),
            signatures: qc.signatures().clone(),
        })
    }

    pub fn opaque(&self) -> Hash {
        self.opaque
    }

    pub fn header(&self) -> &LedgerHeader {
        &self.header
    }

    pub fn signatures(&self) -> &SignatureSet {
        &self.signatures
    }

    pub fn state_version(&self) -> StateVersion {
        self.header.state_version
    }

    /// Verify every signature and that the signed power reaches quorum in
    /// `validators`.
    pub fn verify(&self, validators: &ValidatorSet) -> Result<(), ProofError> {
        let message = proof_message(&self.opaque, &self.header);
        let mut power = U256::zero();
        for (signer, TimestampedSignature { signature, .. }) in self.signatures.iter() {
            if !validators.contains(signer) {
                return Err(ProofError::UnknownSigner(*signer));
            }
            if !signer.verify(&message, signature) {
                return Err(ProofError::InvalidSignature(*signer));
            }
            // Powers are validated not to overflow at set construction.
            power += validators.power_of(signer);
        }
        if !validators.is_quorum(power) {
            return Err(ProofError::InsufficientPower);
        }
        Ok(())
    }
}

impl fmt::Debug for LedgerProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerProof")
            .field("header", &self.header)
            .field("signers", &self.signatures.len())
            .finish()
    }
}

/// An ordered command batch with the proof of its resulting ledger state.
///
/// This is both the unit handed from consensus to the ledger at commit time
/// and the unit served to syncing peers.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifiedCommandsAndProof {
    pub commands: Vec<Command>,
    pub proof: LedgerProof,
}

impl VerifiedCommandsAndProof {
    pub fn new(commands: Vec<Command>, proof: LedgerProof) -> Self {
        VerifiedCommandsAndProof { commands, proof }
    }
}

impl fmt::Debug for VerifiedCommandsAndProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedCommandsAndProof")
            .field("commands", &self.commands.len())
            .field("proof", &self.proof)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_keypair, test_validator_set};

    fn signed_proof(signer_seeds: &[u8]) -> LedgerProof {
        let opaque = Hash::sha256(b"opaque");
        let header = LedgerHeader::genesis();
        let message = proof_message(&opaque, &header);
        let signatures: SignatureSet = signer_seeds
            .iter()
            .map(|seed| {
                let kp = test_keypair(*seed);
                (
                    kp.node_key(),
                    TimestampedSignature {
                        timestamp_ms: 0,
                        signature: kp.sign(&message),
                    },
                )
            })
            .collect();
        LedgerProof::new(opaque, header, signatures)
    }

    #[test]
    fn proof_verifies_with_quorum() {
        let set = test_validator_set(&[(1, 100), (2, 100), (3, 100), (4, 100)]);
        assert_eq!(signed_proof(&[1, 2, 3]).verify(&set), Ok(()));
    }

    #[test]
    fn proof_without_quorum_is_rejected() {
        let set = test_validator_set(&[(1, 100), (2, 100), (3, 100), (4, 100)]);
        assert_eq!(
            signed_proof(&[1]).verify(&set),
            Err(ProofError::InsufficientPower)
        );
    }

    #[test]
    fn foreign_signer_is_rejected() {
        let set = test_validator_set(&[(1, 100), (2, 100)]);
        let outsider = test_keypair(9).node_key();
        assert_eq!(
            signed_proof(&[9]).verify(&set),
            Err(ProofError::UnknownSigner(outsider))
        );
    }

    #[test]
    fn tampered_header_fails_verification() {
        let set = test_validator_set(&[(1, 100), (2, 100)]);
        let proof = signed_proof(&[1, 2]);
        let mut header = proof.header().clone();
        header.timestamp_ms += 1;
        let tampered = LedgerProof::new(proof.opaque(), header, proof.signatures().clone());
        assert!(matches!(
            tampered.verify(&set),
            Err(ProofError::InvalidSignature(_))
        ));
    }
}
