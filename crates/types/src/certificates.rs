//! Votes, quorum certificates and timeout certificates.

use crate::{
    timeout_message, vote_message, BFTHeader, Epoch, Hash, LedgerHeader, NodeKey, Signature,
    VertexId, View,
};
use std::collections::BTreeMap;
use std::fmt;

/// A signature with the signer's wall-clock timestamp.
///
/// Committed-proof timestamps are derived from the signers' clocks, so each
/// signature carries the time at which it was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampedSignature {
    pub timestamp_ms: u64,
    pub signature: Signature,
}

/// Signatures by validator key, in canonical key order.
///
/// The map form makes the serialization deterministic and makes two
/// certificates over the same signer set compare equal regardless of the
/// order votes arrived in.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct SignatureSet {
    signatures: BTreeMap<NodeKey, TimestampedSignature>,
}

impl SignatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a signature. Returns false if the signer was already present.
    pub fn add(&mut self, signer: NodeKey, signature: TimestampedSignature) -> bool {
        self.signatures.insert(signer, signature).is_none()
    }

    pub fn contains(&self, signer: &NodeKey) -> bool {
        self.signatures.contains_key(signer)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeKey, &TimestampedSignature)> + '_ {
        self.signatures.iter()
    }

    pub fn signers(&self) -> impl Iterator<Item = &NodeKey> + '_ {
        self.signatures.keys()
    }
}

impl FromIterator<(NodeKey, TimestampedSignature)> for SignatureSet {
    fn from_iter<T: IntoIterator<Item = (NodeKey, TimestampedSignature)>>(iter: T) -> Self {
        SignatureSet {
            signatures: iter.into_iter().collect(),
        }
    }
}

impl fmt::Debug for SignatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureSet({} signers)", self.signatures.len())
    }
}

/// The headers a vote commits to.
///
/// `committed` is present exactly when the voted/parent/grandparent views are
/// consecutive, i.e. when a QC over this data closes a 3-chain.
#[derive(Clone, PartialEq, Eq)]
pub struct VoteData {
    pub voted: BFTHeader,
    pub parent: BFTHeader,
    pub committed: Option<BFTHeader>,
}

impl VoteData {
    /// The hash that vote signatures cover.
    pub fn hash(&self) -> Hash {
        vote_message(self)
    }
}

impl fmt::Debug for VoteData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoteData")
            .field("voted", &self.voted.view.0)
            .field("parent", &self.parent.view.0)
            .field("committed", &self.committed.as_ref().map(|h| h.view.0))
            .finish()
    }
}

/// Proof that a super-majority of validator power voted on a header.
#[derive(Clone, PartialEq, Eq)]
pub struct QuorumCertificate {
    vote_data: VoteData,
    signatures: SignatureSet,
}

impl QuorumCertificate {
    pub fn new(vote_data: VoteData, signatures: SignatureSet) -> Self {
        QuorumCertificate {
            vote_data,
            signatures,
        }
    }

    /// The self-certifying QC at an epoch's genesis. All three headers point
    /// at the genesis vertex; there are no signatures to check because the
    /// vertex is derived, not proposed.
    pub fn epoch_genesis(epoch: Epoch, opening: LedgerHeader) -> Self {
        debug_assert_eq!(opening.epoch, epoch);
        // The genesis vertex id is a function of the opening header only.
        let mut data = [0u8; 48];
        data[..8].copy_from_slice(&epoch.0.to_be_bytes());
        data[8..40].copy_from_slice(opening.accumulator.as_bytes());
        data[40..48].copy_from_slice(&opening.state_version.0.to_be_bytes());
        let genesis_id = VertexId(Hash::sha256(&data));
        let header = BFTHeader::new(View::GENESIS, genesis_id, opening);
        QuorumCertificate {
            vote_data: VoteData {
                voted: header.clone(),
                parent: header.clone(),
                committed: Some(header),
            },
            signatures: SignatureSet::new(),
        }
    }

    pub fn vote_data(&self) -> &VoteData {
        &self.vote_data
    }

    /// The header this QC certifies.
    pub fn voted(&self) -> &BFTHeader {
        &self.vote_data.voted
    }

    pub fn parent(&self) -> &BFTHeader {
        &self.vote_data.parent
    }

    /// The header this QC commits, present exactly on a 3-chain.
    pub fn committed(&self) -> Option<&BFTHeader> {
        self.vote_data.committed.as_ref()
    }

    pub fn view(&self) -> View {
        self.vote_data.voted.view
    }

    pub fn epoch(&self) -> Epoch {
        self.vote_data.voted.ledger_header.epoch
    }

    pub fn signatures(&self) -> &SignatureSet {
        &self.signatures
    }

    /// Weighted median-free commit timestamp: the maximum signer timestamp.
    pub fn timestamp_ms(&self) -> u64 {
        self.signatures
            .iter()
            .map(|(_, s)| s.timestamp_ms)
            .max()
            .unwrap_or(self.vote_data.voted.ledger_header.timestamp_ms)
    }
}

impl fmt::Debug for QuorumCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QC")
            .field("view", &self.view().0)
            .field("epoch", &self.epoch().0)
            .field("commits", &self.committed().map(|h| h.view.0))
            .field("signers", &self.signatures.len())
            .finish()
    }
}

/// A single signer's contribution to a timeout certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutVoteInfo {
    /// View of the highest QC this signer had seen when it timed out.
    pub high_qc_view: View,
    pub signature: Signature,
    pub timestamp_ms: u64,
}

/// Proof that a super-majority of validator power timed out at a view.
///
/// Each entry records the signer's high-QC view; the next leader must build
/// on a QC at least as high as the maximum of these.
#[derive(Clone, PartialEq, Eq)]
pub struct TimeoutCertificate {
    epoch: Epoch,
    view: View,
    signatures: BTreeMap<NodeKey, TimeoutVoteInfo>,
}

impl TimeoutCertificate {
    pub fn new(
        epoch: Epoch,
        view: View,
        signatures: BTreeMap<NodeKey, TimeoutVoteInfo>,
    ) -> Self {
        TimeoutCertificate {
            epoch,
            view,
            signatures,
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn signatures(&self) -> &BTreeMap<NodeKey, TimeoutVoteInfo> {
        &self.signatures
    }

    /// The highest QC view any signer had seen. The next proposal's QC must
    /// reach at least this view.
    pub fn highest_qc_view(&self) -> View {
        self.signatures
            .values()
            .map(|info| info.high_qc_view)
            .max()
            .unwrap_or(View::GENESIS)
    }
}

impl fmt::Debug for TimeoutCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TC")
            .field("epoch", &self.epoch.0)
            .field("view", &self.view.0)
            .field("signers", &self.signatures.len())
            .finish()
    }
}

/// The timeout half of a vote: the view the voter gave up on and the view of
/// the highest QC it had seen at that moment, signed separately so timeout
/// quorums can form over otherwise differing vote data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutVote {
    pub view: View,
    pub high_qc_view: View,
    pub signature: Signature,
}

/// A validator's vote on a proposed vertex.
///
/// `timeout` is present iff the vote was produced while the voter's
/// pacemaker had timed out; such votes count toward a timeout certificate,
/// and the vote data is that of the voter's highest QC rather than a fresh
/// proposal.
#[derive(Clone, PartialEq, Eq)]
pub struct Vote {
    pub vote_data: VoteData,
    pub author: NodeKey,
    pub signature: Signature,
    pub timestamp_ms: u64,
    pub timeout: Option<TimeoutVote>,
}

impl Vote {
    pub fn view(&self) -> View {
        self.vote_data.voted.view
    }

    pub fn epoch(&self) -> Epoch {
        self.vote_data.voted.ledger_header.epoch
    }

    pub fn is_timeout(&self) -> bool {
        self.timeout.is_some()
    }

    /// The hash a timeout signature covers.
    pub fn timeout_hash(epoch: Epoch, timeout: &TimeoutVote) -> Hash {
        timeout_message(epoch, timeout.view, timeout.high_qc_view)
    }
}

impl fmt::Debug for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vote")
            .field("view", &self.view().0)
            .field("author", &self.author)
            .field("timeout", &self.is_timeout())
            .finish()
    }
}
