//! Vote and timeout accumulation into certificates.

use cascade_types::{
    timeout_message, vote_message, Epoch, Hash, NodeKey, QuorumCertificate, SignatureSet,
    TimeoutCertificate, TimeoutVoteInfo, TimestampedSignature, U256, ValidatorSet, View, Vote,
    VoteData,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Why a vote was not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VoteRejection {
    #[error("author is not in the validator set")]
    InvalidAuthor,
    #[error("vote signature does not verify")]
    InvalidSignature,
    #[error("author already voted at this view")]
    DuplicateVote,
    #[error("view already produced a certificate")]
    UnexpectedVote,
}

/// The effect of counting one vote.
#[derive(Debug, Clone)]
pub enum VoteOutcome {
    /// Counted; no quorum yet.
    Pending,
    /// This vote completed a quorum certificate.
    Qc(QuorumCertificate),
    /// This vote completed a timeout certificate.
    Tc(TimeoutCertificate),
}

struct VoteBucket {
    vote_data: VoteData,
    signatures: SignatureSet,
    power: U256,
}

#[derive(Default)]
struct TimeoutBucket {
    infos: BTreeMap<NodeKey, TimeoutVoteInfo>,
    power: U256,
}

/// Accumulates votes per vote-data hash and timeout votes per view.
///
/// The leader of view `v+1` collects votes for view `v`; on reaching the
/// quorum threshold the bucket closes into a certificate. An author
/// contributes at most one vote per view across all buckets, so a Byzantine
/// validator cannot split its power.
pub struct PendingVotes {
    epoch: Epoch,
    vote_buckets: HashMap<Hash, VoteBucket>,
    timeout_buckets: HashMap<View, TimeoutBucket>,
    /// Highest view each author cast a proposal vote at, with the vote-data
    /// hash: a second vote at the same view over different data is
    /// equivocation.
    voted: HashMap<NodeKey, (View, Hash)>,
    /// Highest view each author cast a timeout vote at. Tracked apart from
    /// proposal votes: timing out a view one already voted in is legal.
    timeout_voted: HashMap<NodeKey, View>,
    /// Views that already closed into a QC or TC.
    closed: Vec<View>,
}

impl PendingVotes {
    pub fn new(epoch: Epoch) -> Self {
        PendingVotes {
            epoch,
            vote_buckets: HashMap::new(),
            timeout_buckets: HashMap::new(),
            voted: HashMap::new(),
            timeout_voted: HashMap::new(),
            closed: Vec::new(),
        }
    }

    /// Count a vote. Signatures are verified here: a certificate must never
    /// be assembled from a vote this accumulator did not check itself.
    pub fn insert(
        &mut self,
        vote: &Vote,
        validators: &ValidatorSet,
    ) -> Result<VoteOutcome, VoteRejection> {
        let power = validators.power_of(&vote.author);
        if power.is_zero() {
            return Err(VoteRejection::InvalidAuthor);
        }
        if !vote
            .author
            .verify(&vote_message(&vote.vote_data), &vote.signature)
        {
            return Err(VoteRejection::InvalidSignature);
        }
        if let Some(timeout) = &vote.timeout {
            let hash = timeout_message(self.epoch, timeout.view, timeout.high_qc_view);
            if !vote.author.verify(&hash, &timeout.signature) {
                return Err(VoteRejection::InvalidSignature);
            }
        }

        let effective_view = vote
            .timeout
            .map(|timeout| timeout.view)
            .unwrap_or_else(|| vote.view());
        if self.closed.contains(&effective_view) {
            return Err(VoteRejection::UnexpectedVote);
        }
        if vote.timeout.is_some() {
            if let Some(previous) = self.timeout_voted.get(&vote.author) {
                if *previous >= effective_view {
                    return Err(VoteRejection::DuplicateVote);
                }
            }
            self.timeout_voted.insert(vote.author, effective_view);
        } else {
            let data_hash = vote.vote_data.hash();
            if let Some((previous, previous_hash)) = self.voted.get(&vote.author) {
                if *previous == effective_view && *previous_hash != data_hash {
                    // Signed votes for two different vertices at one view:
                    // Byzantine evidence, kept for the next epoch's penalties.
                    warn!(
                        author = ?vote.author,
                        view = effective_view.0,
                        "equivocation detected"
                    );
                    return Err(VoteRejection::DuplicateVote);
                }
                if *previous >= effective_view {
                    return Err(VoteRejection::DuplicateVote);
                }
            }
            self.voted.insert(vote.author, (effective_view, data_hash));
        }

        // The timeout half accumulates toward a TC for its view.
        if let Some(timeout) = vote.timeout {
            let bucket = self.timeout_buckets.entry(timeout.view).or_default();
            bucket.infos.insert(
                vote.author,
                TimeoutVoteInfo {
                    high_qc_view: timeout.high_qc_view,
                    signature: timeout.signature,
                    timestamp_ms: vote.timestamp_ms,
                },
            );
            bucket.power += power;
            debug!(
                view = timeout.view.0,
                power = %bucket.power,
                "timeout vote counted"
            );
            if validators.is_quorum(bucket.power) {
                let bucket = self.timeout_buckets.remove(&timeout.view).expect("exists");
                self.closed.push(timeout.view);
                let tc = TimeoutCertificate::new(self.epoch, timeout.view, bucket.infos);
                info!(view = timeout.view.0, "timeout certificate formed");
                return Ok(VoteOutcome::Tc(tc));
            }
            return Ok(VoteOutcome::Pending);
        }

        // The regular half accumulates toward a QC for its vote data.
        let key = vote.vote_data.hash();
        let bucket = self.vote_buckets.entry(key).or_insert_with(|| VoteBucket {
            vote_data: vote.vote_data.clone(),
            signatures: SignatureSet::new(),
            power: U256::zero(),
        });
        if !bucket.signatures.add(
            vote.author,
            TimestampedSignature {
                timestamp_ms: vote.timestamp_ms,
                signature: vote.signature,
            },
        ) {
            return Err(VoteRejection::DuplicateVote);
        }
        bucket.power += power;
        debug!(view = vote.view().0, power = %bucket.power, "vote counted");

        if validators.is_quorum(bucket.power) {
            let bucket = self.vote_buckets.remove(&key).expect("exists");
            self.closed.push(effective_view);
            let qc = QuorumCertificate::new(bucket.vote_data, bucket.signatures);
            info!(view = qc.view().0, "quorum certificate formed");
            return Ok(VoteOutcome::Qc(qc));
        }
        Ok(VoteOutcome::Pending)
    }

    /// Drop buckets at or below a view that can no longer matter.
    pub fn garbage_collect(&mut self, below: View) {
        self.vote_buckets
            .retain(|_, bucket| bucket.vote_data.voted.view >= below);
        self.timeout_buckets.retain(|view, _| *view >= below);
        self.closed.retain(|view| *view >= below);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_types::test_utils::{test_keypair, test_validator_set};
    use cascade_types::{vote_message, BFTHeader, LedgerHeader, VertexId};

    fn header(view: u64) -> BFTHeader {
        let mut ledger = LedgerHeader::genesis();
        ledger.view = View(view);
        BFTHeader::new(View(view), VertexId(Hash::sha256(&view.to_be_bytes())), ledger)
    }

    fn vote(seed: u8, view: u64) -> Vote {
        let kp = test_keypair(seed);
        let vote_data = VoteData {
            voted: header(view),
            parent: header(view - 1),
            committed: None,
        };
        let signature = kp.sign(&vote_message(&vote_data));
        Vote {
            vote_data,
            author: kp.node_key(),
            signature,
            timestamp_ms: 0,
            timeout: None,
        }
    }

    #[test]
    fn quorum_forms_a_qc() {
        let set = test_validator_set(&[(1, 100), (2, 100), (3, 100), (4, 100)]);
        let mut pending = PendingVotes::new(Epoch(0));

        assert!(matches!(
            pending.insert(&vote(1, 5), &set).unwrap(),
            VoteOutcome::Pending
        ));
        assert!(matches!(
            pending.insert(&vote(2, 5), &set).unwrap(),
            VoteOutcome::Pending
        ));
        match pending.insert(&vote(3, 5), &set).unwrap() {
            VoteOutcome::Qc(qc) => {
                assert_eq!(qc.view(), View(5));
                assert_eq!(qc.signatures().len(), 3);
            }
            other => panic!("expected a QC, got {other:?}"),
        }
    }

    #[test]
    fn late_votes_after_the_qc_are_unexpected() {
        let set = test_validator_set(&[(1, 100), (2, 100), (3, 100), (4, 100)]);
        let mut pending = PendingVotes::new(Epoch(0));
        for seed in 1..=3 {
            let _ = pending.insert(&vote(seed, 5), &set);
        }
        assert_eq!(
            pending.insert(&vote(4, 5), &set).unwrap_err(),
            VoteRejection::UnexpectedVote
        );
    }

    #[test]
    fn double_votes_are_rejected() {
        let set = test_validator_set(&[(1, 100), (2, 100), (3, 100), (4, 100)]);
        let mut pending = PendingVotes::new(Epoch(0));
        pending.insert(&vote(1, 5), &set).unwrap();
        assert_eq!(
            pending.insert(&vote(1, 5), &set).unwrap_err(),
            VoteRejection::DuplicateVote
        );
    }

    #[test]
    fn outsiders_are_rejected() {
        let set = test_validator_set(&[(1, 100), (2, 100)]);
        let mut pending = PendingVotes::new(Epoch(0));
        assert_eq!(
            pending.insert(&vote(9, 5), &set).unwrap_err(),
            VoteRejection::InvalidAuthor
        );
    }

    #[test]
    fn forged_signatures_are_rejected() {
        let set = test_validator_set(&[(1, 100), (2, 100)]);
        let mut pending = PendingVotes::new(Epoch(0));

        // A vote claiming author 1 but signed by author 2.
        let mut forged = vote(1, 5);
        forged.signature = test_keypair(2).sign(&vote_message(&forged.vote_data));
        assert_eq!(
            pending.insert(&forged, &set).unwrap_err(),
            VoteRejection::InvalidSignature
        );

        // A valid vote whose timeout half is signed over the wrong view.
        let kp = test_keypair(1);
        let mut bad_timeout = vote(1, 5);
        bad_timeout.timeout = Some(cascade_types::TimeoutVote {
            view: View(5),
            high_qc_view: View(4),
            signature: kp.sign(&timeout_message(Epoch(0), View(6), View(4))),
        });
        assert_eq!(
            pending.insert(&bad_timeout, &set).unwrap_err(),
            VoteRejection::InvalidSignature
        );
    }

    #[test]
    fn timeout_quorum_forms_a_tc() {
        let set = test_validator_set(&[(1, 100), (2, 100), (3, 100), (4, 100)]);
        let mut pending = PendingVotes::new(Epoch(2));

        for seed in 1..=3u8 {
            let kp = test_keypair(seed);
            let mut v = vote(seed, 4);
            let timeout_hash = cascade_types::timeout_message(Epoch(2), View(6), View(4));
            v.timeout = Some(cascade_types::TimeoutVote {
                view: View(6),
                high_qc_view: View(4),
                signature: kp.sign(&timeout_hash),
            });
            match pending.insert(&v, &set).unwrap() {
                VoteOutcome::Pending => assert!(seed < 3),
                VoteOutcome::Tc(tc) => {
                    assert_eq!(seed, 3);
                    assert_eq!(tc.view(), View(6));
                    assert_eq!(tc.highest_qc_view(), View(4));
                }
                VoteOutcome::Qc(_) => panic!("no QC expected"),
            }
        }
    }
}
