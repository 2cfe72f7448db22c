//! The safety rules: when a validator may vote.

use cascade_types::{
    vote_message, BFTHeader, KeyPair, QuorumCertificate, TimestampedSignature, View, Vote,
    VoteData,
};
use tracing::debug;

/// Persisted voting state.
///
/// `last_voted_view` prevents double voting; `locked_view` (the parent view
/// of the highest committed QC) prevents voting for chains that fork below
/// a commit. Both must be durable before a vote leaves the node.
#[derive(Debug, Clone)]
pub struct SafetyRules {
    key: KeyPair,
    last_voted_view: View,
    locked_view: View,
}

impl SafetyRules {
    pub fn new(key: KeyPair) -> Self {
        SafetyRules {
            key,
            last_voted_view: View::GENESIS,
            locked_view: View::GENESIS,
        }
    }

    /// Restore from persisted state after a restart.
    pub fn recovered(key: KeyPair, last_voted_view: View, locked_view: View) -> Self {
        SafetyRules {
            key,
            last_voted_view,
            locked_view,
        }
    }

    pub fn last_voted_view(&self) -> View {
        self.last_voted_view
    }

    pub fn locked_view(&self) -> View {
        self.locked_view
    }

    /// Raise the lock to the parent view of a newly committed QC.
    pub fn observe_commit(&mut self, qc: &QuorumCertificate) {
        let parent_view = qc.parent().view;
        if parent_view > self.locked_view {
            self.locked_view = parent_view;
        }
    }

    /// The voting rule: vote iff the proposal's view is newer than anything
    /// we voted for and its parent is at or above our lock.
    pub fn can_vote(&self, proposal_view: View, parent_view: View) -> bool {
        proposal_view > self.last_voted_view && parent_view >= self.locked_view
    }

    /// Construct and sign a vote for a prepared proposal. Records the view
    /// as voted; the caller must persist the safety state before sending.
    ///
    /// The committed header is attached exactly when the 3-chain closes:
    /// voted, parent and grandparent at consecutive views.
    pub fn make_vote(
        &mut self,
        voted: BFTHeader,
        proposal_qc: &QuorumCertificate,
        timestamp_ms: u64,
    ) -> Option<Vote> {
        let parent = proposal_qc.voted().clone();
        if !self.can_vote(voted.view, parent.view) {
            debug!(
                view = voted.view.0,
                parent = parent.view.0,
                last_voted = self.last_voted_view.0,
                locked = self.locked_view.0,
                "voting rule forbids this vote"
            );
            return None;
        }

        let grandparent = proposal_qc.parent();
        let committed = (voted.view.0 == parent.view.0 + 1
            && parent.view.0 == grandparent.view.0 + 1)
            .then(|| grandparent.clone());

        let vote_data = VoteData {
            voted,
            parent,
            committed,
        };
        let signature = self.key.sign(&vote_message(&vote_data));
        self.last_voted_view = vote_data.voted.view;

        Some(Vote {
            vote_data,
            author: self.key.node_key(),
            signature,
            timestamp_ms,
            timeout: None,
        })
    }

    /// Sign the timestamped form used in QC signature sets.
    pub fn timestamped(&self, vote: &Vote) -> TimestampedSignature {
        TimestampedSignature {
            timestamp_ms: vote.timestamp_ms,
            signature: vote.signature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_types::test_utils::test_keypair;
    use cascade_types::{Hash, LedgerHeader, SignatureSet, VertexId};

    fn header(view: u64) -> BFTHeader {
        let mut ledger = LedgerHeader::genesis();
        ledger.view = View(view);
        BFTHeader::new(View(view), VertexId(Hash::sha256(&view.to_be_bytes())), ledger)
    }

    fn qc(voted: u64, parent: u64) -> QuorumCertificate {
        QuorumCertificate::new(
            VoteData {
                voted: header(voted),
                parent: header(parent),
                committed: None,
            },
            SignatureSet::new(),
        )
    }

    #[test]
    fn votes_once_per_view() {
        let mut safety = SafetyRules::new(test_keypair(1));
        assert!(safety.make_vote(header(2), &qc(1, 0), 0).is_some());
        assert!(safety.make_vote(header(2), &qc(1, 0), 0).is_none());
        assert!(safety.make_vote(header(3), &qc(2, 1), 0).is_some());
    }

    #[test]
    fn locked_view_blocks_old_parents() {
        let mut safety = SafetyRules::new(test_keypair(1));
        let commit_qc = qc(5, 4);
        safety.observe_commit(&commit_qc);
        assert_eq!(safety.locked_view(), View(4));

        // Parent below the lock: refuse.
        assert!(safety.make_vote(header(6), &qc(3, 2), 0).is_none());
        // Parent at the lock: fine.
        assert!(safety.make_vote(header(6), &qc(4, 3), 0).is_some());
    }

    #[test]
    fn three_chain_attaches_the_committed_header() {
        let mut safety = SafetyRules::new(test_keypair(1));
        let vote = safety.make_vote(header(3), &qc(2, 1), 0).unwrap();
        assert_eq!(vote.vote_data.committed.as_ref().map(|h| h.view), Some(View(1)));

        // A gap in views: no commit.
        let vote = safety.make_vote(header(7), &qc(5, 4), 0).unwrap();
        assert!(vote.vote_data.committed.is_none());
    }
}
