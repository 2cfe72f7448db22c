//! Domain-separated signing message construction.
//!
//! Every signature in the protocol covers a hash built from a domain tag
//! and the signed fields, so a signature produced for one purpose can never
//! be replayed for another.
//!
//! Vote messages are built in two parts: an *opaque* hash over the
//! consensus-only fields, and the committed ledger header's own hash. A
//! quorum certificate that commits a header can therefore be re-packaged as
//! a ledger proof — header, opaque hash, signatures — and verified by
//! anyone holding just those three, without reconstructing the vote data.

use crate::hash::Hasher;
use crate::{Epoch, Hash, LedgerHeader, VoteData, View};

/// Domain tag for consensus votes.
pub const DOMAIN_VOTE: &[u8] = b"cascade/vote:";
/// Domain tag for pacemaker timeout signatures.
pub const DOMAIN_TIMEOUT: &[u8] = b"cascade/timeout:";
/// Domain tag for ledger headers.
pub const DOMAIN_LEDGER_HEADER: &[u8] = b"cascade/ledger:";

fn header_fields(hasher: &mut Hasher, header: &LedgerHeader) {
    hasher
        .update(header.epoch.0.to_be_bytes())
        .update(header.view.0.to_be_bytes())
        .update(header.state_version.0.to_be_bytes())
        .update(header.accumulator)
        .update(header.timestamp_ms.to_be_bytes());
    match &header.next_validator_set {
        Some(set) => {
            hasher.update([1u8]).update((set.len() as u32).to_be_bytes());
            for validator in set.iter() {
                let mut power = [0u8; 32];
                validator.power.to_big_endian(&mut power);
                hasher.update(validator.key.as_bytes()).update(power);
            }
        }
        None => {
            hasher.update([0u8]);
        }
    }
}

/// The domain-tagged hash of a ledger header.
pub fn ledger_header_message(header: &LedgerHeader) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(DOMAIN_LEDGER_HEADER);
    header_fields(&mut hasher, header);
    hasher.finalize()
}

/// The consensus-only half of a vote message: everything except the
/// committed ledger header.
pub fn vote_opaque_hash(vote_data: &VoteData) -> Hash {
    let mut hasher = Hasher::new();
    for header in [&vote_data.voted, &vote_data.parent] {
        hasher
            .update(header.view.0.to_be_bytes())
            .update(header.vertex_id.0);
        header_fields(&mut hasher, &header.ledger_header);
    }
    match &vote_data.committed {
        Some(header) => {
            hasher
                .update([1u8])
                .update(header.view.0.to_be_bytes())
                .update(header.vertex_id.0);
        }
        None => {
            hasher.update([0u8]);
        }
    }
    hasher.finalize()
}

/// The hash a ledger proof's signatures cover: the opaque consensus half
/// plus the committed header's hash.
pub fn proof_message(opaque: &Hash, committed: &LedgerHeader) -> Hash {
    let mut hasher = Hasher::new();
    hasher
        .update(DOMAIN_VOTE)
        .update(opaque)
        .update(ledger_header_message(committed));
    hasher.finalize()
}

/// The hash a vote signature covers.
///
/// When the vote commits a header this is exactly
/// `proof_message(opaque, committed)`, which is what lets QC signatures
/// prove committed ledger headers.
pub fn vote_message(vote_data: &VoteData) -> Hash {
    let opaque = vote_opaque_hash(vote_data);
    let committed_hash = match &vote_data.committed {
        Some(header) => ledger_header_message(&header.ledger_header),
        None => Hash::ZERO,
    };
    let mut hasher = Hasher::new();
    hasher
        .update(DOMAIN_VOTE)
        .update(opaque)
        .update(committed_hash);
    hasher.finalize()
}

/// The hash a timeout signature covers.
pub fn timeout_message(epoch: Epoch, view: View, high_qc_view: View) -> Hash {
    let mut hasher = Hasher::new();
    hasher
        .update(DOMAIN_TIMEOUT)
        .update(epoch.0.to_be_bytes())
        .update(view.0.to_be_bytes())
        .update(high_qc_view.0.to_be_bytes());
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BFTHeader, VertexId};

    fn header(view: u64) -> BFTHeader {
        let mut ledger = LedgerHeader::genesis();
        ledger.view = View(view);
        BFTHeader::new(View(view), VertexId(Hash::sha256(&view.to_be_bytes())), ledger)
    }

    #[test]
    fn vote_and_timeout_domains_never_collide() {
        let data = VoteData {
            voted: header(2),
            parent: header(1),
            committed: None,
        };
        assert_ne!(
            vote_message(&data),
            timeout_message(Epoch(0), View(2), View(1))
        );
    }

    #[test]
    fn committed_header_changes_the_message() {
        let without = VoteData {
            voted: header(3),
            parent: header(2),
            committed: None,
        };
        let with = VoteData {
            committed: Some(header(1)),
            ..without.clone()
        };
        assert_ne!(vote_message(&without), vote_message(&with));
    }

    #[test]
    fn committing_vote_message_equals_proof_message() {
        let committed = header(1);
        let data = VoteData {
            voted: header(3),
            parent: header(2),
            committed: Some(committed.clone()),
        };
        assert_eq!(
            vote_message(&data),
            proof_message(&vote_opaque_hash(&data), &committed.ledger_header)
        );
    }
}
