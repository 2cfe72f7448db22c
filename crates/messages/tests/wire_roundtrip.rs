//! Round-trip tests for every wire message type.

use cascade_messages::{
    GetEpochRequest, GetEpochResponse, GetVerticesRequest, GetVerticesResponse, Message, Proposal,
    SyncRequest, SyncResponse, VoteMessage,
};
use cascade_types::test_utils::{test_keypair, test_validator_set};
use cascade_types::{
    BFTHeader, Command, Epoch, Hash, LedgerHeader, LedgerProof, QuorumCertificate, SignatureSet,
    StateVersion, TimeoutCertificate, TimeoutVote, TimeoutVoteInfo, TimestampedSignature,
    VerifiedCommandsAndProof, Vertex, VertexId, View, Vote, VoteData,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn ledger_header(view: u64, version: u64, end_of_epoch: bool) -> LedgerHeader {
    LedgerHeader {
        epoch: Epoch(2),
        view: View(view),
        state_version: StateVersion(version),
        accumulator: Hash::sha256(&version.to_be_bytes()),
        timestamp_ms: 1_000 + view,
        next_validator_set: end_of_epoch.then(|| test_validator_set(&[(1, 100), (2, 50)])),
    }
}

fn bft_header(view: u64, version: u64) -> BFTHeader {
    BFTHeader::new(
        View(view),
        VertexId(Hash::sha256(&view.to_le_bytes())),
        ledger_header(view, version, false),
    )
}

fn signature_set(seeds: &[u8], message: &Hash) -> SignatureSet {
    seeds
        .iter()
        .map(|seed| {
            let kp = test_keypair(*seed);
            (
                kp.node_key(),
                TimestampedSignature {
                    timestamp_ms: u64::from(*seed),
                    signature: kp.sign(message),
                },
            )
        })
        .collect()
}

fn quorum_certificate(view: u64, with_commit: bool) -> QuorumCertificate {
    let vote_data = VoteData {
        voted: bft_header(view, view),
        parent: bft_header(view - 1, view - 1),
        committed: with_commit.then(|| bft_header(view - 2, view - 2)),
    };
    let hash = vote_data.hash();
    QuorumCertificate::new(vote_data, signature_set(&[1, 2, 3], &hash))
}

fn vertex(view: u64, with_command: bool) -> Vertex {
    Vertex::new(
        quorum_certificate(view - 1, false),
        View(view),
        with_command.then(|| Command::new(vec![0xca, 0x5c, view as u8])),
        test_keypair(1).node_key(),
    )
}

fn timeout_certificate(view: u64) -> TimeoutCertificate {
    let signatures: BTreeMap<_, _> = [4u8, 5, 6]
        .iter()
        .map(|seed| {
            let kp = test_keypair(*seed);
            let hash = Hash::sha256(&[*seed]);
            (
                kp.node_key(),
                TimeoutVoteInfo {
                    high_qc_view: View(view - 1),
                    signature: kp.sign(&hash),
                    timestamp_ms: 7,
                },
            )
        })
        .collect();
    TimeoutCertificate::new(Epoch(2), View(view), signatures)
}

fn round_trip(message: Message) {
    let bytes = message.encode();
    let decoded = Message::decode(&bytes).expect("decodes");
    assert_eq!(message, decoded);
    // Determinism: re-encoding yields the identical bytes.
    assert_eq!(bytes, decoded.encode());
}

#[test]
fn proposal_round_trip() {
    round_trip(Message::Proposal(Proposal {
        vertex: vertex(5, true),
        high_committed_qc: quorum_certificate(3, true),
        timeout_certificate: None,
    }));
}

#[test]
fn proposal_with_timeout_certificate_round_trip() {
    round_trip(Message::Proposal(Proposal {
        vertex: vertex(6, false),
        high_committed_qc: quorum_certificate(3, true),
        timeout_certificate: Some(timeout_certificate(5)),
    }));
}

#[test]
fn vote_round_trip() {
    let kp = test_keypair(2);
    let vote_data = VoteData {
        voted: bft_header(4, 4),
        parent: bft_header(3, 3),
        committed: Some(bft_header(2, 2)),
    };
    let hash = vote_data.hash();
    let timeout_hash = cascade_types::timeout_message(Epoch(2), View(4), View(3));
    let timeout = TimeoutVote {
        view: View(4),
        high_qc_view: View(3),
        signature: kp.sign(&timeout_hash),
    };
    round_trip(Message::Vote(VoteMessage {
        vote: Vote {
            signature: kp.sign(&hash),
            vote_data,
            author: kp.node_key(),
            timestamp_ms: 99,
            timeout: Some(timeout),
        },
    }));
}

#[test]
fn vertex_requests_round_trip() {
    round_trip(Message::GetVerticesRequest(GetVerticesRequest {
        tip: VertexId(Hash::sha256(b"tip")),
        count: 3,
    }));
    round_trip(Message::GetVerticesResponse(GetVerticesResponse {
        vertices: vec![vertex(4, true), vertex(5, false)],
    }));
}

#[test]
fn epoch_messages_round_trip() {
    round_trip(Message::GetEpochRequest(GetEpochRequest { epoch: Epoch(9) }));

    let header = ledger_header(20, 40, true);
    let opaque = Hash::sha256(b"opaque");
    let message = cascade_types::proof_message(&opaque, &header);
    let proof = LedgerProof::new(opaque, header, signature_set(&[1, 2], &message));
    round_trip(Message::GetEpochResponse(GetEpochResponse {
        proof: Some(proof),
    }));
    round_trip(Message::GetEpochResponse(GetEpochResponse { proof: None }));
}

#[test]
fn sync_messages_round_trip() {
    round_trip(Message::SyncRequest(SyncRequest {
        state_version: StateVersion(17),
    }));

    let header = ledger_header(8, 20, false);
    let opaque = Hash::sha256(b"sync");
    let message = cascade_types::proof_message(&opaque, &header);
    let proof = LedgerProof::new(opaque, header, signature_set(&[1, 2, 3], &message));
    round_trip(Message::SyncResponse(Box::new(SyncResponse {
        batch: VerifiedCommandsAndProof::new(
            vec![Command::new(vec![1]), Command::new(vec![2, 3])],
            proof,
        ),
    })));
}

#[test]
fn wrong_magic_is_rejected() {
    let mut bytes = Message::sync_request(StateVersion(1)).encode();
    bytes[0] ^= 0xff;
    assert!(matches!(
        Message::decode(&bytes),
        Err(cascade_messages::CodecError::BadMagic(_))
    ));
}

#[test]
fn trailing_garbage_is_rejected() {
    let mut bytes = Message::sync_request(StateVersion(1)).encode();
    bytes.push(0x00);
    assert!(matches!(
        Message::decode(&bytes),
        Err(cascade_messages::CodecError::TrailingBytes(1))
    ));
}

proptest! {
    // Arbitrary truncations never panic, only error.
    #[test]
    fn truncated_messages_error_cleanly(cut in 0usize..64) {
        let bytes = Message::Proposal(Proposal {
            vertex: vertex(5, true),
            high_committed_qc: quorum_certificate(3, true),
            timeout_certificate: Some(timeout_certificate(4)),
        })
        .encode();
        let cut = cut.min(bytes.len());
        prop_assert!(Message::decode(&bytes[..cut]).is_err());
    }

    #[test]
    fn command_payloads_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
        let message = Message::SyncResponse(Box::new(SyncResponse {
            batch: VerifiedCommandsAndProof::new(
                vec![Command::new(payload)],
                LedgerProof::genesis(),
            ),
        }));
        let decoded = Message::decode(&message.encode()).unwrap();
        prop_assert_eq!(message, decoded);
    }
}
