//! Ledger commit behaviour against hand-built proofs.

use cascade_engine::{default_fork_registry, transfer, REAddr};
use cascade_ledger::{chain_accumulator, LedgerError, StateComputer};
use cascade_types::test_utils::test_keypair;
use cascade_types::{
    proof_message, Command, Epoch, Hash, LedgerHeader, LedgerProof, SignatureSet, StateVersion,
    TimestampedSignature, U256, VerifiedCommandsAndProof, View,
};

fn ledger() -> StateComputer {
    let validator = test_keypair(1).node_key();
    let balances = [(REAddr::of_key(test_keypair(10).node_key()), U256::from(1_000u64))];
    StateComputer::new(
        default_fork_registry(),
        &[(validator, U256::from(100u64))],
        &balances,
    )
    .unwrap()
}

fn proof_for(commands: &[Command], base: &LedgerProof) -> LedgerProof {
    let mut accumulator = base.header().accumulator;
    for command in commands {
        accumulator = chain_accumulator(accumulator, command.id());
    }
    let header = LedgerHeader {
        epoch: Epoch(0),
        view: View(1),
        state_version: StateVersion(base.state_version().0 + commands.len() as u64),
        accumulator,
        timestamp_ms: 100,
        next_validator_set: None,
    };
    let opaque = Hash::sha256(b"test opaque");
    let message = proof_message(&opaque, &header);
    let kp = test_keypair(1);
    let signatures: SignatureSet = [(
        kp.node_key(),
        TimestampedSignature {
            timestamp_ms: 100,
            signature: kp.sign(&message),
        },
    )]
    .into_iter()
    .collect();
    LedgerProof::new(opaque, header, signatures)
}

#[test]
fn commit_applies_commands_and_advances_version() {
    let mut ledger = ledger();
    let to = REAddr::of_key(test_keypair(11).node_key());
    let command = Command::new(
        transfer(ledger.engine_store(), &test_keypair(10), to, U256::from(250u64)).unwrap(),
    );

    let proof = proof_for(std::slice::from_ref(&command), ledger.last_proof());
    let outcome = ledger
        .commit(&VerifiedCommandsAndProof::new(vec![command], proof))
        .unwrap();

    assert!(outcome.is_none());
    assert_eq!(ledger.state_version(), StateVersion(1));
}

#[test]
fn recommitting_the_same_proof_is_a_no_op() {
    let mut ledger = ledger();
    let to = REAddr::of_key(test_keypair(11).node_key());
    let command = Command::new(
        transfer(ledger.engine_store(), &test_keypair(10), to, U256::from(250u64)).unwrap(),
    );

    let proof = proof_for(std::slice::from_ref(&command), ledger.last_proof());
    let batch = VerifiedCommandsAndProof::new(vec![command], proof);
    ledger.commit(&batch).unwrap();
    // Same state version: ignored without error.
    assert_eq!(ledger.commit(&batch).unwrap(), None);
    assert_eq!(ledger.state_version(), StateVersion(1));
}

#[test]
fn accumulator_mismatch_is_fatal_corruption() {
    let mut ledger = ledger();
    let to = REAddr::of_key(test_keypair(11).node_key());
    let command = Command::new(
        transfer(ledger.engine_store(), &test_keypair(10), to, U256::from(250u64)).unwrap(),
    );
    let other = Command::new(vec![0xff]);

    // The proof chains a different command id than the batch carries.
    let proof = proof_for(std::slice::from_ref(&other), ledger.last_proof());
    let err = ledger
        .commit(&VerifiedCommandsAndProof::new(vec![command], proof))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Corruption(_)));
}

#[test]
fn unsigned_proof_is_rejected() {
    let mut ledger = ledger();
    let to = REAddr::of_key(test_keypair(11).node_key());
    let command = Command::new(
        transfer(ledger.engine_store(), &test_keypair(10), to, U256::from(250u64)).unwrap(),
    );

    let good = proof_for(std::slice::from_ref(&command), ledger.last_proof());
    let stripped = LedgerProof::new(good.opaque(), good.header().clone(), SignatureSet::new());
    let err = ledger
        .commit(&VerifiedCommandsAndProof::new(vec![command], stripped))
        .unwrap_err();
    assert!(matches!(err, LedgerError::BadProof(_)));
}

#[test]
fn committed_reader_serves_batches_with_proofs() {
    let mut ledger = ledger();
    let to = REAddr::of_key(test_keypair(11).node_key());
    let command = Command::new(
        transfer(ledger.engine_store(), &test_keypair(10), to, U256::from(250u64)).unwrap(),
    );
    let proof = proof_for(std::slice::from_ref(&command), ledger.last_proof());
    ledger
        .commit(&VerifiedCommandsAndProof::new(vec![command.clone()], proof.clone()))
        .unwrap();

    let served = ledger.committed_after(StateVersion(0), 10).unwrap();
    assert_eq!(served.commands, vec![command]);
    assert_eq!(served.proof, proof);

    // Nothing beyond the tip.
    assert!(ledger.committed_after(StateVersion(1), 10).is_none());
}
