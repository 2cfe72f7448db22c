//! Epoch rotation, catch-up sync and fork activation scenarios.

use cascade_engine::{
    cast_fork_vote, transfer, ForkConfig, ForkRegistry, RERules, RulesConfig, StakeVoting,
    TxnBuilder,
};
use cascade_node::NodeConfig;
use cascade_simulation::{client_keypair, validator_keypair, SimConfig, SimulationRunner};
use cascade_types::{Command, Epoch, StateVersion, U256};
use std::time::Duration;

/// A registry whose epochs are only a few views long, so boundaries happen
/// quickly in simulated time.
fn short_epoch_registry(max_rounds: u64) -> ForkRegistry {
    ForkRegistry::new(vec![ForkConfig {
        name: "genesis",
        min_epoch: Epoch::GENESIS,
        rules: RERules::new(
            "rules-v1",
            RulesConfig {
                max_rounds,
                ..RulesConfig::default()
            },
        ),
        predicate: None,
    }])
    .expect("valid registry")
}

fn short_epoch_config(max_rounds: u64) -> SimConfig {
    SimConfig {
        registry: Some(short_epoch_registry(max_rounds)),
        balances: vec![(10, 1_000), (11, 1_000)],
        ..SimConfig::default()
    }
}

#[test]
fn epochs_rotate_and_stay_consistent() {
    let mut runner = SimulationRunner::new(short_epoch_config(4));
    runner.run_for(Duration::from_secs(10));

    let reference_epoch = runner.node(0).epoch();
    assert!(
        reference_epoch >= Epoch(2),
        "epochs did not rotate: {reference_epoch}"
    );
    for node in 1..4 {
        // Everyone tracks the same epoch (within one boundary of skew).
        let epoch = runner.node(node).epoch();
        assert!(epoch.0.abs_diff(reference_epoch.0) <= 1, "node {node} is lost");
        // And the same validator set.
        assert_eq!(
            runner.node(node).get_validators().len(),
            runner.node(0).get_validators().len()
        );
    }
}

#[test]
fn rewards_grow_validator_power_across_boundaries() {
    let mut runner = SimulationRunner::new(short_epoch_config(4));
    let initial_power = runner.node(0).get_validators().total_power();

    runner.run_for(Duration::from_secs(10));
    assert!(runner.node(0).epoch() >= Epoch(2));

    // Completed proposals earn emission, so total power strictly grows.
    let grown_power = runner.node(0).get_validators().total_power();
    assert!(
        grown_power > initial_power,
        "rewards never materialized: {initial_power} -> {grown_power}"
    );
}

#[test]
fn offline_node_catches_up_through_ledger_sync() {
    let mut runner = SimulationRunner::new(short_epoch_config(4));
    runner.set_offline(3, true);

    // The network commits real transactions across several epochs.
    let store = runner.node(0).ledger().engine_store();
    let payload = transfer(
        store,
        &client_keypair(10),
        cascade_engine::REAddr::of_key(client_keypair(12).node_key()),
        U256::from(400u64),
    )
    .unwrap();
    let tx = Command::new(payload);
    for node in 0..3 {
        runner.submit_command(node, tx.clone());
    }
    runner.run_for(Duration::from_secs(10));

    let network_epoch = runner.node(0).epoch();
    assert!(network_epoch >= Epoch(2));
    assert!(runner.node(0).ledger().state_version() >= StateVersion(1));
    assert_eq!(runner.node(3).epoch(), Epoch(0), "offline node moved");

    // Rejoin: proposals from later epochs point sync at the gap; batches
    // arrive in order and replay the boundaries.
    runner.set_offline(3, false);
    runner.run_for(Duration::from_secs(20));

    let rejoined = runner.node(3);
    assert!(
        rejoined.epoch() >= network_epoch,
        "node 3 stuck at {}",
        rejoined.epoch()
    );
    assert_eq!(
        rejoined.ledger().last_proof().header().accumulator,
        runner.node(0).ledger().last_proof().header().accumulator,
        "accumulators diverge after sync"
    );
}

#[test]
fn candidate_fork_activates_on_stake_votes() {
    // Candidate fork at epoch 2 permitting transaction messages, requiring
    // two thirds of stake.
    let registry = ForkRegistry::new(vec![
        ForkConfig {
            name: "genesis",
            min_epoch: Epoch::GENESIS,
            rules: RERules::new(
                "rules-v1",
                RulesConfig {
                    max_rounds: 4,
                    ..RulesConfig::default()
                },
            ),
            predicate: None,
        },
        ForkConfig {
            name: "messages",
            min_epoch: Epoch(2),
            rules: RERules::new(
                "rules-v2",
                RulesConfig {
                    max_rounds: 4,
                    max_messages: 1,
                    ..RulesConfig::default()
                },
            ),
            predicate: Some(StakeVoting { required_bps: 6_667 }),
        },
    ])
    .expect("valid registry");

    let mut runner = SimulationRunner::new(SimConfig {
        registry: Some(registry.clone()),
        balances: vec![(10, 1_000)],
        node_config: NodeConfig::default(),
        ..SimConfig::default()
    });

    // Three of four equal-power validators record the vote hash: 75%.
    let (_, candidate) = registry.by_name("messages").unwrap();
    for index in 0..3 {
        let keypair = validator_keypair(index);
        let vote_hash = candidate.vote_hash(&keypair.node_key());
        let store = runner.node(0).ledger().engine_store();
        let payload = cast_fork_vote(store, &keypair, vote_hash).unwrap();
        let vote = Command::new(payload);
        for node in 0..4 {
            runner.submit_command(node, vote.clone());
        }
    }

    runner.run_for(Duration::from_secs(15));
    assert!(runner.node(0).epoch() >= Epoch(2), "never reached the fork epoch");

    // A transaction carrying a message is legal only under the new rules.
    let store = runner.node(0).ledger().engine_store();
    let input = {
        use cascade_engine::{EngineStore, Particle, SubstateTypeId};
        store
            .substates_of_type(SubstateTypeId::Tokens)
            .into_iter()
            .find_map(|(id, p)| match p {
                Particle::Tokens(t)
                    if t.owner
                        == cascade_engine::REAddr::of_key(client_keypair(10).node_key()) =>
                {
                    Some(id)
                }
                _ => None,
            })
            .expect("client balance exists")
    };
    let mut builder = TxnBuilder::new();
    builder
        .down(input)
        .up(cascade_engine::Particle::Tokens(
            cascade_engine::TokensInAccount {
                owner: cascade_engine::REAddr::of_key(client_keypair(11).node_key()),
                amount: U256::from(1_000u64),
            },
        ))
        .msg(b"fork is live".to_vec())
        .end();
    let message_tx = Command::new(builder.sign_and_build(&client_keypair(10)));

    let version_before = runner.node(0).ledger().state_version();
    for node in 0..4 {
        runner.submit_command(node, message_tx.clone());
    }
    runner.run_for(Duration::from_secs(10));

    assert!(
        runner.node(0).ledger().state_version() > version_before,
        "message transaction did not commit under the activated fork"
    );
    assert!(runner.rejections(0).is_empty() || !runner
        .rejections(0)
        .iter()
        .any(|(id, _)| *id == message_tx.id()));
}
