//! Consensus scenarios over the deterministic simulation.

use cascade_engine::transfer;
use cascade_ledger::chain_accumulator;
use cascade_simulation::{client_keypair, SimConfig, SimulationRunner};
use cascade_types::{leader_for, Command, Epoch, Hash, StateVersion, View, U256};
use std::collections::HashMap;
use std::time::Duration;
use tracing_test::traced_test;

fn config_with_balances() -> SimConfig {
    SimConfig {
        balances: vec![(10, 1_000), (11, 1_000)],
        ..SimConfig::default()
    }
}

fn transfer_command(runner: &SimulationRunner, from_seed: u8, to_seed: u8, amount: u64) -> Command {
    let store = runner.node(0).ledger().engine_store();
    let payload = transfer(
        store,
        &client_keypair(from_seed),
        cascade_engine::REAddr::of_key(client_keypair(to_seed).node_key()),
        U256::from(amount),
    )
    .expect("constructs");
    Command::new(payload)
}

fn submit_to_all(runner: &mut SimulationRunner, command: &Command) {
    for node in 0..4 {
        runner.submit_command(node, command.clone());
    }
}

/// Every pair of committed headers at the same (epoch, view) must be the
/// same header, across all nodes.
fn assert_no_conflicting_commits(runner: &SimulationRunner, nodes: &[usize]) {
    let mut seen: HashMap<(u64, u64), Hash> = HashMap::new();
    for node in nodes {
        for batch in runner.committed(*node) {
            let header = batch.proof.header();
            let key = (header.epoch.0, header.view.0);
            match seen.get(&key) {
                Some(accumulator) => assert_eq!(
                    *accumulator, header.accumulator,
                    "conflicting commit at epoch {} view {}",
                    key.0, key.1
                ),
                None => {
                    seen.insert(key, header.accumulator);
                }
            }
        }
    }
}

#[traced_test]
#[test]
fn happy_path_commits_a_transaction() {
    let mut runner = SimulationRunner::new(config_with_balances());
    let tx1 = transfer_command(&runner, 10, 11, 100);
    submit_to_all(&mut runner, &tx1);

    runner.run_for(Duration::from_secs(5));

    for node in 0..4 {
        let committed: Vec<_> = runner
            .committed(node)
            .iter()
            .flat_map(|batch| batch.commands.iter())
            .collect();
        assert_eq!(committed.len(), 1, "node {node} committed exactly tx1");
        assert_eq!(committed[0].id(), tx1.id());

        let ledger = runner.node(node).ledger();
        assert_eq!(ledger.state_version(), StateVersion(1));
        assert_eq!(
            ledger.last_proof().header().accumulator,
            chain_accumulator(Hash::ZERO, tx1.id()),
        );
    }
    assert_no_conflicting_commits(&runner, &[0, 1, 2, 3]);
}

#[test]
fn empty_proposals_advance_views_but_not_state() {
    let mut runner = SimulationRunner::new(SimConfig::default());
    runner.run_for(Duration::from_secs(3));

    for node in 0..4 {
        let machine = runner.node(node);
        // The chain grew well past genesis...
        assert!(
            machine.processor().vertex_store().root().view() > View(2),
            "node {node} never committed an empty vertex"
        );
        // ...without touching the ledger.
        assert_eq!(machine.ledger().state_version(), StateVersion(0));
    }
}

#[traced_test]
#[test]
fn silent_leader_is_skipped_without_a_commit_at_its_view() {
    let mut runner = SimulationRunner::new(config_with_balances());

    // Find the leader of view 2 and silence it from the start.
    let validators = runner.node(0).get_validators().clone();
    let silent_key = leader_for(&validators, Epoch::GENESIS, View(2));
    let silent = (0..4)
        .find(|i| runner.node_key(*i) == silent_key)
        .expect("leader is one of the nodes");
    runner.set_offline(silent, true);

    let tx1 = transfer_command(&runner, 10, 11, 100);
    for node in 0..4 {
        if node != silent {
            runner.submit_command(node, tx1.clone());
        }
    }

    // Base timeout is 3s; give the network time to ride through it.
    runner.run_for(Duration::from_secs(30));

    let online: Vec<usize> = (0..4).filter(|i| *i != silent).collect();
    for node in &online {
        let machine = runner.node(*node);
        // Liveness: the transaction still committed.
        assert_eq!(
            machine.ledger().state_version(),
            StateVersion(1),
            "node {node} did not ride through the silent leader"
        );
        // Safety: nothing committed at the silent view.
        for batch in runner.committed(*node) {
            assert_ne!(batch.proof.header().view, View(2));
        }
    }
    assert_no_conflicting_commits(&runner, &online);
}

#[test]
fn equivocating_leader_cannot_split_the_network() {
    let mut runner = SimulationRunner::new(config_with_balances());

    let validators = runner.node(0).get_validators().clone();
    let leader_key = leader_for(&validators, Epoch::GENESIS, View(1));
    let leader = (0..4)
        .find(|i| runner.node_key(*i) == leader_key)
        .expect("leader is one of the nodes");

    // Craft a conflicting view-1 proposal and race it to two nodes so they
    // vote for it before the honest proposal arrives.
    let genesis_qc = runner
        .node(leader)
        .processor()
        .vertex_store()
        .high_qc()
        .clone();
    let conflicting = cascade_messages::Proposal {
        vertex: cascade_types::Vertex::new(
            genesis_qc.clone(),
            View(1),
            Some(transfer_command(&runner, 11, 10, 7)),
            leader_key,
        ),
        high_committed_qc: genesis_qc,
        timeout_certificate: None,
    };
    let victims: Vec<usize> = (0..4).filter(|i| *i != leader).take(2).collect();
    for victim in &victims {
        runner.inject_message_at(
            leader,
            *victim,
            cascade_messages::Message::Proposal(conflicting.clone()),
            Duration::from_millis(1),
        );
    }

    let tx1 = transfer_command(&runner, 10, 11, 100);
    submit_to_all(&mut runner, &tx1);

    runner.run_for(Duration::from_secs(30));

    // No two QCs formed at view 1: every committed header is unique per
    // view, and all nodes converge on one history.
    assert_no_conflicting_commits(&runner, &[0, 1, 2, 3]);
    let reference = runner.node(0).ledger().last_proof().header().accumulator;
    for node in 1..4 {
        assert_eq!(
            runner.node(node).ledger().last_proof().header().accumulator,
            reference,
            "node {node} diverged"
        );
    }
    // The honest transaction still landed.
    assert!(runner.node(0).ledger().state_version() >= StateVersion(1));
}

#[test]
fn conflicting_spends_commit_exactly_once() {
    let mut runner = SimulationRunner::new(SimConfig {
        balances: vec![(10, 500)],
        ..SimConfig::default()
    });

    // Both transactions spend the same single input substate.
    let tx_first = transfer_command(&runner, 10, 11, 500);
    let tx_second = transfer_command(&runner, 10, 12, 500);
    assert_ne!(tx_first.id(), tx_second.id());
    submit_to_all(&mut runner, &tx_first);
    submit_to_all(&mut runner, &tx_second);

    runner.run_for(Duration::from_secs(10));

    for node in 0..4 {
        let committed: Vec<_> = runner
            .committed(node)
            .iter()
            .flat_map(|batch| batch.commands.iter().map(|c| c.id()))
            .collect();
        let firsts = committed.iter().filter(|id| **id == tx_first.id()).count();
        let seconds = committed.iter().filter(|id| **id == tx_second.id()).count();
        assert_eq!(
            firsts + seconds,
            1,
            "node {node} committed both sides of a double spend"
        );
        assert_eq!(runner.node(node).ledger().state_version(), StateVersion(1));
    }
}
