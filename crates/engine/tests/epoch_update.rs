//! Epoch-boundary transaction: construction, validation and effects.

mod common;

use cascade_engine::{
    epoch_update, prepare_stake, prepare_unstake, CmError, ConstraintMachine, EngineStore,
    Particle, PermissionLevel, ProposalStats, RoundData, RulesConfig, SubstateTypeId, TxnBuilder,
};
use cascade_engine::EpochData;
use cascade_types::{NodeKey, U256};
use common::{account, balance_of, booted_store, execute, keypair, rules};
use std::collections::BTreeMap;

fn current_epoch(store: &cascade_engine::InMemoryEngineStore) -> u64 {
    store
        .substates_of_type(SubstateTypeId::EpochData)
        .into_iter()
        .find_map(|(_, p)| match p {
            Particle::EpochData(EpochData { epoch }) => Some(epoch),
            _ => None,
        })
        .expect("epoch data exists")
}

fn current_view(store: &cascade_engine::InMemoryEngineStore) -> u64 {
    store
        .substates_of_type(SubstateTypeId::RoundData)
        .into_iter()
        .find_map(|(_, p)| match p {
            Particle::RoundData(RoundData { view, .. }) => Some(view),
            _ => None,
        })
        .expect("round data exists")
}

fn no_stats() -> BTreeMap<NodeKey, ProposalStats> {
    BTreeMap::new()
}

fn run_boundary(
    store: &mut cascade_engine::InMemoryEngineStore,
    stats: &BTreeMap<NodeKey, ProposalStats>,
) -> cascade_engine::EpochTransaction {
    let rules = rules();
    let boundary = epoch_update(&*store, rules.config(), 1_000, 1, stats).unwrap();
    execute(store, &rules, &boundary.payload, PermissionLevel::System);
    boundary
}

#[test]
fn empty_boundary_rotates_epoch_and_round() {
    let mut store = booted_store(&[(1, 100), (2, 200)], &[]);

    let boundary = run_boundary(&mut store, &no_stats());

    assert_eq!(current_epoch(&store), 1);
    assert_eq!(current_view(&store), 0);
    // Nothing staked or unstaked: the set carries over.
    let keys: Vec<_> = boundary
        .next_validator_set
        .iter()
        .map(|(k, p)| (*k, *p))
        .collect();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&(keypair(1).node_key(), U256::from(100u64))));
    assert!(keys.contains(&(keypair(2).node_key(), U256::from(200u64))));
}

#[test]
fn prepared_stake_joins_at_the_boundary() {
    let mut store = booted_store(&[(1, 100), (2, 200)], &[(10, 1_000)]);
    let rules = rules();

    let payload = prepare_stake(
        &store,
        &keypair(10),
        keypair(1).node_key(),
        U256::from(500u64),
    )
    .unwrap();
    execute(&mut store, &rules, &payload, PermissionLevel::User);

    let boundary = run_boundary(&mut store, &no_stats());

    assert!(boundary
        .next_validator_set
        .contains(&(keypair(1).node_key(), U256::from(600u64))));

    // Ownership was minted to the staker at par (100 stake / 100 ownership).
    let minted = store
        .substates_of_type(SubstateTypeId::StakeOwnership)
        .into_iter()
        .any(|(_, p)| {
            matches!(
                p,
                Particle::StakeOwnership(o)
                    if o.owner == account(10) && o.amount == U256::from(500u64)
            )
        });
    assert!(minted);
}

#[test]
fn unstake_exits_after_the_unstaking_delay() {
    let mut store = booted_store(&[(1, 100), (2, 200)], &[(10, 1_000)]);
    let rules = rules();

    let payload = prepare_stake(
        &store,
        &keypair(10),
        keypair(1).node_key(),
        U256::from(500u64),
    )
    .unwrap();
    execute(&mut store, &rules, &payload, PermissionLevel::User);
    run_boundary(&mut store, &no_stats()); // epoch 1: stake active

    let payload = prepare_unstake(
        &store,
        &keypair(10),
        keypair(1).node_key(),
        U256::from(500u64),
    )
    .unwrap();
    execute(&mut store, &rules, &payload, PermissionLevel::User);

    run_boundary(&mut store, &no_stats()); // epoch 2: exit created, unlockable at 3
    assert_eq!(balance_of(&store, account(10)), U256::from(500u64));

    run_boundary(&mut store, &no_stats()); // epoch 3: exit unlocks
    assert_eq!(balance_of(&store, account(10)), U256::from(1_000u64));
}

#[test]
fn completed_proposals_earn_rewards() {
    let mut store = booted_store(&[(1, 100), (2, 200)], &[]);

    // Validator 1 completed the epoch's only proposal.
    let mut stats = no_stats();
    stats.insert(
        keypair(1).node_key(),
        ProposalStats {
            completed: 1,
            missed: 0,
        },
    );
    let boundary = run_boundary(&mut store, &stats);

    // 10 per completed proposal, no rake: stake grows by 10.
    assert!(boundary
        .next_validator_set
        .contains(&(keypair(1).node_key(), U256::from(110u64))));
    assert!(boundary
        .next_validator_set
        .contains(&(keypair(2).node_key(), U256::from(200u64))));
}

#[test]
fn missed_proposals_forfeit_rewards() {
    let mut store = booted_store(&[(1, 100), (2, 200)], &[]);

    // Validator 1 misses its round, validator 2 completes one: 50%
    // completion is below the reward threshold for validator 1.
    let mut stats = no_stats();
    stats.insert(
        keypair(1).node_key(),
        ProposalStats {
            completed: 1,
            missed: 1,
        },
    );
    stats.insert(
        keypair(2).node_key(),
        ProposalStats {
            completed: 1,
            missed: 0,
        },
    );
    let boundary = run_boundary(&mut store, &stats);

    assert!(boundary
        .next_validator_set
        .contains(&(keypair(1).node_key(), U256::from(100u64))));
    assert!(boundary
        .next_validator_set
        .contains(&(keypair(2).node_key(), U256::from(210u64))));
}

#[test]
fn round_past_max_rounds_is_rejected() {
    let store = booted_store(&[(1, 100)], &[]);
    let config = RulesConfig {
        max_rounds: 5,
        ..RulesConfig::default()
    };
    let strict = cascade_engine::RERules::new("strict", config);

    // A hand-built round update jumping past the epoch's view bound.
    let round_id = store
        .substates_of_type(SubstateTypeId::RoundData)
        .into_iter()
        .map(|(id, _)| id)
        .next()
        .unwrap();
    let mut builder = TxnBuilder::new();
    builder
        .down(round_id)
        .up(Particle::RoundData(RoundData {
            view: 6,
            timestamp_ms: 500,
        }))
        .end();

    let err = ConstraintMachine::new(&strict)
        .validate(&store, &builder.build_unsigned(), PermissionLevel::System)
        .unwrap_err();
    assert!(matches!(err, CmError::TransitionPrecondition { .. }));
}

#[test]
fn boundary_clamps_the_closing_view() {
    let mut store = booted_store(&[(1, 100)], &[]);
    let rules = rules();

    // A closing view past max_rounds is clamped, not rejected.
    let boundary = epoch_update(&store, rules.config(), 1_000, u64::MAX, &no_stats()).unwrap();
    execute(&mut store, &rules, &boundary.payload, PermissionLevel::System);
    assert_eq!(current_epoch(&store), 1);
    assert_eq!(current_view(&store), 0);
}

#[test]
fn replayed_boundary_is_a_spin_conflict() {
    let mut store = booted_store(&[(1, 100), (2, 200)], &[]);
    let rules = rules();

    let boundary = epoch_update(&store, rules.config(), 1_000, 1, &no_stats()).unwrap();
    execute(&mut store, &rules, &boundary.payload, PermissionLevel::System);

    // Re-running the identical boundary against the new state fails: the
    // downed substates are gone.
    let err = ConstraintMachine::new(&rules)
        .validate(&store, &boundary.payload, PermissionLevel::System)
        .unwrap_err();
    assert!(matches!(err, CmError::SpinConflict { .. }));
}

#[test]
fn user_cannot_run_the_boundary() {
    let store = booted_store(&[(1, 100)], &[]);
    let rules = rules();

    let boundary = epoch_update(&store, rules.config(), 1_000, 1, &no_stats()).unwrap();
    let err = ConstraintMachine::new(&rules)
        .validate(&store, &boundary.payload, PermissionLevel::User)
        .unwrap_err();
    assert!(matches!(err, CmError::InvalidExecutionPermission { .. }));
}
