//! Candidate fork voting over validator metadata.

mod common;

use cascade_engine::{
    cast_fork_vote, default_fork_registry, CmError, ConstraintMachine, PermissionLevel,
};
use cascade_types::test_utils::test_validator_set;
use cascade_types::Epoch;
use common::{booted_store, execute, keypair, rules};

#[test]
fn registry_rejects_bad_orderings() {
    use cascade_engine::{ForkConfig, ForkRegistry, ForkRegistryError, RERules, RulesConfig};

    let fork = |name, min_epoch| ForkConfig {
        name,
        min_epoch: Epoch(min_epoch),
        rules: RERules::new(name, RulesConfig::default()),
        predicate: None,
    };

    assert_eq!(
        ForkRegistry::new(vec![]).unwrap_err(),
        ForkRegistryError::Empty
    );
    assert_eq!(
        ForkRegistry::new(vec![fork("a", 1)]).unwrap_err(),
        ForkRegistryError::BadGenesisFork
    );
    assert_eq!(
        ForkRegistry::new(vec![fork("a", 0), fork("b", 5), fork("c", 5)]).unwrap_err(),
        ForkRegistryError::UnorderedForks
    );
    assert!(ForkRegistry::new(vec![fork("a", 0), fork("b", 5)]).is_ok());
}

#[test]
fn candidate_activates_with_two_thirds_of_stake() {
    // Validators 1..4 with equal power; 3 of 4 vote: 75% >= 66.67%.
    let mut store = booted_store(&[(1, 100), (2, 100), (3, 100), (4, 100)], &[]);
    let rules = rules();
    let registry = default_fork_registry();
    let (_, candidate) = registry.by_name("messages").unwrap();

    for seed in [1u8, 2, 3] {
        let kp = keypair(seed);
        let vote = candidate.vote_hash(&kp.node_key());
        let payload = cast_fork_vote(&store, &kp, vote).unwrap();
        execute(&mut store, &rules, &payload, PermissionLevel::User);
    }

    let next_set = test_validator_set(&[(1, 100), (2, 100), (3, 100), (4, 100)]);
    assert_eq!(registry.evaluate_boundary(0, Epoch(10), &store, &next_set), 1);
}

#[test]
fn candidate_stays_dormant_below_threshold() {
    let mut store = booted_store(&[(1, 100), (2, 100), (3, 100), (4, 100)], &[]);
    let rules = rules();
    let registry = default_fork_registry();
    let (_, candidate) = registry.by_name("messages").unwrap();

    // Only half the power votes.
    for seed in [1u8, 2] {
        let kp = keypair(seed);
        let vote = candidate.vote_hash(&kp.node_key());
        let payload = cast_fork_vote(&store, &kp, vote).unwrap();
        execute(&mut store, &rules, &payload, PermissionLevel::User);
    }

    let next_set = test_validator_set(&[(1, 100), (2, 100), (3, 100), (4, 100)]);
    assert_eq!(registry.evaluate_boundary(0, Epoch(10), &store, &next_set), 0);
}

#[test]
fn candidate_waits_for_its_minimum_epoch() {
    let mut store = booted_store(&[(1, 100)], &[]);
    let rules = rules();
    let registry = default_fork_registry();
    let (_, candidate) = registry.by_name("messages").unwrap();

    let kp = keypair(1);
    let payload = cast_fork_vote(&store, &kp, candidate.vote_hash(&kp.node_key())).unwrap();
    execute(&mut store, &rules, &payload, PermissionLevel::User);

    let next_set = test_validator_set(&[(1, 100)]);
    // Full support, but the epoch is too early.
    assert_eq!(registry.evaluate_boundary(0, Epoch(9), &store, &next_set), 0);
    assert_eq!(registry.evaluate_boundary(0, Epoch(10), &store, &next_set), 1);
}

#[test]
fn wrong_vote_hash_does_not_count() {
    let mut store = booted_store(&[(1, 100)], &[]);
    let rules = rules();
    let registry = default_fork_registry();

    let kp = keypair(1);
    let payload = cast_fork_vote(&store, &kp, [0xab; 32]).unwrap();
    execute(&mut store, &rules, &payload, PermissionLevel::User);

    let next_set = test_validator_set(&[(1, 100)]);
    assert_eq!(registry.evaluate_boundary(0, Epoch(10), &store, &next_set), 0);
}

#[test]
fn activated_rules_change_what_validates() {
    // A transaction with a message is illegal under the genesis rules and
    // legal under the "messages" fork rules.
    let store = booted_store(&[(1, 100)], &[(10, 100)]);
    let registry = default_fork_registry();

    let mut builder = cascade_engine::TxnBuilder::new();
    let input = {
        use cascade_engine::{EngineStore, Particle, SubstateTypeId};
        store
            .substates_of_type(SubstateTypeId::Tokens)
            .into_iter()
            .find_map(|(id, p)| match p {
                Particle::Tokens(_) => Some(id),
                _ => None,
            })
            .unwrap()
    };
    builder
        .down(input)
        .up(cascade_engine::Particle::Tokens(
            cascade_engine::TokensInAccount {
                owner: common::account(11),
                amount: cascade_types::U256::from(100u64),
            },
        ))
        .msg(b"hello".to_vec())
        .end();
    let payload = builder.sign_and_build(&keypair(10));

    let v1 = &registry.fork(0).rules;
    let err = ConstraintMachine::new(v1)
        .validate(&store, &payload, PermissionLevel::User)
        .unwrap_err();
    assert!(matches!(err, CmError::TooManyMessages { .. }));

    let v2 = &registry.fork(1).rules;
    assert!(ConstraintMachine::new(v2)
        .validate(&store, &payload, PermissionLevel::User)
        .is_ok());
}
