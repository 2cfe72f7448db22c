//! Shared fixtures for the engine integration tests.

use cascade_engine::{
    genesis, ConstraintMachine, EngineStore, InMemoryEngineStore, ParsedTxn, PermissionLevel,
    REAddr, RERules, RulesConfig,
};
use cascade_types::test_utils::test_keypair;
use cascade_types::{KeyPair, U256};

pub fn keypair(seed: u8) -> KeyPair {
    test_keypair(seed)
}

pub fn account(seed: u8) -> REAddr {
    REAddr::of_key(test_keypair(seed).node_key())
}

pub fn rules() -> RERules {
    RERules::new("rules-v1", RulesConfig::default())
}

/// Validate under the given permission and apply to the store.
pub fn execute(
    store: &mut InMemoryEngineStore,
    rules: &RERules,
    payload: &[u8],
    permission: PermissionLevel,
) -> ParsedTxn {
    let parsed = ConstraintMachine::new(rules)
        .validate(&*store, payload, permission)
        .expect("transaction validates");
    store.apply(&parsed.updates);
    parsed
}

/// A store booted with the given validator stakes and account balances
/// (seed, amount) pairs.
pub fn booted_store(
    validator_seeds: &[(u8, u64)],
    balance_seeds: &[(u8, u64)],
) -> InMemoryEngineStore {
    let validators: Vec<_> = validator_seeds
        .iter()
        .map(|(seed, stake)| (test_keypair(*seed).node_key(), U256::from(*stake)))
        .collect();
    let balances: Vec<_> = balance_seeds
        .iter()
        .map(|(seed, amount)| (account(*seed), U256::from(*amount)))
        .collect();

    let mut store = InMemoryEngineStore::new();
    let rules = rules();
    let payload = genesis(&validators, &balances);
    execute(&mut store, &rules, &payload, PermissionLevel::System);
    store
}

/// Total token balance of an account.
pub fn balance_of(store: &InMemoryEngineStore, owner: REAddr) -> U256 {
    store
        .substates_of_type(cascade_engine::SubstateTypeId::Tokens)
        .into_iter()
        .filter_map(|(_, particle)| match particle {
            cascade_engine::Particle::Tokens(tokens) if tokens.owner == owner => {
                Some(tokens.amount)
            }
            _ => None,
        })
        .fold(U256::zero(), |acc, amount| acc + amount)
}
