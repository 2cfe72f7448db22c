//! The Cascade constraint machine.
//!
//! A deterministic, UTXO-style transaction validator. Each transaction is a
//! sequence of substate instructions (UP/VDOWN/DOWN/LDOWN/READ/LREAD
//! grouped by END, optionally closed by SIG); validation runs a stateless
//! pass (structure, static checks, signer recovery) and a stateful pass
//! (spins, transition procedures, permissions) against a store snapshot.
//!
//! The active ruleset ([`RERules`]) is fork-governed: the [`ForkRegistry`]
//! decides at each epoch boundary, by schedule or stake-weighted vote,
//! which rules the next epoch runs under.

mod addressing;
mod construct;
mod forks;
mod instructions;
mod machine;
mod parser;
mod particles;
mod procedures;
mod rules;
mod scrypts;
mod store;

pub use addressing::{REAddr, SubstateId, SubstateTypeId};
pub use construct::{
    cast_fork_vote, epoch_update, genesis, prepare_stake, prepare_unstake, transfer,
    ConstructError, EpochTransaction, ProposalStats, TxnBuilder,
};
pub use forks::{ForkConfig, ForkRegistry, ForkRegistryError, StakeVoting};
pub use instructions::{encode_instructions, REInstruction, REOp};
pub use machine::{CmError, ConstraintMachine, ParsedTxn};
pub use parser::{stateless_verify, StatelessVerification};
pub use particles::{
    EpochData, ExittingStake, Particle, ParticleKind, PreparedOwnerUpdate, PreparedRakeUpdate,
    PreparedRegisteredUpdate, PreparedStake, PreparedUnstake, RoundData, StakeArithmeticError,
    StakeOwnership, TokensInAccount, ValidatorBftData, ValidatorStakeData,
    ValidatorSystemMetadata, RAKE_MAX_BPS,
};
pub use procedures::{
    OpSide, PermissionLevel, Procedure, ProcedureError, ReducerKind, ReducerOutcome,
    ReducerState, SignatureRule, TransitionToken, TxAction,
};
pub use rules::{RERules, RulesConfig};
pub use scrypts::epoch::{split_rake, validator_reward, EpochPhaseKind, EpochUpdate, RoundUpdate};
pub use store::{CmStore, EngineStore, InMemoryEngineStore, StateUpdate, TransientStore};

/// The default fork registry: the genesis ruleset plus a candidate fork
/// that permits transaction messages once voted in.
pub fn default_fork_registry() -> ForkRegistry {
    ForkRegistry::new(vec![
        ForkConfig {
            name: "genesis",
            min_epoch: cascade_types::Epoch::GENESIS,
            rules: RERules::new("rules-v1", RulesConfig::default()),
            predicate: None,
        },
        ForkConfig {
            name: "messages",
            min_epoch: cascade_types::Epoch(10),
            rules: RERules::new(
                "rules-v2",
                RulesConfig {
                    max_messages: 1,
                    ..RulesConfig::default()
                },
            ),
            predicate: Some(StakeVoting { required_bps: 6_667 }),
        },
    ])
    .expect("default registry is valid")
}
