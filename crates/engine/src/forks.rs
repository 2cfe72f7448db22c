//! Fork registry and candidate fork voting.
//!
//! Forks are ordered by minimum epoch. A scheduled fork activates when its
//! epoch arrives; a candidate fork additionally needs a stake-weighted vote
//! recorded in the validators' on-chain metadata. At most one fork
//! activates per epoch boundary, atomically with the epoch swap.

use crate::addressing::SubstateTypeId;
use crate::particles::Particle;
use crate::rules::RERules;
use crate::store::EngineStore;
use cascade_types::{Epoch, Hash, NodeKey, U256, ValidatorSet};
use tracing::{debug, info};

/// A stake-weighted voting threshold for a candidate fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeVoting {
    /// Required vote power in basis points of total power.
    pub required_bps: u64,
}

/// One fork: a named ruleset plus its activation condition.
#[derive(Debug, Clone)]
pub struct ForkConfig {
    pub name: &'static str,
    pub min_epoch: Epoch,
    pub rules: RERules,
    /// `None` for scheduled forks; `Some` for candidates that need votes.
    pub predicate: Option<StakeVoting>,
}

impl ForkConfig {
    /// The hash a validator writes into its metadata to vote for this fork.
    pub fn vote_hash(&self, validator: &NodeKey) -> [u8; 32] {
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(validator.as_bytes());
        data.extend_from_slice(self.name.as_bytes());
        data.extend_from_slice(self.rules.name().as_bytes());
        data.extend_from_slice(&self.min_epoch.0.to_be_bytes());
        Hash::sha256(&data).to_bytes()
    }
}

/// Errors validating a fork registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForkRegistryError {
    #[error("fork registry is empty")]
    Empty,
    #[error("first fork must be scheduled at epoch 0")]
    BadGenesisFork,
    #[error("fork min epochs must be strictly increasing")]
    UnorderedForks,
    #[error("duplicate fork name {0}")]
    DuplicateName(&'static str),
}

/// The ordered set of known forks.
#[derive(Debug, Clone)]
pub struct ForkRegistry {
    forks: Vec<ForkConfig>,
}

impl ForkRegistry {
    pub fn new(forks: Vec<ForkConfig>) -> Result<Self, ForkRegistryError> {
        let first = forks.first().ok_or(ForkRegistryError::Empty)?;
        if first.min_epoch != Epoch::GENESIS || first.predicate.is_some() {
            return Err(ForkRegistryError::BadGenesisFork);
        }
        for pair in forks.windows(2) {
            if pair[1].min_epoch <= pair[0].min_epoch {
                return Err(ForkRegistryError::UnorderedForks);
            }
        }
        for (i, fork) in forks.iter().enumerate() {
            if forks[..i].iter().any(|f| f.name == fork.name) {
                return Err(ForkRegistryError::DuplicateName(fork.name));
            }
        }
        Ok(ForkRegistry { forks })
    }

    pub fn forks(&self) -> &[ForkConfig] {
        &self.forks
    }

    pub fn fork(&self, index: usize) -> &ForkConfig {
        &self.forks[index]
    }

    pub fn by_name(&self, name: &str) -> Option<(usize, &ForkConfig)> {
        self.forks
            .iter()
            .enumerate()
            .find(|(_, fork)| fork.name == name)
    }

    /// Evaluate the boundary into `next_epoch`: given the currently active
    /// fork, decide whether the next fork activates. Returns the new active
    /// index.
    ///
    /// `store` is the post-boundary engine state and `next_set` the next
    /// epoch's validator set; candidate votes are counted over both.
    pub fn evaluate_boundary(
        &self,
        active: usize,
        next_epoch: Epoch,
        store: &dyn EngineStore,
        next_set: &ValidatorSet,
    ) -> usize {
        let Some(candidate) = self.forks.get(active + 1) else {
            return active;
        };
        if next_epoch < candidate.min_epoch {
            return active;
        }
        match candidate.predicate {
            None => {
                info!(fork = candidate.name, epoch = next_epoch.0, "scheduled fork activates");
                active + 1
            }
            Some(voting) => {
                if self.candidate_has_votes(candidate, voting, store, next_set) {
                    info!(fork = candidate.name, epoch = next_epoch.0, "candidate fork activates");
                    active + 1
                } else {
                    debug!(fork = candidate.name, epoch = next_epoch.0, "candidate fork lacks votes");
                    active
                }
            }
        }
    }

    fn candidate_has_votes(
        &self,
        candidate: &ForkConfig,
        voting: StakeVoting,
        store: &dyn EngineStore,
        next_set: &ValidatorSet,
    ) -> bool {
        let mut vote_power = U256::zero();
        for (_, particle) in store.substates_of_type(SubstateTypeId::SystemMetadata) {
            let Particle::SystemMetadata(metadata) = particle else {
                continue;
            };
            if !next_set.contains(&metadata.validator) {
                continue;
            }
            if metadata.data != candidate.vote_hash(&metadata.validator) {
                continue;
            }
            // Set powers are overflow-checked at construction.
            vote_power += next_set.power_of(&metadata.validator);
        }

        // total * bps / 10000, split so stake sums near 2^256-1 cannot
        // overflow the multiplication.
        let bps = U256::from(voting.required_bps);
        let denominator = U256::from(10_000u64);
        let required = (next_set.total_power() / denominator) * bps
            + (next_set.total_power() % denominator) * bps / denominator;

        debug!(
            fork = candidate.name,
            votes = %vote_power,
            required = %required,
            "counted fork votes"
        );
        vote_power >= required
    }
}
