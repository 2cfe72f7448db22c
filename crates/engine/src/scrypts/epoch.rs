//! System constraint scrypt: round bookkeeping and the epoch boundary.
//!
//! Both transactions here run at `PermissionLevel::System` and are built
//! deterministically from store state, so every honest node constructs the
//! identical byte stream and validation reduces to structural equality.
//!
//! The epoch-boundary reducer walks a fixed phase progression. Phases a
//! transaction has no work for are skipped implicitly: the first instruction
//! belonging to a later phase fast-forwards the reducer, verifying each
//! intermediate phase completed cleanly.

use crate::addressing::REAddr;
use crate::particles::{
    Particle, ParticleKind, PreparedOwnerUpdate, PreparedRakeUpdate, PreparedRegisteredUpdate,
    ValidatorBftData, ValidatorStakeData, RAKE_MAX_BPS,
};
use crate::procedures::{
    OpSide, Procedure, ProcedureError, ReducerKind, ReducerOutcome, ReducerState, TransitionToken,
    TxAction,
};
use crate::rules::RulesConfig;
use cascade_types::{NodeKey, U256};
use std::collections::{BTreeMap, BTreeSet};

/// A round update in progress: the previous round is closed, proposal
/// counters may be adjusted, and the new round opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundUpdate {
    pub prev_view: u64,
    /// A downed proposal counter awaiting its incremented replacement.
    pub pending_bft: Option<ValidatorBftData>,
}

/// Reward a validator earns for the epoch, zero when it missed too many
/// proposals. Shared by the reducer and the boundary constructor.
pub fn validator_reward(config: &RulesConfig, bft: &ValidatorBftData) -> U256 {
    let total = bft.proposals_completed + bft.proposals_missed;
    if total == 0 {
        return U256::zero();
    }
    let completed_bps = bft.proposals_completed * 10_000 / total;
    if completed_bps < config.min_completed_proposals_bps {
        return U256::zero();
    }
    config
        .rewards_per_proposal
        .saturating_mul(U256::from(bft.proposals_completed))
}

/// Split a reward into (validator rake, delegators' emission).
pub fn split_rake(reward: U256, rake_bps: u64) -> (U256, U256) {
    let rake = reward * U256::from(rake_bps) / U256::from(RAKE_MAX_BPS);
    (rake, reward - rake)
}

/// The epoch-boundary phase progression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EpochPhase {
    /// EpochData downed; awaiting the closing RoundData down.
    Closing,
    /// Matured exits are downed, then unlocked into tokens.
    ProcessExittingStake {
        exits: BTreeMap<Vec<u8>, crate::particles::ExittingStake>,
    },
    /// Proposal counters are downed, then rewarded stakes loaded.
    RewardingValidators {
        bft: BTreeMap<NodeKey, ValidatorBftData>,
    },
    /// Prepared unstakes are downed and converted into exits.
    PreparingUnstake {
        pending: BTreeMap<NodeKey, BTreeMap<REAddr, U256>>,
        current: Option<(NodeKey, BTreeMap<REAddr, U256>)>,
    },
    /// Prepared stakes (and rake rewards) are converted into ownership.
    PreparingStake {
        current: Option<(NodeKey, BTreeMap<REAddr, U256>)>,
    },
    /// Queued rake changes fold into the stake data.
    PreparingRakeUpdate { pending: Option<PreparedRakeUpdate> },
    /// Queued owner changes fold into the stake data.
    PreparingOwnerUpdate { pending: Option<PreparedOwnerUpdate> },
    /// Queued registration changes fold into the stake data.
    PreparingRegisteredUpdate {
        pending: Option<PreparedRegisteredUpdate>,
    },
    /// Every touched stake is written back, in key order.
    UpdatingValidatorStakes,
    /// Fresh proposal counters for the next epoch's validators.
    CreatingNextValidatorSet { seen: BTreeSet<NodeKey> },
    /// The next EpochData goes up.
    UpdatingEpoch,
    /// The next epoch's RoundData(0) goes up, completing the group.
    StartingEpochRound,
}

/// Discriminant of the epoch phases, used in transition dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EpochPhaseKind {
    Closing,
    ProcessExittingStake,
    RewardingValidators,
    PreparingUnstake,
    PreparingStake,
    PreparingRakeUpdate,
    PreparingOwnerUpdate,
    PreparingRegisteredUpdate,
    UpdatingValidatorStakes,
    CreatingNextValidatorSet,
    UpdatingEpoch,
    StartingEpochRound,
}

impl EpochPhase {
    fn kind(&self) -> EpochPhaseKind {
        match self {
            EpochPhase::Closing => EpochPhaseKind::Closing,
            EpochPhase::ProcessExittingStake { .. } => EpochPhaseKind::ProcessExittingStake,
            EpochPhase::RewardingValidators { .. } => EpochPhaseKind::RewardingValidators,
            EpochPhase::PreparingUnstake { .. } => EpochPhaseKind::PreparingUnstake,
            EpochPhase::PreparingStake { .. } => EpochPhaseKind::PreparingStake,
            EpochPhase::PreparingRakeUpdate { .. } => EpochPhaseKind::PreparingRakeUpdate,
            EpochPhase::PreparingOwnerUpdate { .. } => EpochPhaseKind::PreparingOwnerUpdate,
            EpochPhase::PreparingRegisteredUpdate { .. } => {
                EpochPhaseKind::PreparingRegisteredUpdate
            }
            EpochPhase::UpdatingValidatorStakes => EpochPhaseKind::UpdatingValidatorStakes,
            EpochPhase::CreatingNextValidatorSet { .. } => EpochPhaseKind::CreatingNextValidatorSet,
            EpochPhase::UpdatingEpoch => EpochPhaseKind::UpdatingEpoch,
            EpochPhase::StartingEpochRound => EpochPhaseKind::StartingEpochRound,
        }
    }
}

/// The epoch-boundary reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochUpdate {
    prev_epoch: u64,
    /// Stakes loaded (downed) so far, keyed by validator, with all pending
    /// mutations applied.
    cur_stake: BTreeMap<NodeKey, ValidatorStakeData>,
    /// Stake to mint ownership for in the staking phase: user prepared
    /// stakes plus validator rakes, keyed (delegate, owner).
    preparing_stake: BTreeMap<NodeKey, BTreeMap<REAddr, U256>>,
    phase: EpochPhase,
}

impl EpochUpdate {
    fn new(prev_epoch: u64) -> Self {
        EpochUpdate {
            prev_epoch,
            cur_stake: BTreeMap::new(),
            preparing_stake: BTreeMap::new(),
            phase: EpochPhase::Closing,
        }
    }

    pub fn phase_kind(&self) -> EpochPhaseKind {
        self.phase.kind()
    }

    /// The phase an epoch-transaction instruction belongs to, or `None` for
    /// instructions the current phase must handle itself (stake loads).
    fn target_phase(side: OpSide, particle: ParticleKind) -> Option<EpochPhaseKind> {
        Some(match (side, particle) {
            (OpSide::Down, ParticleKind::ExittingStake) => EpochPhaseKind::ProcessExittingStake,
            (OpSide::Up, ParticleKind::Tokens) => EpochPhaseKind::ProcessExittingStake,
            (OpSide::Down, ParticleKind::ValidatorBftData) => EpochPhaseKind::RewardingValidators,
            (OpSide::Down, ParticleKind::PreparedUnstake) => EpochPhaseKind::PreparingUnstake,
            (OpSide::Up, ParticleKind::ExittingStake) => EpochPhaseKind::PreparingUnstake,
            (OpSide::Down, ParticleKind::PreparedStake) => EpochPhaseKind::PreparingStake,
            (OpSide::Up, ParticleKind::StakeOwnership) => EpochPhaseKind::PreparingStake,
            (OpSide::Down, ParticleKind::PreparedRakeUpdate) => EpochPhaseKind::PreparingRakeUpdate,
            (OpSide::Down, ParticleKind::PreparedOwnerUpdate) => {
                EpochPhaseKind::PreparingOwnerUpdate
            }
            (OpSide::Down, ParticleKind::PreparedRegisteredUpdate) => {
                EpochPhaseKind::PreparingRegisteredUpdate
            }
            (OpSide::Up, ParticleKind::ValidatorStake) => EpochPhaseKind::UpdatingValidatorStakes,
            (OpSide::Up, ParticleKind::ValidatorBftData) => {
                EpochPhaseKind::CreatingNextValidatorSet
            }
            (OpSide::Up, ParticleKind::EpochData) => EpochPhaseKind::UpdatingEpoch,
            (OpSide::Up, ParticleKind::RoundData) => EpochPhaseKind::StartingEpochRound,
            _ => return None,
        })
    }

    /// Verify the current phase has no outstanding work and enter `target`.
    fn fast_forward(
        &mut self,
        config: &RulesConfig,
        target: EpochPhaseKind,
    ) -> Result<(), ProcedureError> {
        while self.phase.kind() < target {
            self.phase = match std::mem::replace(&mut self.phase, EpochPhase::UpdatingEpoch) {
                EpochPhase::Closing => {
                    return Err(ProcedureError::new("round must be closed first"));
                }
                EpochPhase::ProcessExittingStake { exits } => {
                    if !exits.is_empty() {
                        return Err(ProcedureError::new("unprocessed exitting stake"));
                    }
                    EpochPhase::RewardingValidators {
                        bft: BTreeMap::new(),
                    }
                }
                EpochPhase::RewardingValidators { bft } => {
                    if bft
                        .values()
                        .any(|data| !validator_reward(config, data).is_zero())
                    {
                        return Err(ProcedureError::new("unrewarded validator with rewards due"));
                    }
                    EpochPhase::PreparingUnstake {
                        pending: BTreeMap::new(),
                        current: None,
                    }
                }
                EpochPhase::PreparingUnstake { pending, current } => {
                    if !pending.is_empty() || current.is_some() {
                        return Err(ProcedureError::new("unprocessed prepared unstake"));
                    }
                    EpochPhase::PreparingStake { current: None }
                }
                EpochPhase::PreparingStake { current } => {
                    if !self.preparing_stake.is_empty() || current.is_some() {
                        return Err(ProcedureError::new("unprocessed prepared stake"));
                    }
                    EpochPhase::PreparingRakeUpdate { pending: None }
                }
                EpochPhase::PreparingRakeUpdate { pending } => {
                    if pending.is_some() {
                        return Err(ProcedureError::new("unapplied rake update"));
                    }
                    EpochPhase::PreparingOwnerUpdate { pending: None }
                }
                EpochPhase::PreparingOwnerUpdate { pending } => {
                    if pending.is_some() {
                        return Err(ProcedureError::new("unapplied owner update"));
                    }
                    EpochPhase::PreparingRegisteredUpdate { pending: None }
                }
                EpochPhase::PreparingRegisteredUpdate { pending } => {
                    if pending.is_some() {
                        return Err(ProcedureError::new("unapplied registration update"));
                    }
                    EpochPhase::UpdatingValidatorStakes
                }
                EpochPhase::UpdatingValidatorStakes => {
                    if !self.cur_stake.is_empty() {
                        return Err(ProcedureError::new("stakes not written back"));
                    }
                    EpochPhase::CreatingNextValidatorSet {
                        seen: BTreeSet::new(),
                    }
                }
                EpochPhase::CreatingNextValidatorSet { .. } => EpochPhase::UpdatingEpoch,
                EpochPhase::UpdatingEpoch | EpochPhase::StartingEpochRound => {
                    return Err(ProcedureError::new("cannot skip the epoch data update"));
                }
            };
        }
        if self.phase.kind() != target {
            return Err(ProcedureError::new("instruction out of phase order"));
        }
        Ok(())
    }

    /// Load a downed validator stake into the working set.
    fn load_stake(&mut self, stake: ValidatorStakeData) -> Result<(), ProcedureError> {
        let key = stake.validator;
        if self.cur_stake.insert(key, stake).is_some() {
            return Err(ProcedureError::new("validator stake downed twice"));
        }
        Ok(())
    }

    /// One step of the epoch progression.
    fn step(
        mut self: Box<Self>,
        config: &RulesConfig,
        side: OpSide,
        particle: Particle,
    ) -> Result<ReducerOutcome, ProcedureError> {
        // Stake loads are claimed by whichever phase is current.
        if side == OpSide::Down && particle.kind() == ParticleKind::ValidatorStake {
            return self.step_stake_down(config, particle);
        }

        let target = Self::target_phase(side, particle.kind())
            .ok_or_else(|| ProcedureError::new("instruction not part of an epoch update"))?;
        self.fast_forward(config, target)?;

        match (&mut self.phase, side, particle) {
            (EpochPhase::ProcessExittingStake { exits }, OpSide::Down, Particle::ExittingStake(exit)) => {
                if exit.epoch_unlocked != self.prev_epoch + 1 {
                    return Err(ProcedureError::new("exit is not yet unlockable"));
                }
                let key = Particle::ExittingStake(exit.clone()).to_bytes();
                if exits.insert(key, exit).is_some() {
                    return Err(ProcedureError::new("exit downed twice"));
                }
            }
            (EpochPhase::ProcessExittingStake { exits }, OpSide::Up, Particle::Tokens(tokens)) => {
                let Some((first_key, _)) = exits.iter().next().map(|(k, v)| (k.clone(), v.clone()))
                else {
                    return Err(ProcedureError::new("no exit awaiting unlock"));
                };
                let exit = exits.remove(&first_key).expect("first key exists");
                if exit.unlock() != tokens {
                    return Err(ProcedureError::new("unlock does not match exit"));
                }
            }
            (EpochPhase::RewardingValidators { bft }, OpSide::Down, Particle::ValidatorBftData(data)) => {
                if bft.insert(data.validator, data).is_some() {
                    return Err(ProcedureError::new("proposal counter downed twice"));
                }
            }
            (
                EpochPhase::PreparingUnstake { pending, .. },
                OpSide::Down,
                Particle::PreparedUnstake(unstake),
            ) => {
                let by_owner = pending.entry(unstake.delegate).or_default();
                let total = by_owner.entry(unstake.owner).or_insert_with(U256::zero);
                *total = total
                    .checked_add(unstake.amount)
                    .ok_or_else(|| ProcedureError::new("unstake overflow"))?;
            }
            (
                EpochPhase::PreparingUnstake { pending, current },
                OpSide::Up,
                Particle::ExittingStake(exit),
            ) => {
                if current.is_none() {
                    let Some((delegate, owners)) =
                        pending.iter().next().map(|(k, v)| (*k, v.clone()))
                    else {
                        return Err(ProcedureError::new("no unstake awaiting exit"));
                    };
                    pending.remove(&delegate);
                    *current = Some((delegate, owners));
                }
                let (delegate, owners) = current.as_mut().expect("current set above");
                let stake = self
                    .cur_stake
                    .get(delegate)
                    .ok_or_else(|| ProcedureError::new("validator stake not loaded"))?;
                let (owner, amount) = owners
                    .iter()
                    .next()
                    .map(|(k, v)| (*k, *v))
                    .ok_or_else(|| ProcedureError::new("no owner awaiting exit"))?;
                owners.remove(&owner);
                let unlock_epoch = self.prev_epoch + 1 + config.unstaking_epoch_delay;
                let (next_stake, expected_exit) = stake
                    .unstake_ownership(owner, amount, unlock_epoch)
                    .map_err(|e| ProcedureError::new(e.to_string()))?;
                if exit != expected_exit {
                    return Err(ProcedureError::new("exit does not match unstake"));
                }
                let delegate = *delegate;
                let owners_empty = owners.is_empty();
                self.cur_stake.insert(delegate, next_stake);
                if owners_empty {
                    if let EpochPhase::PreparingUnstake { current, .. } = &mut self.phase {
                        *current = None;
                    }
                }
            }
            (EpochPhase::PreparingStake { .. }, OpSide::Down, Particle::PreparedStake(stake)) => {
                let by_owner = self.preparing_stake.entry(stake.delegate).or_default();
                let total = by_owner.entry(stake.owner).or_insert_with(U256::zero);
                *total = total
                    .checked_add(stake.amount)
                    .ok_or_else(|| ProcedureError::new("stake overflow"))?;
            }
            (
                EpochPhase::PreparingStake { current },
                OpSide::Up,
                Particle::StakeOwnership(ownership),
            ) => {
                if current.is_none() {
                    let Some((delegate, owners)) = self
                        .preparing_stake
                        .iter()
                        .next()
                        .map(|(k, v)| (*k, v.clone()))
                    else {
                        return Err(ProcedureError::new("no stake awaiting ownership"));
                    };
                    self.preparing_stake.remove(&delegate);
                    *current = Some((delegate, owners));
                }
                let (delegate, owners) = current.as_mut().expect("current set above");
                let stake = self
                    .cur_stake
                    .get(delegate)
                    .ok_or_else(|| ProcedureError::new("validator stake not loaded"))?;
                let (owner, amount) = owners
                    .iter()
                    .next()
                    .map(|(k, v)| (*k, *v))
                    .ok_or_else(|| ProcedureError::new("no owner awaiting ownership"))?;
                owners.remove(&owner);
                let (next_stake, expected_ownership) = stake
                    .stake(owner, amount)
                    .map_err(|e| ProcedureError::new(e.to_string()))?;
                if ownership != expected_ownership {
                    return Err(ProcedureError::new("ownership does not match stake"));
                }
                let delegate = *delegate;
                let owners_empty = owners.is_empty();
                self.cur_stake.insert(delegate, next_stake);
                if owners_empty {
                    if let EpochPhase::PreparingStake { current } = &mut self.phase {
                        *current = None;
                    }
                }
            }
            (
                EpochPhase::PreparingRakeUpdate { pending },
                OpSide::Down,
                Particle::PreparedRakeUpdate(update),
            ) => {
                if pending.is_some() {
                    return Err(ProcedureError::new("rake update already pending"));
                }
                match self.cur_stake.get_mut(&update.validator) {
                    Some(stake) => stake.rake_bps = update.rake_bps,
                    None => *pending = Some(update),
                }
            }
            (
                EpochPhase::PreparingOwnerUpdate { pending },
                OpSide::Down,
                Particle::PreparedOwnerUpdate(update),
            ) => {
                if pending.is_some() {
                    return Err(ProcedureError::new("owner update already pending"));
                }
                match self.cur_stake.get_mut(&update.validator) {
                    Some(stake) => stake.owner = update.owner,
                    None => *pending = Some(update),
                }
            }
            (
                EpochPhase::PreparingRegisteredUpdate { pending },
                OpSide::Down,
                Particle::PreparedRegisteredUpdate(update),
            ) => {
                if pending.is_some() {
                    return Err(ProcedureError::new("registration update already pending"));
                }
                match self.cur_stake.get_mut(&update.validator) {
                    Some(stake) => stake.registered = update.registered,
                    None => *pending = Some(update),
                }
            }
            (EpochPhase::UpdatingValidatorStakes, OpSide::Up, Particle::ValidatorStake(stake)) => {
                let Some((key, expected)) =
                    self.cur_stake.iter().next().map(|(k, v)| (*k, v.clone()))
                else {
                    return Err(ProcedureError::new("no stake awaiting write-back"));
                };
                if stake.validator != key || stake != expected {
                    return Err(ProcedureError::new("stake write-back mismatch"));
                }
                self.cur_stake.remove(&key);
            }
            (
                EpochPhase::CreatingNextValidatorSet { seen },
                OpSide::Up,
                Particle::ValidatorBftData(data),
            ) => {
                if data.proposals_completed != 0 || data.proposals_missed != 0 {
                    return Err(ProcedureError::new("next-epoch counters must be zero"));
                }
                if !seen.insert(data.validator) {
                    return Err(ProcedureError::new("validator already in next set"));
                }
            }
            (EpochPhase::UpdatingEpoch, OpSide::Up, Particle::EpochData(data)) => {
                if data.epoch != self.prev_epoch + 1 {
                    return Err(ProcedureError::new("wrong next epoch"));
                }
                self.phase = EpochPhase::StartingEpochRound;
            }
            (EpochPhase::StartingEpochRound, OpSide::Up, Particle::RoundData(round)) => {
                if round.view != 0 {
                    return Err(ProcedureError::new("next epoch must start at round zero"));
                }
                return Ok(ReducerOutcome::Complete(TxAction::NextEpoch {
                    epoch: self.prev_epoch + 1,
                }));
            }
            _ => return Err(ProcedureError::new("instruction out of phase order")),
        }

        Ok(ReducerOutcome::Continue(ReducerState::Epoch(self)))
    }

    /// Handle a `DOWN ValidatorStakeData` in whichever phase needs it.
    fn step_stake_down(
        mut self: Box<Self>,
        config: &RulesConfig,
        particle: Particle,
    ) -> Result<ReducerOutcome, ProcedureError> {
        let Particle::ValidatorStake(stake) = particle else {
            unreachable!("checked by caller");
        };
        match &mut self.phase {
            EpochPhase::RewardingValidators { bft } => {
                // Pop unrewarded counters until the one this stake pays out.
                loop {
                    let Some((key, data)) = bft.iter().next().map(|(k, v)| (*k, v.clone())) else {
                        return Err(ProcedureError::new("no validator awaiting rewards"));
                    };
                    bft.remove(&key);
                    let reward = validator_reward(config, &data);
                    if reward.is_zero() {
                        continue;
                    }
                    if key != stake.validator {
                        return Err(ProcedureError::new("rewards must follow key order"));
                    }
                    let (rake, emission) = split_rake(reward, stake.rake_bps);
                    if !rake.is_zero() {
                        let by_owner = self.preparing_stake.entry(key).or_default();
                        let total = by_owner.entry(stake.owner).or_insert_with(U256::zero);
                        *total = total
                            .checked_add(rake)
                            .ok_or_else(|| ProcedureError::new("rake overflow"))?;
                    }
                    let rewarded = stake
                        .add_emission(emission)
                        .map_err(|e| ProcedureError::new(e.to_string()))?;
                    self.load_stake(rewarded)?;
                    break;
                }
            }
            EpochPhase::PreparingUnstake { pending, current } => {
                if current.is_some() {
                    return Err(ProcedureError::new("unstake in progress"));
                }
                let Some(expected) = pending.keys().next().copied() else {
                    return Err(ProcedureError::new("no unstake awaiting this stake"));
                };
                if expected != stake.validator {
                    return Err(ProcedureError::new("stake load out of key order"));
                }
                self.load_stake(stake)?;
            }
            EpochPhase::PreparingStake { current } => {
                if current.is_some() {
                    return Err(ProcedureError::new("staking in progress"));
                }
                let Some(expected) = self.preparing_stake.keys().next().copied() else {
                    return Err(ProcedureError::new("no stake awaiting this load"));
                };
                if expected != stake.validator {
                    return Err(ProcedureError::new("stake load out of key order"));
                }
                self.load_stake(stake)?;
            }
            EpochPhase::PreparingRakeUpdate { pending } => {
                let Some(update) = pending.take() else {
                    return Err(ProcedureError::new("no rake update awaiting this stake"));
                };
                if update.validator != stake.validator {
                    return Err(ProcedureError::new("rake update key mismatch"));
                }
                let mut stake = stake;
                stake.rake_bps = update.rake_bps;
                self.load_stake(stake)?;
            }
            EpochPhase::PreparingOwnerUpdate { pending } => {
                let Some(update) = pending.take() else {
                    return Err(ProcedureError::new("no owner update awaiting this stake"));
                };
                if update.validator != stake.validator {
                    return Err(ProcedureError::new("owner update key mismatch"));
                }
                let mut stake = stake;
                stake.owner = update.owner;
                self.load_stake(stake)?;
            }
            EpochPhase::PreparingRegisteredUpdate { pending } => {
                let Some(update) = pending.take() else {
                    return Err(ProcedureError::new(
                        "no registration update awaiting this stake",
                    ));
                };
                if update.validator != stake.validator {
                    return Err(ProcedureError::new("registration update key mismatch"));
                }
                let mut stake = stake;
                stake.registered = update.registered;
                self.load_stake(stake)?;
            }
            _ => {
                return Err(ProcedureError::new(
                    "stake load outside a stake-mutating phase",
                ))
            }
        }
        Ok(ReducerOutcome::Continue(ReducerState::Epoch(self)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Round update procedures
// ═══════════════════════════════════════════════════════════════════════════

fn down_round_data(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    _state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::RoundData(round) = particle else {
        return Err(ProcedureError::new("expected round data"));
    };
    Ok(ReducerOutcome::Continue(ReducerState::RoundUpdate(
        RoundUpdate {
            prev_view: round.view,
            pending_bft: None,
        },
    )))
}

fn round_down_bft(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::ValidatorBftData(data) = particle else {
        return Err(ProcedureError::new("expected proposal counter"));
    };
    let Some(ReducerState::RoundUpdate(mut round)) = state else {
        return Err(ProcedureError::new("expected round update state"));
    };
    if round.pending_bft.is_some() {
        return Err(ProcedureError::new("proposal counter already downed"));
    }
    round.pending_bft = Some(data);
    Ok(ReducerOutcome::Continue(ReducerState::RoundUpdate(round)))
}

fn round_up_bft(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::ValidatorBftData(next) = particle else {
        return Err(ProcedureError::new("expected proposal counter"));
    };
    let Some(ReducerState::RoundUpdate(mut round)) = state else {
        return Err(ProcedureError::new("expected round update state"));
    };
    let Some(prev) = round.pending_bft.take() else {
        return Err(ProcedureError::new("no downed proposal counter"));
    };
    if next.validator != prev.validator {
        return Err(ProcedureError::new("proposal counter key mismatch"));
    }
    if next.proposals_completed < prev.proposals_completed
        || next.proposals_missed < prev.proposals_missed
        || (next.proposals_completed == prev.proposals_completed
            && next.proposals_missed == prev.proposals_missed)
    {
        return Err(ProcedureError::new("proposal counters must advance"));
    }
    Ok(ReducerOutcome::Continue(ReducerState::RoundUpdate(round)))
}

fn round_up_round_data(
    config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::RoundData(next) = particle else {
        return Err(ProcedureError::new("expected round data"));
    };
    let Some(ReducerState::RoundUpdate(round)) = state else {
        return Err(ProcedureError::new("expected round update state"));
    };
    if round.pending_bft.is_some() {
        return Err(ProcedureError::new("proposal counter left downed"));
    }
    if next.view < round.prev_view {
        return Err(ProcedureError::new("round must not regress"));
    }
    if next.view > config.max_rounds {
        return Err(ProcedureError::new("round past the epoch's max rounds"));
    }
    Ok(ReducerOutcome::Complete(TxAction::NextRound {
        view: next.view,
    }))
}

// ═══════════════════════════════════════════════════════════════════════════
// Epoch boundary procedures
// ═══════════════════════════════════════════════════════════════════════════

fn down_epoch_data(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    _state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::EpochData(epoch) = particle else {
        return Err(ProcedureError::new("expected epoch data"));
    };
    Ok(ReducerOutcome::Continue(ReducerState::Epoch(Box::new(
        EpochUpdate::new(epoch.epoch),
    ))))
}

fn close_round_for_epoch(
    config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::RoundData(round) = particle else {
        return Err(ProcedureError::new("expected round data"));
    };
    let Some(ReducerState::Epoch(mut update)) = state else {
        return Err(ProcedureError::new("expected epoch update state"));
    };
    if round.view > config.max_rounds {
        return Err(ProcedureError::new("closing round past max rounds"));
    }
    if update.phase != EpochPhase::Closing {
        return Err(ProcedureError::new("round already closed"));
    }
    update.phase = EpochPhase::ProcessExittingStake {
        exits: BTreeMap::new(),
    };
    Ok(ReducerOutcome::Continue(ReducerState::Epoch(update)))
}

fn epoch_step(
    config: &RulesConfig,
    side: OpSide,
    particle: Particle,
    state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Some(ReducerState::Epoch(update)) = state else {
        return Err(ProcedureError::new("expected epoch update state"));
    };
    update.step(config, side, particle)
}

fn genesis_epoch_data(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    _state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::EpochData(epoch) = particle else {
        return Err(ProcedureError::new("expected epoch data"));
    };
    Ok(ReducerOutcome::Complete(TxAction::NextEpoch {
        epoch: epoch.epoch,
    }))
}

fn genesis_round_data(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    _state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::RoundData(round) = particle else {
        return Err(ProcedureError::new("expected round data"));
    };
    Ok(ReducerOutcome::Complete(TxAction::NextRound {
        view: round.view,
    }))
}

/// Procedure lookup for the system scrypt.
pub fn procedure_for(token: &TransitionToken) -> Option<Procedure> {
    match (token.side, token.particle, token.reducer) {
        // Round update.
        (OpSide::Down, ParticleKind::RoundData, ReducerKind::Void) => {
            Some(Procedure::system(down_round_data))
        }
        (OpSide::Down, ParticleKind::ValidatorBftData, ReducerKind::RoundUpdate) => {
            Some(Procedure::system(round_down_bft))
        }
        (OpSide::Up, ParticleKind::ValidatorBftData, ReducerKind::RoundUpdate) => {
            Some(Procedure::system(round_up_bft))
        }
        (OpSide::Up, ParticleKind::RoundData, ReducerKind::RoundUpdate) => {
            Some(Procedure::system(round_up_round_data))
        }

        // Epoch boundary entry.
        (OpSide::Down, ParticleKind::EpochData, ReducerKind::Void) => {
            Some(Procedure::system(down_epoch_data))
        }
        (OpSide::Down, ParticleKind::RoundData, ReducerKind::Epoch(EpochPhaseKind::Closing)) => {
            Some(Procedure::system(close_round_for_epoch))
        }

        // Every other epoch instruction flows through the phase machine.
        (_, _, ReducerKind::Epoch(_)) => Some(Procedure::system(epoch_step)),

        // Genesis boot of the system substates.
        (OpSide::Up, ParticleKind::EpochData, ReducerKind::Void) => {
            Some(Procedure::system(genesis_epoch_data))
        }
        (OpSide::Up, ParticleKind::RoundData, ReducerKind::Void) => {
            Some(Procedure::system(genesis_round_data))
        }
        _ => None,
    }
}
