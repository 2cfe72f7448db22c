//! Transaction construction.
//!
//! User transactions are built from store scans and signed; system
//! transactions (genesis, round updates, the epoch boundary) are pure
//! functions of the store, so every validator constructs byte-identical
//! payloads and proposal validation reduces to structural equality.

use crate::addressing::{REAddr, SubstateId, SubstateTypeId};
use crate::instructions::{encode_instructions, REInstruction};
use crate::particles::{
    EpochData, ExittingStake, Particle, PreparedStake, PreparedUnstake, RoundData,
    TokensInAccount, ValidatorBftData, ValidatorStakeData, ValidatorSystemMetadata,
};
use crate::rules::RulesConfig;
use crate::scrypts::epoch::{split_rake, validator_reward};
use crate::store::EngineStore;
use cascade_types::{Hash, KeyPair, NodeKey, U256};
use std::collections::BTreeMap;

/// Errors from transaction construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstructError {
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: U256, need: U256 },
    #[error("no stake ownership of {amount} for that delegate")]
    NoMatchingOwnership { amount: U256 },
    #[error("store is missing the {0:?} system substate")]
    MissingSystemSubstate(SubstateTypeId),
    #[error("stake arithmetic failed: {0}")]
    StakeArithmetic(String),
}

/// Incremental builder over the instruction stream.
#[derive(Default)]
pub struct TxnBuilder {
    instructions: Vec<REInstruction>,
}

impl TxnBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn up(&mut self, particle: Particle) -> &mut Self {
        self.instructions.push(REInstruction::Up { particle });
        self
    }

    /// The ordinal the next UP instruction will get (LDOWN addressing).
    pub fn up_count(&self) -> u32 {
        self.instructions
            .iter()
            .filter(|i| matches!(i, REInstruction::Up { .. }))
            .count() as u32
    }

    pub fn down(&mut self, id: SubstateId) -> &mut Self {
        self.instructions.push(REInstruction::Down { id });
        self
    }

    pub fn vdown(&mut self, particle: Particle) -> &mut Self {
        self.instructions.push(REInstruction::VDown { particle });
        self
    }

    pub fn ldown(&mut self, index: u32) -> &mut Self {
        self.instructions.push(REInstruction::LDown { index });
        self
    }

    pub fn read(&mut self, id: SubstateId) -> &mut Self {
        self.instructions.push(REInstruction::Read { id });
        self
    }

    pub fn msg(&mut self, data: Vec<u8>) -> &mut Self {
        self.instructions.push(REInstruction::Msg { data });
        self
    }

    pub fn end(&mut self) -> &mut Self {
        self.instructions.push(REInstruction::End);
        self
    }

    /// Finish without a signature (system transactions).
    pub fn build_unsigned(&self) -> Vec<u8> {
        encode_instructions(&self.instructions)
    }

    /// Sign the stream and finish. The signature covers the double SHA-256
    /// of every preceding byte.
    pub fn sign_and_build(&self, key: &KeyPair) -> Vec<u8> {
        let mut payload = encode_instructions(&self.instructions);
        let hash = Hash::sha256_twice(&payload);
        REInstruction::Sig {
            signature: key.sign(&hash),
        }
        .encode_into(&mut payload);
        payload
    }
}

/// Tokens owned by an address, smallest substate id first.
fn tokens_of(store: &dyn EngineStore, owner: REAddr) -> Vec<(SubstateId, TokensInAccount)> {
    store
        .substates_of_type(SubstateTypeId::Tokens)
        .into_iter()
        .filter_map(|(id, particle)| match particle {
            Particle::Tokens(tokens) if tokens.owner == owner => Some((id, tokens)),
            _ => None,
        })
        .collect()
}

/// Gather inputs covering `needed`, returning the downed ids and the change.
fn cover(
    store: &dyn EngineStore,
    owner: REAddr,
    needed: U256,
) -> Result<(Vec<SubstateId>, U256), ConstructError> {
    let mut gathered = U256::zero();
    let mut inputs = Vec::new();
    for (id, tokens) in tokens_of(store, owner) {
        inputs.push(id);
        gathered = gathered.saturating_add(tokens.amount);
        if gathered >= needed {
            return Ok((inputs, gathered - needed));
        }
    }
    Err(ConstructError::InsufficientBalance {
        have: gathered,
        need: needed,
    })
}

/// A signed transfer of `amount` to `to`.
pub fn transfer(
    store: &dyn EngineStore,
    from: &KeyPair,
    to: REAddr,
    amount: U256,
) -> Result<Vec<u8>, ConstructError> {
    let from_addr = REAddr::of_key(from.node_key());
    let (inputs, change) = cover(store, from_addr, amount)?;
    let mut builder = TxnBuilder::new();
    for id in inputs {
        builder.down(id);
    }
    builder.up(Particle::Tokens(TokensInAccount { owner: to, amount }));
    if !change.is_zero() {
        builder.up(Particle::Tokens(TokensInAccount {
            owner: from_addr,
            amount: change,
        }));
    }
    builder.end();
    Ok(builder.sign_and_build(from))
}

/// A signed stake preparation: `amount` tokens toward `delegate`.
pub fn prepare_stake(
    store: &dyn EngineStore,
    owner: &KeyPair,
    delegate: NodeKey,
    amount: U256,
) -> Result<Vec<u8>, ConstructError> {
    let owner_addr = REAddr::of_key(owner.node_key());
    let (inputs, change) = cover(store, owner_addr, amount)?;
    let mut builder = TxnBuilder::new();
    for id in inputs {
        builder.down(id);
    }
    builder.up(Particle::PreparedStake(PreparedStake {
        delegate,
        owner: owner_addr,
        amount,
    }));
    if !change.is_zero() {
        builder.up(Particle::Tokens(TokensInAccount {
            owner: owner_addr,
            amount: change,
        }));
    }
    builder.end();
    Ok(builder.sign_and_build(owner))
}

/// A signed unstake preparation for one whole ownership substate.
pub fn prepare_unstake(
    store: &dyn EngineStore,
    owner: &KeyPair,
    delegate: NodeKey,
    amount: U256,
) -> Result<Vec<u8>, ConstructError> {
    let owner_addr = REAddr::of_key(owner.node_key());
    let ownership = store
        .substates_of_type(SubstateTypeId::StakeOwnership)
        .into_iter()
        .find_map(|(id, particle)| match particle {
            Particle::StakeOwnership(o)
                if o.delegate == delegate && o.owner == owner_addr && o.amount == amount =>
            {
                Some(id)
            }
            _ => None,
        })
        .ok_or(ConstructError::NoMatchingOwnership { amount })?;

    let mut builder = TxnBuilder::new();
    builder
        .down(ownership)
        .up(Particle::PreparedUnstake(PreparedUnstake {
            delegate,
            owner: owner_addr,
            amount,
        }))
        .end();
    Ok(builder.sign_and_build(owner))
}

/// A signed fork vote: writes `vote_hash` into the validator's metadata.
pub fn cast_fork_vote(
    store: &dyn EngineStore,
    validator: &KeyPair,
    vote_hash: [u8; 32],
) -> Result<Vec<u8>, ConstructError> {
    let key = validator.node_key();
    let existing = store
        .substates_of_type(SubstateTypeId::SystemMetadata)
        .into_iter()
        .find_map(|(id, particle)| match particle {
            Particle::SystemMetadata(m) if m.validator == key => Some(id),
            _ => None,
        });

    let mut builder = TxnBuilder::new();
    match existing {
        Some(id) => builder.down(id),
        None => builder.vdown(Particle::SystemMetadata(ValidatorSystemMetadata {
            validator: key,
            data: [0u8; 32],
        })),
    };
    builder
        .up(Particle::SystemMetadata(ValidatorSystemMetadata {
            validator: key,
            data: vote_hash,
        }))
        .end();
    Ok(builder.sign_and_build(validator))
}

/// The genesis transaction: boots validators, balances and the system
/// substates for epoch 0.
pub fn genesis(
    validators: &[(NodeKey, U256)],
    balances: &[(REAddr, U256)],
) -> Vec<u8> {
    let mut builder = TxnBuilder::new();
    let mut sorted: Vec<_> = validators.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, stake) in &sorted {
        let owner = REAddr::of_key(*key);
        builder
            .up(Particle::ValidatorStake(ValidatorStakeData {
                validator: *key,
                total_stake: *stake,
                total_ownership: *stake,
                rake_bps: 0,
                owner,
                registered: true,
            }))
            .end();
        builder
            .up(Particle::StakeOwnership(crate::particles::StakeOwnership {
                delegate: *key,
                owner,
                amount: *stake,
            }))
            .end();
        builder
            .up(Particle::ValidatorBftData(ValidatorBftData {
                validator: *key,
                proposals_completed: 0,
                proposals_missed: 0,
            }))
            .end();
    }
    for (owner, amount) in balances {
        builder
            .up(Particle::Tokens(TokensInAccount {
                owner: *owner,
                amount: *amount,
            }))
            .end();
    }
    builder.up(Particle::EpochData(EpochData { epoch: 0 })).end();
    builder
        .up(Particle::RoundData(RoundData {
            view: 0,
            timestamp_ms: 0,
        }))
        .end();
    builder.build_unsigned()
}

fn single_system_substate(
    store: &dyn EngineStore,
    type_id: SubstateTypeId,
) -> Result<(SubstateId, Particle), ConstructError> {
    store
        .substates_of_type(type_id)
        .into_iter()
        .next()
        .ok_or(ConstructError::MissingSystemSubstate(type_id))
}

/// One validator's proposal statistics for the closing epoch.
///
/// Derived by each node from the committed vertex chain; folded into the
/// proposal counters by the boundary transaction's round-closure group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProposalStats {
    pub completed: u64,
    pub missed: u64,
}

/// The constructed epoch-boundary transaction plus the validator set it
/// installs for the next epoch.
#[derive(Debug, Clone)]
pub struct EpochTransaction {
    pub payload: Vec<u8>,
    pub next_validator_set: Vec<(NodeKey, U256)>,
}

/// Build the epoch-boundary system transaction from the store.
///
/// Two groups: a round closure folding `stats` into the proposal counters,
/// then the boundary progression. The instruction order mirrors the
/// reducer's phases exactly; a divergent construction fails validation.
pub fn epoch_update(
    store: &dyn EngineStore,
    config: &RulesConfig,
    timestamp_ms: u64,
    closing_view: u64,
    stats: &BTreeMap<NodeKey, ProposalStats>,
) -> Result<EpochTransaction, ConstructError> {
    let (epoch_id, epoch_particle) = single_system_substate(store, SubstateTypeId::EpochData)?;
    let Particle::EpochData(EpochData { epoch: prev_epoch }) = epoch_particle else {
        return Err(ConstructError::MissingSystemSubstate(SubstateTypeId::EpochData));
    };
    let (round_id, round_particle) = single_system_substate(store, SubstateTypeId::RoundData)?;
    let Particle::RoundData(prev_round) = round_particle else {
        return Err(ConstructError::MissingSystemSubstate(SubstateTypeId::RoundData));
    };

    let mut builder = TxnBuilder::new();

    // Where each proposal counter lives after the round closure: the store,
    // or a fresh local substate for validators whose stats advanced.
    enum BftSource {
        Store(SubstateId),
        Local(u32),
    }

    let stored_bft: BTreeMap<NodeKey, (SubstateId, ValidatorBftData)> = store
        .substates_of_type(SubstateTypeId::ValidatorBftData)
        .into_iter()
        .filter_map(|(id, particle)| match particle {
            Particle::ValidatorBftData(data) => Some((data.validator, (id, data))),
            _ => None,
        })
        .collect();

    // ── Group 1: close the round, folding in the proposal statistics ──────
    builder.down(round_id);
    let mut bft_sources: BTreeMap<NodeKey, (BftSource, ValidatorBftData)> = BTreeMap::new();
    for (key, (id, data)) in &stored_bft {
        let delta = stats.get(key).copied().unwrap_or_default();
        if delta.completed == 0 && delta.missed == 0 {
            bft_sources.insert(*key, (BftSource::Store(*id), data.clone()));
            continue;
        }
        let updated = ValidatorBftData {
            validator: *key,
            proposals_completed: data.proposals_completed + delta.completed,
            proposals_missed: data.proposals_missed + delta.missed,
        };
        builder.down(*id);
        let ordinal = builder.up_count();
        builder.up(Particle::ValidatorBftData(updated.clone()));
        bft_sources.insert(*key, (BftSource::Local(ordinal), updated));
    }
    let closing_round = RoundData {
        view: closing_view.clamp(prev_round.view, config.max_rounds),
        timestamp_ms,
    };
    let closed_round_ordinal = builder.up_count();
    builder.up(Particle::RoundData(closing_round)).end();

    // ── Group 2: the boundary progression ──────────────────────────────────
    builder.down(epoch_id).ldown(closed_round_ordinal);

    // Working mirrors of the reducer's state.
    let mut cur_stake: BTreeMap<NodeKey, ValidatorStakeData> = BTreeMap::new();
    let mut preparing_stake: BTreeMap<NodeKey, BTreeMap<REAddr, U256>> = BTreeMap::new();

    let stake_substates: BTreeMap<NodeKey, (SubstateId, ValidatorStakeData)> = store
        .substates_of_type(SubstateTypeId::ValidatorStake)
        .into_iter()
        .filter_map(|(id, particle)| match particle {
            Particle::ValidatorStake(stake) => Some((stake.validator, (id, stake))),
            _ => None,
        })
        .collect();

    // Loading a stake downs its physical substate, or VDOWNs the virtual
    // initial state for validators nobody staked to yet.
    let mut load_stake = |builder: &mut TxnBuilder,
                          cur_stake: &mut BTreeMap<NodeKey, ValidatorStakeData>,
                          key: NodeKey|
     -> ValidatorStakeData {
        match stake_substates.get(&key) {
            Some((id, stake)) => {
                builder.down(*id);
                cur_stake.insert(key, stake.clone());
                stake.clone()
            }
            None => {
                let initial = ValidatorStakeData::initial(key);
                builder.vdown(Particle::ValidatorStake(initial.clone()));
                cur_stake.insert(key, initial.clone());
                initial
            }
        }
    };

    // ── Exitting stake ─────────────────────────────────────────────────────
    let mut exits: BTreeMap<Vec<u8>, (SubstateId, ExittingStake)> = store
        .substates_of_type(SubstateTypeId::ExittingStake)
        .into_iter()
        .filter_map(|(id, particle)| match particle {
            Particle::ExittingStake(exit) if exit.epoch_unlocked == prev_epoch + 1 => {
                Some((Particle::ExittingStake(exit.clone()).to_bytes(), (id, exit)))
            }
            _ => None,
        })
        .collect();
    for (id, _) in exits.values() {
        builder.down(*id);
    }
    for (_, exit) in std::mem::take(&mut exits).into_values() {
        builder.up(Particle::Tokens(exit.unlock()));
    }

    // ── Rewards ────────────────────────────────────────────────────────────
    for (source, _) in bft_sources.values() {
        match source {
            BftSource::Store(id) => builder.down(*id),
            BftSource::Local(ordinal) => builder.ldown(*ordinal),
        };
    }
    for (key, (_, data)) in &bft_sources {
        let reward = validator_reward(config, data);
        if reward.is_zero() {
            continue;
        }
        let stake = load_stake(&mut builder, &mut cur_stake, *key);
        let (rake, emission) = split_rake(reward, stake.rake_bps);
        if !rake.is_zero() {
            let by_owner = preparing_stake.entry(*key).or_default();
            let total = by_owner.entry(stake.owner).or_insert_with(U256::zero);
            *total = total.saturating_add(rake);
        }
        let rewarded = stake
            .add_emission(emission)
            .map_err(|e| ConstructError::StakeArithmetic(e.to_string()))?;
        cur_stake.insert(*key, rewarded);
    }

    // ── Unstakes ───────────────────────────────────────────────────────────
    let mut unstake_pending: BTreeMap<NodeKey, BTreeMap<REAddr, U256>> = BTreeMap::new();
    let mut unstake_substates: Vec<(Vec<u8>, SubstateId, PreparedUnstake)> = store
        .substates_of_type(SubstateTypeId::PreparedUnstake)
        .into_iter()
        .filter_map(|(id, particle)| match particle {
            Particle::PreparedUnstake(unstake) => {
                Some((Particle::PreparedUnstake(unstake.clone()).to_bytes(), id, unstake))
            }
            _ => None,
        })
        .collect();
    unstake_substates.sort_by(|a, b| a.0.cmp(&b.0));
    for (_, id, unstake) in &unstake_substates {
        builder.down(*id);
        let by_owner = unstake_pending.entry(unstake.delegate).or_default();
        let total = by_owner.entry(unstake.owner).or_insert_with(U256::zero);
        *total = total.saturating_add(unstake.amount);
    }
    for (delegate, owners) in unstake_pending {
        let mut stake = match cur_stake.get(&delegate) {
            Some(stake) => stake.clone(),
            None => load_stake(&mut builder, &mut cur_stake, delegate),
        };
        for (owner, amount) in owners {
            let unlock_epoch = prev_epoch + 1 + config.unstaking_epoch_delay;
            let (next_stake, exit) = stake
                .unstake_ownership(owner, amount, unlock_epoch)
                .map_err(|e| ConstructError::StakeArithmetic(e.to_string()))?;
            builder.up(Particle::ExittingStake(exit));
            stake = next_stake;
        }
        cur_stake.insert(delegate, stake);
    }

    // ── Stakes ─────────────────────────────────────────────────────────────
    let mut stake_prepared: Vec<(Vec<u8>, SubstateId, PreparedStake)> = store
        .substates_of_type(SubstateTypeId::PreparedStake)
        .into_iter()
        .filter_map(|(id, particle)| match particle {
            Particle::PreparedStake(stake) => {
                Some((Particle::PreparedStake(stake.clone()).to_bytes(), id, stake))
            }
            _ => None,
        })
        .collect();
    stake_prepared.sort_by(|a, b| a.0.cmp(&b.0));
    for (_, id, stake) in &stake_prepared {
        builder.down(*id);
        let by_owner = preparing_stake.entry(stake.delegate).or_default();
        let total = by_owner.entry(stake.owner).or_insert_with(U256::zero);
        *total = total.saturating_add(stake.amount);
    }
    for (delegate, owners) in std::mem::take(&mut preparing_stake) {
        let mut stake = match cur_stake.get(&delegate) {
            Some(stake) => stake.clone(),
            None => load_stake(&mut builder, &mut cur_stake, delegate),
        };
        for (owner, amount) in owners {
            let (next_stake, ownership) = stake
                .stake(owner, amount)
                .map_err(|e| ConstructError::StakeArithmetic(e.to_string()))?;
            builder.up(Particle::StakeOwnership(ownership));
            stake = next_stake;
        }
        cur_stake.insert(delegate, stake);
    }

    // ── Prepared validator updates ─────────────────────────────────────────
    macro_rules! fold_updates {
        ($type_id:expr, $variant:path, $apply:expr) => {{
            let mut updates: Vec<(NodeKey, SubstateId, _)> = store
                .substates_of_type($type_id)
                .into_iter()
                .filter_map(|(id, particle)| match particle {
                    $variant(update) => Some((update.validator, id, update)),
                    _ => None,
                })
                .collect();
            updates.sort_by(|a, b| a.0.cmp(&b.0));
            for (key, id, update) in updates {
                builder.down(id);
                if !cur_stake.contains_key(&key) {
                    load_stake(&mut builder, &mut cur_stake, key);
                }
                let stake = cur_stake.get_mut(&key).expect("loaded above");
                #[allow(clippy::redundant_closure_call)]
                ($apply)(stake, update);
            }
        }};
    }

    fold_updates!(
        SubstateTypeId::PreparedRakeUpdate,
        Particle::PreparedRakeUpdate,
        |stake: &mut ValidatorStakeData, update: crate::particles::PreparedRakeUpdate| {
            stake.rake_bps = update.rake_bps;
        }
    );
    fold_updates!(
        SubstateTypeId::PreparedOwnerUpdate,
        Particle::PreparedOwnerUpdate,
        |stake: &mut ValidatorStakeData, update: crate::particles::PreparedOwnerUpdate| {
            stake.owner = update.owner;
        }
    );
    fold_updates!(
        SubstateTypeId::PreparedRegisteredUpdate,
        Particle::PreparedRegisteredUpdate,
        |stake: &mut ValidatorStakeData, update: crate::particles::PreparedRegisteredUpdate| {
            stake.registered = update.registered;
        }
    );

    // ── Write-back and next validator set ──────────────────────────────────
    for stake in cur_stake.values() {
        builder.up(Particle::ValidatorStake(stake.clone()));
    }

    let mut next_set: BTreeMap<NodeKey, U256> = BTreeMap::new();
    for (key, (_, stake)) in &stake_substates {
        if !cur_stake.contains_key(key) && stake.registered && !stake.total_stake.is_zero() {
            next_set.insert(*key, stake.total_stake);
        }
    }
    for (key, stake) in &cur_stake {
        if stake.registered && !stake.total_stake.is_zero() {
            next_set.insert(*key, stake.total_stake);
        }
    }
    for key in next_set.keys() {
        builder.up(Particle::ValidatorBftData(ValidatorBftData {
            validator: *key,
            proposals_completed: 0,
            proposals_missed: 0,
        }));
    }

    builder
        .up(Particle::EpochData(EpochData {
            epoch: prev_epoch + 1,
        }))
        .up(Particle::RoundData(RoundData {
            view: 0,
            timestamp_ms,
        }))
        .end();

    Ok(EpochTransaction {
        payload: builder.build_unsigned(),
        next_validator_set: next_set.into_iter().collect(),
    })
}
