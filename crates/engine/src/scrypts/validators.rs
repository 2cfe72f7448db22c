//! Validator constraint scrypt: user-level validator state changes.
//!
//! Validators queue changes (registration, rake, owner) as prepared-update
//! substates; the epoch scrypt folds them into the stake data at the next
//! boundary. The fork-vote metadata update takes effect immediately.

use crate::particles::{Particle, ParticleKind, StakeOwnership};
use crate::procedures::{
    OpSide, Procedure, ProcedureError, ReducerKind, ReducerOutcome, ReducerState, SignatureRule,
    TransitionToken, TxAction,
};
use crate::rules::RulesConfig;
use cascade_types::NodeKey;

/// A downed stake ownership awaiting its prepared unstake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnstakePending {
    pub ownership: StakeOwnership,
}

/// A downed validator metadata substate awaiting its replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPending {
    pub validator: NodeKey,
}

fn validator_key(particle: &Particle) -> Option<NodeKey> {
    match particle {
        Particle::SystemMetadata(m) => Some(m.validator),
        Particle::PreparedRegisteredUpdate(p) => Some(p.validator),
        Particle::PreparedRakeUpdate(p) => Some(p.validator),
        Particle::PreparedOwnerUpdate(p) => Some(p.validator),
        Particle::ValidatorStake(s) => Some(s.validator),
        _ => None,
    }
}

fn ownership_owner(particle: &Particle) -> Option<NodeKey> {
    match particle {
        Particle::StakeOwnership(s) => s.owner.owner_key(),
        _ => None,
    }
}

fn down_ownership(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    _state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::StakeOwnership(ownership) = particle else {
        return Err(ProcedureError::new("expected stake ownership"));
    };
    Ok(ReducerOutcome::Continue(ReducerState::UnstakePending(
        UnstakePending { ownership },
    )))
}

fn up_prepared_unstake(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::PreparedUnstake(prepared) = particle else {
        return Err(ProcedureError::new("expected prepared unstake"));
    };
    let Some(ReducerState::UnstakePending(pending)) = state else {
        return Err(ProcedureError::new("expected downed ownership"));
    };
    let ownership = pending.ownership;
    if prepared.delegate != ownership.delegate
        || prepared.owner != ownership.owner
        || prepared.amount != ownership.amount
    {
        return Err(ProcedureError::new(
            "prepared unstake must match the downed ownership exactly",
        ));
    }
    Ok(ReducerOutcome::Complete(TxAction::PrepareUnstake {
        owner: prepared.owner,
        delegate: prepared.delegate,
        amount: prepared.amount,
    }))
}

fn down_metadata(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    _state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::SystemMetadata(metadata) = particle else {
        return Err(ProcedureError::new("expected validator metadata"));
    };
    Ok(ReducerOutcome::Continue(ReducerState::MetadataPending(
        MetadataPending {
            validator: metadata.validator,
        },
    )))
}

fn up_metadata(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::SystemMetadata(metadata) = particle else {
        return Err(ProcedureError::new("expected validator metadata"));
    };
    let Some(ReducerState::MetadataPending(pending)) = state else {
        return Err(ProcedureError::new("expected downed metadata"));
    };
    if metadata.validator != pending.validator {
        return Err(ProcedureError::new("metadata keys must match"));
    }
    Ok(ReducerOutcome::Complete(TxAction::UpdateMetadata {
        validator: metadata.validator,
    }))
}

fn up_prepared_registered(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    _state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::PreparedRegisteredUpdate(prepared) = particle else {
        return Err(ProcedureError::new("expected registered update"));
    };
    Ok(ReducerOutcome::Complete(TxAction::PrepareRegisteredUpdate {
        validator: prepared.validator,
        registered: prepared.registered,
    }))
}

fn up_prepared_rake(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    _state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::PreparedRakeUpdate(prepared) = particle else {
        return Err(ProcedureError::new("expected rake update"));
    };
    Ok(ReducerOutcome::Complete(TxAction::PrepareRakeUpdate {
        validator: prepared.validator,
        rake_bps: prepared.rake_bps,
    }))
}

fn up_prepared_owner(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    _state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::PreparedOwnerUpdate(prepared) = particle else {
        return Err(ProcedureError::new("expected owner update"));
    };
    Ok(ReducerOutcome::Complete(TxAction::PrepareOwnerUpdate {
        validator: prepared.validator,
    }))
}

fn genesis_up(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    _state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let validator = validator_key(&particle)
        .or_else(|| match &particle {
            Particle::StakeOwnership(s) => Some(s.delegate),
            Particle::ValidatorBftData(b) => Some(b.validator),
            _ => None,
        })
        .ok_or_else(|| ProcedureError::new("expected a validator substate"))?;
    if let Particle::ValidatorBftData(bft) = &particle {
        if bft.proposals_completed != 0 || bft.proposals_missed != 0 {
            return Err(ProcedureError::new("genesis proposal counters must be zero"));
        }
    }
    Ok(ReducerOutcome::Complete(TxAction::GenesisValidator {
        validator,
    }))
}

/// Procedure lookup for the validator scrypt.
pub fn procedure_for(token: &TransitionToken) -> Option<Procedure> {
    match (token.side, token.particle, token.reducer) {
        (OpSide::Down, ParticleKind::StakeOwnership, ReducerKind::Void) => Some(Procedure::user(
            SignatureRule::OwnerOf(ownership_owner),
            down_ownership,
        )),
        (OpSide::Up, ParticleKind::PreparedUnstake, ReducerKind::UnstakePending) => {
            Some(Procedure::user(SignatureRule::Any, up_prepared_unstake))
        }
        (OpSide::Down, ParticleKind::SystemMetadata, ReducerKind::Void) => Some(Procedure::user(
            SignatureRule::OwnerOf(validator_key),
            down_metadata,
        )),
        (OpSide::Up, ParticleKind::SystemMetadata, ReducerKind::MetadataPending) => {
            Some(Procedure::user(SignatureRule::Any, up_metadata))
        }
        (OpSide::Up, ParticleKind::PreparedRegisteredUpdate, ReducerKind::Void) => Some(
            Procedure::user(SignatureRule::OwnerOf(validator_key), up_prepared_registered),
        ),
        (OpSide::Up, ParticleKind::PreparedRakeUpdate, ReducerKind::Void) => Some(
            Procedure::user(SignatureRule::OwnerOf(validator_key), up_prepared_rake),
        ),
        (OpSide::Up, ParticleKind::PreparedOwnerUpdate, ReducerKind::Void) => Some(
            Procedure::user(SignatureRule::OwnerOf(validator_key), up_prepared_owner),
        ),
        // Genesis boot of validator state, stake ownership and proposal
        // counters.
        (OpSide::Up, ParticleKind::ValidatorStake, ReducerKind::Void)
        | (OpSide::Up, ParticleKind::StakeOwnership, ReducerKind::Void)
        | (OpSide::Up, ParticleKind::ValidatorBftData, ReducerKind::Void) => {
            Some(Procedure::system(genesis_up))
        }
        _ => None,
    }
}
