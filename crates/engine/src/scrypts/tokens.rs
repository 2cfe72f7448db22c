//! Token constraint scrypt: value-conserving moves of the native token.
//!
//! A token-moving group downs inputs first, then ups outputs; the reducer
//! tracks the unallocated remainder. The group is complete exactly when the
//! remainder reaches zero, so value is conserved by construction and a
//! partial group fails the machine's end-of-group check.

use crate::addressing::REAddr;
use crate::particles::{Particle, ParticleKind};
use crate::procedures::{
    OpSide, Procedure, ProcedureError, ReducerKind, ReducerOutcome, ReducerState, SignatureRule,
    TransitionToken, TxAction,
};
use crate::rules::RulesConfig;
use cascade_types::U256;

/// Value accounting for a token-moving group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transferring {
    /// The address the inputs were downed from.
    pub from: REAddr,
    /// Input value not yet allocated to an output.
    pub available: U256,
    /// Total input value (reported in the completed action).
    pub total: U256,
    /// The non-transfer action this group turns out to be, if any.
    pub hint: Option<TxAction>,
}

fn owner_of_tokens(particle: &Particle) -> Option<cascade_types::NodeKey> {
    match particle {
        Particle::Tokens(t) => t.owner.owner_key(),
        _ => None,
    }
}

fn down_tokens_start(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    _state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::Tokens(tokens) = particle else {
        return Err(ProcedureError::new("expected tokens"));
    };
    Ok(ReducerOutcome::Continue(ReducerState::Transferring(
        Transferring {
            from: tokens.owner,
            available: tokens.amount,
            total: tokens.amount,
            hint: None,
        },
    )))
}

fn down_tokens_more(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::Tokens(tokens) = particle else {
        return Err(ProcedureError::new("expected tokens"));
    };
    let Some(ReducerState::Transferring(mut transferring)) = state else {
        return Err(ProcedureError::new("expected transferring state"));
    };
    if tokens.owner != transferring.from {
        return Err(ProcedureError::new("inputs must share one owner"));
    }
    transferring.available = transferring
        .available
        .checked_add(tokens.amount)
        .ok_or_else(|| ProcedureError::new("input value overflow"))?;
    transferring.total = transferring
        .total
        .checked_add(tokens.amount)
        .ok_or_else(|| ProcedureError::new("input value overflow"))?;
    Ok(ReducerOutcome::Continue(ReducerState::Transferring(
        transferring,
    )))
}

fn allocate(
    mut transferring: Transferring,
    amount: U256,
    hint: Option<TxAction>,
) -> Result<ReducerOutcome, ProcedureError> {
    if amount > transferring.available {
        return Err(ProcedureError::new("outputs exceed inputs"));
    }
    transferring.available -= amount;
    if hint.is_some() {
        transferring.hint = hint;
    }
    if transferring.available.is_zero() {
        let action = transferring.hint.take().unwrap_or(TxAction::Transfer {
            from: transferring.from,
            amount: transferring.total,
        });
        Ok(ReducerOutcome::Complete(action))
    } else {
        Ok(ReducerOutcome::Continue(ReducerState::Transferring(
            transferring,
        )))
    }
}

fn up_tokens(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::Tokens(tokens) = particle else {
        return Err(ProcedureError::new("expected tokens"));
    };
    let Some(ReducerState::Transferring(transferring)) = state else {
        return Err(ProcedureError::new("expected transferring state"));
    };
    allocate(transferring, tokens.amount, None)
}

fn up_prepared_stake(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::PreparedStake(prepared) = particle else {
        return Err(ProcedureError::new("expected prepared stake"));
    };
    let Some(ReducerState::Transferring(transferring)) = state else {
        return Err(ProcedureError::new("expected transferring state"));
    };
    if prepared.owner != transferring.from {
        return Err(ProcedureError::new(
            "prepared stake owner must match the paying account",
        ));
    }
    let hint = TxAction::PrepareStake {
        owner: prepared.owner,
        delegate: prepared.delegate,
        amount: prepared.amount,
    };
    allocate(transferring, prepared.amount, Some(hint))
}

fn mint_tokens(
    _config: &RulesConfig,
    _side: OpSide,
    particle: Particle,
    _state: Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError> {
    let Particle::Tokens(tokens) = particle else {
        return Err(ProcedureError::new("expected tokens"));
    };
    Ok(ReducerOutcome::Complete(TxAction::Mint {
        to: tokens.owner,
        amount: tokens.amount,
    }))
}

/// Procedure lookup for the token scrypt.
pub fn procedure_for(token: &TransitionToken) -> Option<Procedure> {
    match (token.side, token.particle, token.reducer) {
        (OpSide::Down, ParticleKind::Tokens, ReducerKind::Void) => Some(Procedure::user(
            SignatureRule::OwnerOf(owner_of_tokens),
            down_tokens_start,
        )),
        (OpSide::Down, ParticleKind::Tokens, ReducerKind::Transferring) => Some(Procedure::user(
            SignatureRule::OwnerOf(owner_of_tokens),
            down_tokens_more,
        )),
        (OpSide::Up, ParticleKind::Tokens, ReducerKind::Transferring) => {
            Some(Procedure::user(SignatureRule::Any, up_tokens))
        }
        (OpSide::Up, ParticleKind::PreparedStake, ReducerKind::Transferring) => {
            Some(Procedure::user(SignatureRule::Any, up_prepared_stake))
        }
        // Minting from nothing is reserved for genesis.
        (OpSide::Up, ParticleKind::Tokens, ReducerKind::Void) => {
            Some(Procedure::system(mint_tokens))
        }
        _ => None,
    }
}
