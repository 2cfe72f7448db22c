//! The constraint machine: stateful transaction verification.
//!
//! The machine interprets a transaction's instruction stream against a
//! store snapshot. Substate spins are enforced here (UP then DOWN at most
//! once); everything else is delegated to the ruleset's transition
//! procedures. Validation is deterministic: identical payload and snapshot
//! always produce the identical result.

use crate::addressing::SubstateId;
use crate::instructions::REInstruction;
use crate::parser::stateless_verify;
use crate::particles::Particle;
use crate::procedures::{
    OpSide, PermissionLevel, ReducerOutcome, ReducerState, SignatureRule, TransitionToken,
    TxAction,
};
use crate::rules::RERules;
use crate::store::{CmStore, StateUpdate};
use cascade_types::codec::CodecError;
use cascade_types::{CommandId, Hash, NodeKey};
use std::collections::{BTreeMap, HashSet};
use tracing::trace;

/// First-failure errors of constraint machine validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CmError {
    // ── Parse stage ────────────────────────────────────────────────────────
    #[error("instruction {index}: unknown op")]
    UnknownOp { index: usize },
    #[error("instruction {index}: malformed ({source})")]
    Malformed { index: usize, source: CodecError },
    #[error("instruction {index}: static check failed: {reason}")]
    StaticCheckFailed { index: usize, reason: &'static str },
    #[error("instruction {index}: too many messages")]
    TooManyMessages { index: usize },
    #[error("instruction {index}: empty group")]
    EmptyGroup { index: usize },
    #[error("instruction {index}: unterminated group")]
    MissingEndOfGroup { index: usize },
    #[error("instruction {index}: signature must be last")]
    SignatureNotLast { index: usize },
    #[error("signature does not recover a signer")]
    InvalidSignatureEncoding,

    // ── Stateful stage ─────────────────────────────────────────────────────
    #[error("instruction {index}: substate is not up")]
    SpinConflict { index: usize },
    #[error("instruction {index}: no transition procedure for {token}")]
    MissingTransitionProcedure { index: usize, token: String },
    #[error("instruction {index}: insufficient execution permission")]
    InvalidExecutionPermission { index: usize },
    #[error("instruction {index}: signature does not authorize this transition")]
    IncorrectSignature { index: usize },
    #[error("instruction {index}: local substate does not exist")]
    LocalNonexistent { index: usize },
    #[error("instruction {index}: read of missing substate")]
    ReadFailure { index: usize },
    #[error("instruction {index}: group closed with unbalanced transition")]
    UnequalInputOutput { index: usize },
    #[error("instruction {index}: expected end of group")]
    MissingEnd { index: usize },
    #[error("instruction {index}: not a valid virtual substate")]
    InvalidVirtualParticle { index: usize },
    #[error("instruction {index}: {reason}")]
    TransitionPrecondition { index: usize, reason: String },
}

/// A fully validated transaction: its recovered signer, the actions its
/// groups describe, and the substate writes committing it implies.
#[derive(Debug, Clone)]
pub struct ParsedTxn {
    pub id: CommandId,
    pub signer: Option<NodeKey>,
    pub actions: Vec<TxAction>,
    pub updates: Vec<StateUpdate>,
}

impl ParsedTxn {
    /// Whether this transaction closes the epoch.
    pub fn is_epoch_boundary(&self) -> bool {
        self.actions
            .iter()
            .any(|action| matches!(action, TxAction::NextEpoch { .. }))
    }
}

/// The constraint machine for one ruleset.
pub struct ConstraintMachine<'a> {
    rules: &'a RERules,
}

impl<'a> ConstraintMachine<'a> {
    pub fn new(rules: &'a RERules) -> Self {
        ConstraintMachine { rules }
    }

    /// Validate a transaction payload against a store snapshot.
    pub fn validate(
        &self,
        store: &dyn CmStore,
        payload: &[u8],
        permission: PermissionLevel,
    ) -> Result<ParsedTxn, CmError> {
        let stateless = stateless_verify(self.rules.config(), payload)?;
        let txn_id = CommandId(Hash::sha256_twice(payload));
        trace!(txn = ?txn_id, instructions = stateless.instructions.len(), "validating");

        let mut state = ValidationState {
            txn_id,
            signer: stateless.signer,
            permission,
            local_up: BTreeMap::new(),
            local_downed: HashSet::new(),
            remote_down: HashSet::new(),
            reducer: None,
            group_action: None,
            up_ordinal: 0,
            actions: Vec::new(),
            downs: Vec::new(),
            virtual_downs: Vec::new(),
        };

        for (index, instruction) in stateless.instructions.iter().enumerate() {
            self.step(store, &mut state, index, instruction)?;
        }

        let ValidationState {
            local_up,
            local_downed,
            mut downs,
            virtual_downs,
            actions,
            signer,
            ..
        } = state;

        let mut updates: Vec<StateUpdate> = Vec::new();
        updates.append(&mut downs);
        updates.extend(virtual_downs);
        for (ordinal, (id, particle)) in local_up {
            if !local_downed.contains(&ordinal) {
                updates.push(StateUpdate::Up { id, particle });
            }
        }

        Ok(ParsedTxn {
            id: txn_id,
            signer,
            actions,
            updates,
        })
    }

    fn step(
        &self,
        store: &dyn CmStore,
        state: &mut ValidationState,
        index: usize,
        instruction: &REInstruction,
    ) -> Result<(), CmError> {
        // A completed group accepts nothing but its END.
        if state.group_action.is_some() && !matches!(instruction, REInstruction::End) {
            return Err(CmError::MissingEnd { index });
        }

        let (side, particle) = match instruction {
            REInstruction::End => {
                let action = state
                    .group_action
                    .take()
                    .ok_or(CmError::UnequalInputOutput { index })?;
                if state.reducer.is_some() {
                    return Err(CmError::UnequalInputOutput { index });
                }
                state.actions.push(action);
                return Ok(());
            }
            REInstruction::Msg { .. } | REInstruction::Sig { .. } => {
                // Validated by the stateless pass.
                return Ok(());
            }
            REInstruction::Up { particle } => {
                let id = SubstateId::physical(state.txn_id, state.up_ordinal);
                state.local_up.insert(state.up_ordinal, (id, particle.clone()));
                state.up_ordinal += 1;
                (OpSide::Up, particle.clone())
            }
            REInstruction::VDown { particle } => {
                if !particle.is_virtual_initial() {
                    return Err(CmError::InvalidVirtualParticle { index });
                }
                let id = particle.virtual_id();
                if state.remote_down.contains(&id) || store.is_virtual_down(&id) {
                    return Err(CmError::SpinConflict { index });
                }
                state.remote_down.insert(id);
                state.virtual_downs.push(StateUpdate::VirtualDown { id });
                (OpSide::Down, particle.clone())
            }
            REInstruction::Down { id } => {
                if state.remote_down.contains(id) {
                    return Err(CmError::SpinConflict { index });
                }
                let particle = store
                    .load_up_substate(id)
                    .ok_or(CmError::SpinConflict { index })?;
                state.remote_down.insert(*id);
                state.downs.push(StateUpdate::Down { id: *id });
                (OpSide::Down, particle)
            }
            REInstruction::LDown { index: ordinal } => {
                if state.local_downed.contains(ordinal) {
                    return Err(CmError::LocalNonexistent { index });
                }
                let (_, particle) = state
                    .local_up
                    .get(ordinal)
                    .cloned()
                    .ok_or(CmError::LocalNonexistent { index })?;
                state.local_downed.insert(*ordinal);
                (OpSide::Down, particle)
            }
            REInstruction::Read { id } => {
                if state.remote_down.contains(id) {
                    return Err(CmError::ReadFailure { index });
                }
                let particle = store
                    .load_up_substate(id)
                    .ok_or(CmError::ReadFailure { index })?;
                (OpSide::Read, particle)
            }
            REInstruction::LRead { index: ordinal } => {
                if state.local_downed.contains(ordinal) {
                    return Err(CmError::LocalNonexistent { index });
                }
                let (_, particle) = state
                    .local_up
                    .get(ordinal)
                    .cloned()
                    .ok_or(CmError::LocalNonexistent { index })?;
                (OpSide::Read, particle)
            }
        };

        // Reads only bind a dependency; they never advance the reducer.
        if side == OpSide::Read {
            return Ok(());
        }

        let token = TransitionToken {
            side,
            particle: particle.kind(),
            reducer: state
                .reducer
                .as_ref()
                .map(ReducerState::kind)
                .unwrap_or(crate::procedures::ReducerKind::Void),
        };
        let procedure =
            self.rules
                .procedure_for(&token)
                .ok_or_else(|| CmError::MissingTransitionProcedure {
                    index,
                    token: token.to_string(),
                })?;

        if state.permission < procedure.permission {
            return Err(CmError::InvalidExecutionPermission { index });
        }

        // System transactions are deterministic machine output; signatures
        // are neither present nor required.
        if state.permission != PermissionLevel::System {
            if let SignatureRule::OwnerOf(extract) = procedure.signature {
                let required = extract(&particle);
                if required.is_none() || required != state.signer {
                    return Err(CmError::IncorrectSignature { index });
                }
            }
        }

        let outcome = (procedure.reduce)(
            self.rules.config(),
            side,
            particle,
            state.reducer.take(),
        )
        .map_err(|e| CmError::TransitionPrecondition {
            index,
            reason: e.0,
        })?;

        match outcome {
            ReducerOutcome::Continue(reducer) => {
                state.reducer = Some(reducer);
            }
            ReducerOutcome::Complete(action) => {
                state.group_action = Some(action);
            }
        }
        Ok(())
    }
}

struct ValidationState {
    txn_id: CommandId,
    signer: Option<NodeKey>,
    permission: PermissionLevel,
    /// UP substates of this transaction, by UP ordinal.
    local_up: BTreeMap<u32, (SubstateId, Particle)>,
    /// Ordinals consumed by LDOWN.
    local_downed: HashSet<u32>,
    /// Remote substates downed by this transaction.
    remote_down: HashSet<SubstateId>,
    reducer: Option<ReducerState>,
    group_action: Option<TxAction>,
    up_ordinal: u32,
    actions: Vec<TxAction>,
    downs: Vec<StateUpdate>,
    virtual_downs: Vec<StateUpdate>,
}
