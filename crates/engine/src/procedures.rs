//! Transition procedures: the dispatch layer of the constraint machine.
//!
//! Every substate instruction resolves to a procedure selected by the
//! transition token `(side, particle kind, reducer kind)`. A procedure
//! checks its precondition, declares its required permission and signature
//! rule, and reduces the validation state: either continuing with a new
//! reducer state or completing the group with an action.

use crate::particles::{Particle, ParticleKind};
use crate::rules::RulesConfig;
use crate::scrypts::epoch::{EpochPhaseKind, EpochUpdate, RoundUpdate};
use crate::scrypts::tokens::Transferring;
use crate::scrypts::validators::{MetadataPending, UnstakePending};
use cascade_types::{NodeKey, U256};
use std::fmt;

/// Execution permission of the transaction being validated.
///
/// `System` is reserved for deterministic system transactions (round and
/// epoch updates, genesis); it bypasses signature validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PermissionLevel {
    User,
    SuperUser,
    System,
}

/// Which way an instruction moves its substate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpSide {
    /// UP: the substate is being created.
    Up,
    /// DOWN, VDOWN, LDOWN: the substate is being consumed.
    Down,
    /// READ, LREAD: the substate is inspected, not consumed.
    Read,
}

/// The in-flight state of the current instruction group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReducerState {
    /// Value accounting for a token-moving group.
    Transferring(Transferring),
    /// A downed stake ownership awaiting its prepared unstake.
    UnstakePending(UnstakePending),
    /// A downed validator metadata awaiting its replacement.
    MetadataPending(MetadataPending),
    /// A round update in progress.
    RoundUpdate(RoundUpdate),
    /// The epoch-boundary progression.
    Epoch(Box<EpochUpdate>),
}

/// Discriminant of [`ReducerState`] used in transition dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReducerKind {
    /// No group state yet.
    Void,
    Transferring,
    UnstakePending,
    MetadataPending,
    RoundUpdate,
    Epoch(EpochPhaseKind),
}

impl ReducerState {
    pub fn kind(&self) -> ReducerKind {
        match self {
            ReducerState::Transferring(_) => ReducerKind::Transferring,
            ReducerState::UnstakePending(_) => ReducerKind::UnstakePending,
            ReducerState::MetadataPending(_) => ReducerKind::MetadataPending,
            ReducerState::RoundUpdate(_) => ReducerKind::RoundUpdate,
            ReducerState::Epoch(update) => ReducerKind::Epoch(update.phase_kind()),
        }
    }
}

/// The key a procedure is selected by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionToken {
    pub side: OpSide,
    pub particle: ParticleKind,
    pub reducer: ReducerKind,
}

impl fmt::Display for TransitionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:?}, {:?}, {:?})",
            self.side, self.particle, self.reducer
        )
    }
}

/// The action a completed instruction group describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxAction {
    /// Tokens created from nothing (genesis only).
    Mint { to: crate::addressing::REAddr, amount: U256 },
    /// Tokens moved between addresses.
    Transfer {
        from: crate::addressing::REAddr,
        amount: U256,
    },
    /// Tokens earmarked for staking at the next boundary.
    PrepareStake {
        owner: crate::addressing::REAddr,
        delegate: NodeKey,
        amount: U256,
    },
    /// Ownership earmarked for unstaking at the next boundary.
    PrepareUnstake {
        owner: crate::addressing::REAddr,
        delegate: NodeKey,
        amount: U256,
    },
    /// A validator changed its on-chain metadata (fork vote).
    UpdateMetadata { validator: NodeKey },
    /// A validator queued a registration flag change.
    PrepareRegisteredUpdate { validator: NodeKey, registered: bool },
    /// A validator queued a rake change.
    PrepareRakeUpdate { validator: NodeKey, rake_bps: u64 },
    /// A validator queued an owner change.
    PrepareOwnerUpdate { validator: NodeKey },
    /// A validator substate was created at genesis.
    GenesisValidator { validator: NodeKey },
    /// The system closed a round.
    NextRound { view: u64 },
    /// The system closed an epoch.
    NextEpoch { epoch: u64 },
}

/// The result of reducing one instruction.
pub enum ReducerOutcome {
    /// The group continues with this reducer state.
    Continue(ReducerState),
    /// The group is complete; the next instruction must be `END`.
    Complete(TxAction),
}

/// Signature requirement of a procedure.
#[derive(Clone, Copy)]
pub enum SignatureRule {
    /// No signer required.
    Any,
    /// The recovered signer must equal the key this function extracts from
    /// the particle.
    OwnerOf(fn(&Particle) -> Option<NodeKey>),
}

/// A failure inside a transition procedure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ProcedureError(pub String);

impl ProcedureError {
    pub fn new(message: impl Into<String>) -> Self {
        ProcedureError(message.into())
    }
}

/// Reduce function: consumes the particle and the current reducer state.
pub type ReduceFn = fn(
    &RulesConfig,
    OpSide,
    Particle,
    Option<ReducerState>,
) -> Result<ReducerOutcome, ProcedureError>;

/// A registered transition procedure.
#[derive(Clone, Copy)]
pub struct Procedure {
    pub permission: PermissionLevel,
    pub signature: SignatureRule,
    pub reduce: ReduceFn,
}

impl Procedure {
    pub fn user(signature: SignatureRule, reduce: ReduceFn) -> Self {
        Procedure {
            permission: PermissionLevel::User,
            signature,
            reduce,
        }
    }

    pub fn system(reduce: ReduceFn) -> Self {
        Procedure {
            permission: PermissionLevel::System,
            signature: SignatureRule::Any,
            reduce,
        }
    }
}
