//! Action types for the deterministic state machine.

use crate::{Event, TimerId};
use cascade_messages::Message;
use cascade_types::{CommandId, NodeKey, VerifiedCommandsAndProof, View};
use std::time::Duration;

/// Actions the state machine wants to perform.
///
/// Actions are **commands** - they describe something to do.
/// The runner executes actions and may convert results back into events.
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Send a message to a specific validator.
    SendTo { target: NodeKey, message: Message },

    /// Broadcast a message to the current validator set.
    Broadcast { message: Message },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Set a timer to fire after a duration.
    SetTimer { id: TimerId, duration: Duration },

    /// Cancel a previously set timer.
    CancelTimer { id: TimerId },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal (fed back as events with Internal priority)
    // ═══════════════════════════════════════════════════════════════════════
    /// Enqueue an internal event for immediate processing.
    ///
    /// Internal events are processed at the same timestamp with higher
    /// priority than external events, preserving causality.
    EnqueueInternal { event: Event },

    // ═══════════════════════════════════════════════════════════════════════
    // Storage
    // ═══════════════════════════════════════════════════════════════════════
    /// Persist the safety-critical voting state before the vote leaves the
    /// node. After a crash the node must remember its last voted view to
    /// avoid equivocating.
    PersistSafetyState {
        last_voted_view: View,
        locked_view: View,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // External Notifications
    // ═══════════════════════════════════════════════════════════════════════
    /// Emit a committed batch for external observers.
    EmitCommitted { batch: VerifiedCommandsAndProof },

    /// Report a command rejected by validation back to its submitter.
    EmitCommandRejected { id: CommandId, reason: String },
}

impl Action {
    /// Check if this is an internal event action.
    pub fn is_internal(&self) -> bool {
        matches!(self, Action::EnqueueInternal { .. })
    }

    /// Get the action type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::SendTo { .. } => "SendTo",
            Action::Broadcast { .. } => "Broadcast",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::EnqueueInternal { .. } => "EnqueueInternal",
            Action::PersistSafetyState { .. } => "PersistSafetyState",
            Action::EmitCommitted { .. } => "EmitCommitted",
            Action::EmitCommandRejected { .. } => "EmitCommandRejected",
        }
    }
}
