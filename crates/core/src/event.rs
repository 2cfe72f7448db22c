//! Event types for the deterministic state machine.

use cascade_messages::{
    GetEpochRequest, GetEpochResponse, GetVerticesRequest, GetVerticesResponse, Proposal,
    SyncRequest, SyncResponse, VoteMessage,
};
use cascade_types::{Command, Epoch, LedgerProof, NodeKey, View};

/// Priority levels for event ordering within the same timestamp.
///
/// Events at the same simulation time are processed in priority order.
/// Lower values = higher priority (processed first).
///
/// This ensures causality is preserved: internal events (consequences of
/// processing an event) are handled before new external inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Internal events: consequences of prior event processing.
    Internal = 0,
    /// Timer events: scheduled by the node itself.
    Timer = 1,
    /// Network events: external inputs from other nodes.
    Network = 2,
    /// Client events: external inputs from users.
    Client = 3,
}

/// All possible events a node can receive.
///
/// Events are **passive data** - they describe something that happened.
/// The state machine processes events and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Timers (priority: Timer)
    // ═══════════════════════════════════════════════════════════════════════
    /// The pacemaker's timeout for a view expired.
    ViewTimeout { epoch: Epoch, view: View },

    /// The patience timeout for an in-flight sync request expired.
    SyncPatience { token: u64 },

    // ═══════════════════════════════════════════════════════════════════════
    // Network Messages (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// A leader's proposal arrived.
    ProposalReceived { proposal: Proposal },

    /// A vote arrived (we may be the next leader).
    VoteReceived { vote: VoteMessage },

    /// A peer asked for vertices from our store.
    VerticesRequested {
        from: NodeKey,
        request: GetVerticesRequest,
    },

    /// A peer answered our vertex request.
    VerticesReceived { response: GetVerticesResponse },

    /// A peer asked for an end-of-epoch proof.
    EpochProofRequested {
        from: NodeKey,
        request: GetEpochRequest,
    },

    /// A peer answered our epoch proof request.
    EpochProofReceived { response: GetEpochResponse },

    /// A peer asked for committed commands after a state version.
    SyncRequested { from: NodeKey, request: SyncRequest },

    /// A peer answered our sync request with a command batch.
    SyncResponseReceived { response: Box<SyncResponse> },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal Events (priority: Internal)
    // ═══════════════════════════════════════════════════════════════════════
    /// The ledger committed a batch; `proof` is the new latest proof.
    LedgerCommitted { proof: LedgerProof },

    /// Consensus noticed it is behind and wants the ledger synced up to
    /// `target`, asking the given peers.
    LocalSyncRequest {
        target: LedgerProof,
        candidates: Vec<NodeKey>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Client Requests (priority: Client)
    // ═══════════════════════════════════════════════════════════════════════
    /// A client submitted a command for ordering.
    SubmitCommand { command: Command },
}

impl Event {
    /// Get the priority for this event type.
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::LedgerCommitted { .. } | Event::LocalSyncRequest { .. } => {
                EventPriority::Internal
            }

            Event::ViewTimeout { .. } | Event::SyncPatience { .. } => EventPriority::Timer,

            Event::ProposalReceived { .. }
            | Event::VoteReceived { .. }
            | Event::VerticesRequested { .. }
            | Event::VerticesReceived { .. }
            | Event::EpochProofRequested { .. }
            | Event::EpochProofReceived { .. }
            | Event::SyncRequested { .. }
            | Event::SyncResponseReceived { .. } => EventPriority::Network,

            Event::SubmitCommand { .. } => EventPriority::Client,
        }
    }

    /// Get the event type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::ViewTimeout { .. } => "ViewTimeout",
            Event::SyncPatience { .. } => "SyncPatience",
            Event::ProposalReceived { .. } => "ProposalReceived",
            Event::VoteReceived { .. } => "VoteReceived",
            Event::VerticesRequested { .. } => "VerticesRequested",
            Event::VerticesReceived { .. } => "VerticesReceived",
            Event::EpochProofRequested { .. } => "EpochProofRequested",
            Event::EpochProofReceived { .. } => "EpochProofReceived",
            Event::SyncRequested { .. } => "SyncRequested",
            Event::SyncResponseReceived { .. } => "SyncResponseReceived",
            Event::LedgerCommitted { .. } => "LedgerCommitted",
            Event::LocalSyncRequest { .. } => "LocalSyncRequest",
            Event::SubmitCommand { .. } => "SubmitCommand",
        }
    }

    /// Check if this is an internal event (consequence of prior processing).
    pub fn is_internal(&self) -> bool {
        self.priority() == EventPriority::Internal
    }

    /// Wrap a decoded network message as the matching event.
    pub fn from_message(from: NodeKey, message: cascade_messages::Message) -> Event {
        use cascade_messages::Message;
        match message {
            Message::Proposal(proposal) => Event::ProposalReceived { proposal },
            Message::Vote(vote) => Event::VoteReceived { vote },
            Message::GetVerticesRequest(request) => Event::VerticesRequested { from, request },
            Message::GetVerticesResponse(response) => Event::VerticesReceived { response },
            Message::GetEpochRequest(request) => Event::EpochProofRequested { from, request },
            Message::GetEpochResponse(response) => Event::EpochProofReceived { response },
            Message::SyncRequest(request) => Event::SyncRequested { from, request },
            Message::SyncResponse(response) => Event::SyncResponseReceived { response },
        }
    }
}
