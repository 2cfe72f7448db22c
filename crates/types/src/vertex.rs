//! Vertices: the blocks of the BFT chain.

use crate::hash::Hasher;
use crate::{Command, Epoch, Hash, LedgerHeader, NodeKey, QuorumCertificate, View};
use std::fmt;

/// Identifier of a vertex: a hash over its consensus-relevant fields.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VertexId(pub Hash);

impl fmt::Debug for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vtx:{:?}", self.0)
    }
}

/// A vertex in the BFT chain: a QC on its parent, a view, and optionally a
/// command. A vertex without a command is a timeout fallback; it advances
/// views without advancing ledger state.
#[derive(Clone, PartialEq, Eq)]
pub struct Vertex {
    qc: QuorumCertificate,
    view: View,
    command: Option<Command>,
    proposer: NodeKey,
    id: VertexId,
}

impl Vertex {
    /// Build a vertex on top of the certified parent.
    ///
    /// A genesis vertex (view 0) is self-certified: its id is the one its
    /// own QC names, so every validator derives the identical root without
    /// exchanging messages.
    pub fn new(
        qc: QuorumCertificate,
        view: View,
        command: Option<Command>,
        proposer: NodeKey,
    ) -> Self {
        let id = if view.is_genesis() {
            qc.voted().vertex_id
        } else {
            Self::compute_id(&qc, view, command.as_ref(), &proposer)
        };
        Vertex {
            qc,
            view,
            command,
            proposer,
            id,
        }
    }

    /// The genesis vertex of an epoch: view 0, empty, self-certified.
    pub fn epoch_genesis(epoch: Epoch, opening: LedgerHeader, proposer: NodeKey) -> Self {
        let qc = QuorumCertificate::epoch_genesis(epoch, opening);
        Vertex::new(qc, View::GENESIS, None, proposer)
    }

    fn compute_id(
        qc: &QuorumCertificate,
        view: View,
        command: Option<&Command>,
        proposer: &NodeKey,
    ) -> VertexId {
        let mut hasher = Hasher::new();
        hasher
            .update(qc.voted().vertex_id.0)
            .update(qc.voted().ledger_header.accumulator)
            .update(qc.voted().ledger_header.epoch.0.to_be_bytes())
            .update(view.0.to_be_bytes())
            .update(proposer.as_bytes());
        match command {
            Some(cmd) => hasher.update([1u8]).update(cmd.id().0),
            None => hasher.update([0u8]),
        };
        VertexId(hasher.finalize())
    }

    pub fn id(&self) -> VertexId {
        self.id
    }

    pub fn qc(&self) -> &QuorumCertificate {
        &self.qc
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn command(&self) -> Option<&Command> {
        self.command.as_ref()
    }

    pub fn proposer(&self) -> NodeKey {
        self.proposer
    }

    /// The certified parent's id.
    pub fn parent_id(&self) -> VertexId {
        self.qc.voted().vertex_id
    }

    /// View of the certified parent.
    pub fn parent_view(&self) -> View {
        self.qc.voted().view
    }

    /// Whether the parent sits at exactly the previous view.
    pub fn has_direct_parent(&self) -> bool {
        self.view.0 == self.parent_view().0 + 1
    }

    pub fn is_genesis(&self) -> bool {
        self.view.is_genesis()
    }
}

impl fmt::Debug for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vertex")
            .field("id", &self.id)
            .field("view", &self.view.0)
            .field("parent", &self.parent_id())
            .field("command", &self.command.as_ref().map(|c| c.id()))
            .finish()
    }
}
