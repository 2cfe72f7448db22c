//! Ledger and BFT headers.

use crate::{Epoch, Hash, StateVersion, ValidatorSet, VertexId, View};
use std::fmt;

/// The ledger-visible header of a prepared or committed vertex.
///
/// `accumulator` chains the committed command ids:
/// `accumulator(n) = H(accumulator(n-1) || cmd_id_1 || … || cmd_id_k)`.
/// A header carrying `next_validator_set` closes its epoch.
#[derive(Clone, PartialEq, Eq)]
pub struct LedgerHeader {
    pub epoch: Epoch,
    pub view: View,
    pub state_version: StateVersion,
    pub accumulator: Hash,
    pub timestamp_ms: u64,
    pub next_validator_set: Option<ValidatorSet>,
}

impl LedgerHeader {
    /// The ledger state at the very start of an epoch: view 0, nothing
    /// committed within the epoch yet.
    pub fn epoch_genesis(epoch: Epoch, base: &LedgerHeader) -> Self {
        LedgerHeader {
            epoch,
            view: View::GENESIS,
            state_version: base.state_version,
            accumulator: base.accumulator,
            timestamp_ms: base.timestamp_ms,
            next_validator_set: None,
        }
    }

    /// The ledger state before anything was ever committed.
    pub fn genesis() -> Self {
        LedgerHeader {
            epoch: Epoch::GENESIS,
            view: View::GENESIS,
            state_version: StateVersion(0),
            accumulator: Hash::ZERO,
            timestamp_ms: 0,
            next_validator_set: None,
        }
    }

    pub fn is_end_of_epoch(&self) -> bool {
        self.next_validator_set.is_some()
    }
}

impl fmt::Debug for LedgerHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerHeader")
            .field("epoch", &self.epoch.0)
            .field("view", &self.view.0)
            .field("version", &self.state_version.0)
            .field("accumulator", &self.accumulator)
            .field("end_of_epoch", &self.is_end_of_epoch())
            .finish()
    }
}

/// A consensus header binding a vertex to its prepared ledger state.
#[derive(Clone, PartialEq, Eq)]
pub struct BFTHeader {
    pub view: View,
    pub vertex_id: VertexId,
    pub ledger_header: LedgerHeader,
}

impl BFTHeader {
    pub fn new(view: View, vertex_id: VertexId, ledger_header: LedgerHeader) -> Self {
        BFTHeader {
            view,
            vertex_id,
            ledger_header,
        }
    }
}

impl fmt::Debug for BFTHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BFTHeader")
            .field("view", &self.view.0)
            .field("vertex", &self.vertex_id)
            .field("version", &self.ledger_header.state_version.0)
            .finish()
    }
}
