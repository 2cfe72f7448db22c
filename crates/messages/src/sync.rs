//! Ledger catch-up wire messages.

use cascade_types::codec::{CodecError, Reader, Writer};
use crate::wire::{WireDecode, WireEncode};
use cascade_types::{Epoch, LedgerProof, StateVersion, VerifiedCommandsAndProof};

/// Request the proof that closed the given epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetEpochRequest {
    pub epoch: Epoch,
}

impl GetEpochRequest {
    pub(crate) fn encode(&self, w: &mut Writer) {
        w.put_u64(self.epoch.0);
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(GetEpochRequest {
            epoch: Epoch(r.u64()?),
        })
    }
}

/// Response with the end-of-epoch proof, when the serving node has it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetEpochResponse {
    pub proof: Option<LedgerProof>,
}

impl GetEpochResponse {
    pub(crate) fn encode(&self, w: &mut Writer) {
        match &self.proof {
            Some(proof) => {
                w.put_u8(1);
                proof.encode(w);
            }
            None => w.put_u8(0),
        }
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let proof = match r.u8()? {
            0 => None,
            1 => Some(LedgerProof::decode(r)?),
            tag => {
                return Err(CodecError::UnknownTag {
                    what: "epoch proof",
                    tag,
                })
            }
        };
        Ok(GetEpochResponse { proof })
    }
}

/// Request the committed commands following `state_version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    pub state_version: StateVersion,
}

impl SyncRequest {
    pub(crate) fn encode(&self, w: &mut Writer) {
        w.put_u64(self.state_version.0);
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(SyncRequest {
            state_version: StateVersion(r.u64()?),
        })
    }
}

/// A batch of committed commands plus the proof of the batch's final state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResponse {
    pub batch: VerifiedCommandsAndProof,
}

impl SyncResponse {
    pub(crate) fn encode(&self, w: &mut Writer) {
        self.batch.encode(w);
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(SyncResponse {
            batch: VerifiedCommandsAndProof::decode(r)?,
        })
    }
}
