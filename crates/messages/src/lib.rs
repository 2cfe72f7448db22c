//! Network messages for the consensus and sync protocols.
//!
//! Every message shares a fixed envelope: a magic word identifying the
//! network and codec version, a kind byte, and a hand-encoded body. The
//! codec is deterministic; two encodings of equal messages are byte-equal.

mod consensus;
mod sync;
mod wire;

pub use cascade_types::codec::{CodecError, Reader, Writer, MAX_FIELD_LEN};
pub use consensus::{GetVerticesRequest, GetVerticesResponse, Proposal, VoteMessage};
pub use sync::{GetEpochRequest, GetEpochResponse, SyncRequest, SyncResponse};
pub use wire::{WireDecode, WireEncode};

use cascade_types::{Epoch, StateVersion, VertexId};

/// Magic word: "CSC" plus the codec version.
pub const MAGIC: u32 = 0x4353_4301;

/// All messages a node can put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Proposal(Proposal),
    Vote(VoteMessage),
    GetVerticesRequest(GetVerticesRequest),
    GetVerticesResponse(GetVerticesResponse),
    GetEpochRequest(GetEpochRequest),
    GetEpochResponse(GetEpochResponse),
    SyncRequest(SyncRequest),
    SyncResponse(Box<SyncResponse>),
}

impl Message {
    fn kind(&self) -> u8 {
        match self {
            Message::Proposal(_) => 0x01,
            Message::Vote(_) => 0x02,
            Message::GetVerticesRequest(_) => 0x03,
            Message::GetVerticesResponse(_) => 0x04,
            Message::GetEpochRequest(_) => 0x05,
            Message::GetEpochResponse(_) => 0x06,
            Message::SyncRequest(_) => 0x07,
            Message::SyncResponse(_) => 0x08,
        }
    }

    /// Message type name for logs and counters.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Proposal(_) => "Proposal",
            Message::Vote(_) => "Vote",
            Message::GetVerticesRequest(_) => "GetVerticesRequest",
            Message::GetVerticesResponse(_) => "GetVerticesResponse",
            Message::GetEpochRequest(_) => "GetEpochRequest",
            Message::GetEpochResponse(_) => "GetEpochResponse",
            Message::SyncRequest(_) => "SyncRequest",
            Message::SyncResponse(_) => "SyncResponse",
        }
    }

    /// Encode with the envelope (magic, kind, body).
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(256);
        w.put_u32(MAGIC);
        w.put_u8(self.kind());
        match self {
            Message::Proposal(m) => m.encode(&mut w),
            Message::Vote(m) => m.encode(&mut w),
            Message::GetVerticesRequest(m) => m.encode(&mut w),
            Message::GetVerticesResponse(m) => m.encode(&mut w),
            Message::GetEpochRequest(m) => m.encode(&mut w),
            Message::GetEpochResponse(m) => m.encode(&mut w),
            Message::SyncRequest(m) => m.encode(&mut w),
            Message::SyncResponse(m) => m.encode(&mut w),
        }
        w.into_bytes()
    }

    /// Decode a full envelope, rejecting trailing bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(CodecError::BadMagic(magic));
        }
        let kind = r.u8()?;
        let message = match kind {
            0x01 => Message::Proposal(Proposal::decode(&mut r)?),
            0x02 => Message::Vote(VoteMessage::decode(&mut r)?),
            0x03 => Message::GetVerticesRequest(GetVerticesRequest::decode(&mut r)?),
            0x04 => Message::GetVerticesResponse(GetVerticesResponse::decode(&mut r)?),
            0x05 => Message::GetEpochRequest(GetEpochRequest::decode(&mut r)?),
            0x06 => Message::GetEpochResponse(GetEpochResponse::decode(&mut r)?),
            0x07 => Message::SyncRequest(SyncRequest::decode(&mut r)?),
            0x08 => Message::SyncResponse(Box::new(SyncResponse::decode(&mut r)?)),
            tag => return Err(CodecError::UnknownTag {
                what: "message kind",
                tag,
            }),
        };
        r.expect_end()?;
        Ok(message)
    }
}

impl From<Proposal> for Message {
    fn from(m: Proposal) -> Self {
        Message::Proposal(m)
    }
}

impl From<VoteMessage> for Message {
    fn from(m: VoteMessage) -> Self {
        Message::Vote(m)
    }
}

/// Convenience constructors for the request messages.
impl Message {
    pub fn get_vertices(tip: VertexId, count: u32) -> Self {
        Message::GetVerticesRequest(GetVerticesRequest { tip, count })
    }

    pub fn get_epoch_proof(epoch: Epoch) -> Self {
        Message::GetEpochRequest(GetEpochRequest { epoch })
    }

    pub fn sync_request(state_version: StateVersion) -> Self {
        Message::SyncRequest(SyncRequest { state_version })
    }
}
