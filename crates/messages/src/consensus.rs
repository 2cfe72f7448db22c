//! Consensus wire messages: proposals, votes, vertex sync.

use cascade_types::codec::{CodecError, Reader, Writer};
use crate::wire::{decode_vertices, encode_vertices, WireDecode, WireEncode};
use cascade_types::{TimeoutCertificate, Vertex, VertexId, View, Vote};

/// A leader's proposal for the current view.
///
/// The proposed vertex carries the QC it extends. `high_committed_qc` lets
/// receivers that missed the commit catch their vertex store up, and
/// `timeout_certificate` justifies a view that was entered through timeouts
/// rather than a QC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub vertex: Vertex,
    pub high_committed_qc: cascade_types::QuorumCertificate,
    pub timeout_certificate: Option<TimeoutCertificate>,
}

impl Proposal {
    pub fn view(&self) -> View {
        self.vertex.view()
    }

    pub(crate) fn encode(&self, w: &mut Writer) {
        self.vertex.encode(w);
        self.high_committed_qc.encode(w);
        match &self.timeout_certificate {
            Some(tc) => {
                w.put_u8(1);
                tc.encode(w);
            }
            None => w.put_u8(0),
        }
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let vertex = Vertex::decode(r)?;
        let high_committed_qc = cascade_types::QuorumCertificate::decode(r)?;
        let timeout_certificate = match r.u8()? {
            0 => None,
            1 => Some(TimeoutCertificate::decode(r)?),
            tag => {
                return Err(CodecError::UnknownTag {
                    what: "proposal tc",
                    tag,
                })
            }
        };
        Ok(Proposal {
            vertex,
            high_committed_qc,
            timeout_certificate,
        })
    }
}

/// A vote, addressed to the leader of the next view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteMessage {
    pub vote: Vote,
}

impl VoteMessage {
    pub(crate) fn encode(&self, w: &mut Writer) {
        self.vote.encode(w);
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(VoteMessage {
            vote: Vote::decode(r)?,
        })
    }
}

/// Request for a vertex and its ancestors, tip first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetVerticesRequest {
    pub tip: VertexId,
    pub count: u32,
}

impl GetVerticesRequest {
    pub(crate) fn encode(&self, w: &mut Writer) {
        self.tip.0.encode(w);
        w.put_u32(self.count);
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(GetVerticesRequest {
            tip: VertexId(cascade_types::Hash::decode(r)?),
            count: r.u32()?,
        })
    }
}

/// Response to [`GetVerticesRequest`]: the requested chain segment, or empty
/// when the serving store did not contain the whole segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetVerticesResponse {
    pub vertices: Vec<Vertex>,
}

impl GetVerticesResponse {
    pub(crate) fn encode(&self, w: &mut Writer) {
        encode_vertices(w, &self.vertices);
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(GetVerticesResponse {
            vertices: decode_vertices(r)?,
        })
    }
}
