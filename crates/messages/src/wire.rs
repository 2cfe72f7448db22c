//! Wire encodings for the shared consensus types.
//!
//! Encodings are hand-written and canonical: one byte layout per type, maps
//! serialized in their canonical key order, options as a presence byte.

use cascade_types::codec::{CodecError, Reader, Writer};
use cascade_types::{
    BFTHeader, Command, Epoch, Hash, LedgerHeader, LedgerProof, NodeKey, QuorumCertificate,
    Signature, SignatureSet, StateVersion, TimeoutCertificate, TimeoutVote, TimeoutVoteInfo,
    TimestampedSignature, U256, Validator, ValidatorSet, Vertex, VertexId, View, VoteData,
    VerifiedCommandsAndProof, Vote,
};
use std::collections::BTreeMap;

/// Upper bound on validators per set; far above any deployable set.
const MAX_VALIDATORS: usize = 10_000;
/// Upper bound on vertices per sync response.
const MAX_VERTICES: usize = 1_024;
/// Upper bound on commands per sync batch.
const MAX_COMMANDS: usize = 4_096;

/// Deterministic wire encoding.
pub trait WireEncode {
    fn encode(&self, w: &mut Writer);

    fn to_wire_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.into_bytes()
    }
}

/// Wire decoding.
pub trait WireDecode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError>;
}

fn encode_option<T: WireEncode>(w: &mut Writer, value: &Option<T>) {
    match value {
        Some(inner) => {
            w.put_u8(1);
            inner.encode(w);
        }
        None => w.put_u8(0),
    }
}

fn decode_option<T: WireDecode>(r: &mut Reader<'_>) -> Result<Option<T>, CodecError> {
    match r.u8()? {
        0 => Ok(None),
        1 => Ok(Some(T::decode(r)?)),
        tag => Err(CodecError::UnknownTag {
            what: "option",
            tag,
        }),
    }
}

impl WireEncode for Hash {
    fn encode(&self, w: &mut Writer) {
        w.put_raw(self.as_bytes());
    }
}

impl WireDecode for Hash {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Hash::from_bytes(r.array::<32>()?))
    }
}

impl WireEncode for NodeKey {
    fn encode(&self, w: &mut Writer) {
        w.put_raw(self.as_bytes());
    }
}

impl WireDecode for NodeKey {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        NodeKey::from_bytes(r.array::<33>()?)
            .map_err(|_| CodecError::InvalidValue("validator key"))
    }
}

impl WireEncode for Signature {
    fn encode(&self, w: &mut Writer) {
        w.put_raw(&self.to_bytes());
    }
}

impl WireDecode for Signature {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Signature::from_bytes(&r.array::<65>()?)
            .map_err(|_| CodecError::InvalidValue("signature"))
    }
}

impl WireEncode for U256 {
    fn encode(&self, w: &mut Writer) {
        let mut bytes = [0u8; 32];
        self.to_big_endian(&mut bytes);
        w.put_raw(&bytes);
    }
}

impl WireDecode for U256 {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(U256::from_big_endian(&r.array::<32>()?))
    }
}

impl WireEncode for ValidatorSet {
    fn encode(&self, w: &mut Writer) {
        w.put_u32(self.len() as u32);
        for validator in self.iter() {
            validator.key.encode(w);
            validator.power.encode(w);
        }
    }
}

impl WireDecode for ValidatorSet {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let len = r.sequence_len(MAX_VALIDATORS)?;
        let mut validators = Vec::with_capacity(len);
        for _ in 0..len {
            let key = NodeKey::decode(r)?;
            let power = U256::decode(r)?;
            validators.push(Validator { key, power });
        }
        ValidatorSet::from_validators(validators)
            .map_err(|_| CodecError::InvalidValue("validator set"))
    }
}

impl WireEncode for LedgerHeader {
    fn encode(&self, w: &mut Writer) {
        w.put_u64(self.epoch.0);
        w.put_u64(self.view.0);
        w.put_u64(self.state_version.0);
        self.accumulator.encode(w);
        w.put_u64(self.timestamp_ms);
        encode_option(w, &self.next_validator_set);
    }
}

impl WireDecode for LedgerHeader {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(LedgerHeader {
            epoch: Epoch(r.u64()?),
            view: View(r.u64()?),
            state_version: StateVersion(r.u64()?),
            accumulator: Hash::decode(r)?,
            timestamp_ms: r.u64()?,
            next_validator_set: decode_option(r)?,
        })
    }
}

impl WireEncode for BFTHeader {
    fn encode(&self, w: &mut Writer) {
        w.put_u64(self.view.0);
        self.vertex_id.0.encode(w);
        self.ledger_header.encode(w);
    }
}

impl WireDecode for BFTHeader {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(BFTHeader::new(
            View(r.u64()?),
            VertexId(Hash::decode(r)?),
            LedgerHeader::decode(r)?,
        ))
    }
}

impl WireEncode for VoteData {
    fn encode(&self, w: &mut Writer) {
        self.voted.encode(w);
        self.parent.encode(w);
        encode_option(w, &self.committed);
    }
}

impl WireDecode for VoteData {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(VoteData {
            voted: BFTHeader::decode(r)?,
            parent: BFTHeader::decode(r)?,
            committed: decode_option(r)?,
        })
    }
}

impl WireEncode for TimestampedSignature {
    fn encode(&self, w: &mut Writer) {
        w.put_u64(self.timestamp_ms);
        self.signature.encode(w);
    }
}

impl WireDecode for TimestampedSignature {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(TimestampedSignature {
            timestamp_ms: r.u64()?,
            signature: Signature::decode(r)?,
        })
    }
}

impl WireEncode for SignatureSet {
    fn encode(&self, w: &mut Writer) {
        w.put_u32(self.len() as u32);
        for (signer, signature) in self.iter() {
            signer.encode(w);
            signature.encode(w);
        }
    }
}

impl WireDecode for SignatureSet {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let len = r.sequence_len(MAX_VALIDATORS)?;
        let mut set = SignatureSet::new();
        for _ in 0..len {
            let signer = NodeKey::decode(r)?;
            let signature = TimestampedSignature::decode(r)?;
            if !set.add(signer, signature) {
                return Err(CodecError::InvalidValue("duplicate signer"));
            }
        }
        Ok(set)
    }
}

impl WireEncode for QuorumCertificate {
    fn encode(&self, w: &mut Writer) {
        self.vote_data().encode(w);
        self.signatures().encode(w);
    }
}

impl WireDecode for QuorumCertificate {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let vote_data = VoteData::decode(r)?;
        let signatures = SignatureSet::decode(r)?;
        Ok(QuorumCertificate::new(vote_data, signatures))
    }
}

impl WireEncode for TimeoutCertificate {
    fn encode(&self, w: &mut Writer) {
        w.put_u64(self.epoch().0);
        w.put_u64(self.view().0);
        w.put_u32(self.signatures().len() as u32);
        for (signer, info) in self.signatures() {
            signer.encode(w);
            w.put_u64(info.high_qc_view.0);
            info.signature.encode(w);
            w.put_u64(info.timestamp_ms);
        }
    }
}

impl WireDecode for TimeoutCertificate {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let epoch = Epoch(r.u64()?);
        let view = View(r.u64()?);
        let len = r.sequence_len(MAX_VALIDATORS)?;
        let mut signatures = BTreeMap::new();
        for _ in 0..len {
            let signer = NodeKey::decode(r)?;
            let info = TimeoutVoteInfo {
                high_qc_view: View(r.u64()?),
                signature: Signature::decode(r)?,
                timestamp_ms: r.u64()?,
            };
            if signatures.insert(signer, info).is_some() {
                return Err(CodecError::InvalidValue("duplicate signer"));
            }
        }
        Ok(TimeoutCertificate::new(epoch, view, signatures))
    }
}

impl WireEncode for TimeoutVote {
    fn encode(&self, w: &mut Writer) {
        w.put_u64(self.view.0);
        w.put_u64(self.high_qc_view.0);
        self.signature.encode(w);
    }
}

impl WireDecode for TimeoutVote {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(TimeoutVote {
            view: View(r.u64()?),
            high_qc_view: View(r.u64()?),
            signature: Signature::decode(r)?,
        })
    }
}

impl WireEncode for Vote {
    fn encode(&self, w: &mut Writer) {
        self.vote_data.encode(w);
        self.author.encode(w);
        self.signature.encode(w);
        w.put_u64(self.timestamp_ms);
        encode_option(w, &self.timeout);
    }
}

impl WireDecode for Vote {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Vote {
            vote_data: VoteData::decode(r)?,
            author: NodeKey::decode(r)?,
            signature: Signature::decode(r)?,
            timestamp_ms: r.u64()?,
            timeout: decode_option(r)?,
        })
    }
}

impl WireEncode for Command {
    fn encode(&self, w: &mut Writer) {
        w.put_bytes(self.payload());
    }
}

impl WireDecode for Command {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Command::new(r.bytes()?))
    }
}

impl WireEncode for Vertex {
    fn encode(&self, w: &mut Writer) {
        self.qc().encode(w);
        w.put_u64(self.view().0);
        encode_option(w, &self.command().cloned());
        self.proposer().encode(w);
    }
}

impl WireDecode for Vertex {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let qc = QuorumCertificate::decode(r)?;
        let view = View(r.u64()?);
        let command = decode_option(r)?;
        let proposer = NodeKey::decode(r)?;
        Ok(Vertex::new(qc, view, command, proposer))
    }
}

impl WireEncode for LedgerProof {
    fn encode(&self, w: &mut Writer) {
        self.opaque().encode(w);
        self.header().encode(w);
        self.signatures().encode(w);
    }
}

impl WireDecode for LedgerProof {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let opaque = Hash::decode(r)?;
        let header = LedgerHeader::decode(r)?;
        let signatures = SignatureSet::decode(r)?;
        Ok(LedgerProof::new(opaque, header, signatures))
    }
}

impl WireEncode for VerifiedCommandsAndProof {
    fn encode(&self, w: &mut Writer) {
        w.put_u32(self.commands.len() as u32);
        for command in &self.commands {
            command.encode(w);
        }
        self.proof.encode(w);
    }
}

impl WireDecode for VerifiedCommandsAndProof {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let len = r.sequence_len(MAX_COMMANDS)?;
        let mut commands = Vec::with_capacity(len);
        for _ in 0..len {
            commands.push(Command::decode(r)?);
        }
        Ok(VerifiedCommandsAndProof::new(commands, LedgerProof::decode(r)?))
    }
}

pub(crate) fn encode_vertices(w: &mut Writer, vertices: &[Vertex]) {
    w.put_u32(vertices.len() as u32);
    for vertex in vertices {
        vertex.encode(w);
    }
}

pub(crate) fn decode_vertices(r: &mut Reader<'_>) -> Result<Vec<Vertex>, CodecError> {
    let len = r.sequence_len(MAX_VERTICES)?;
    let mut vertices = Vec::with_capacity(len);
    for _ in 0..len {
        vertices.push(Vertex::decode(r)?);
    }
    Ok(vertices)
}
