//! Substate addressing: owner addresses, substate ids, type ids.

use cascade_types::codec::{CodecError, Reader, Writer};
use cascade_types::{CommandId, Hash, NodeKey};
use std::fmt;

/// An on-ledger address that can own substates.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum REAddr {
    /// The system address. Owns nothing a user can spend.
    System,
    /// An account derived from a public key.
    PubKeyAccount(NodeKey),
}

impl REAddr {
    /// The key that authorizes spends from this address, if any.
    pub fn owner_key(&self) -> Option<NodeKey> {
        match self {
            REAddr::System => None,
            REAddr::PubKeyAccount(key) => Some(*key),
        }
    }

    pub fn of_key(key: NodeKey) -> REAddr {
        REAddr::PubKeyAccount(key)
    }

    pub fn encode(&self, w: &mut Writer) {
        match self {
            REAddr::System => w.put_u8(0x00),
            REAddr::PubKeyAccount(key) => {
                w.put_u8(0x04);
                w.put_raw(key.as_bytes());
            }
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        match r.u8()? {
            0x00 => Ok(REAddr::System),
            0x04 => {
                let key = NodeKey::from_bytes(r.array::<33>()?)
                    .map_err(|_| CodecError::InvalidValue("account key"))?;
                Ok(REAddr::PubKeyAccount(key))
            }
            tag => Err(CodecError::UnknownTag {
                what: "address",
                tag,
            }),
        }
    }
}

impl fmt::Debug for REAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            REAddr::System => write!(f, "addr:system"),
            REAddr::PubKeyAccount(key) => write!(f, "addr:{key:?}"),
        }
    }
}

/// Identifies a substate.
///
/// Physical ids address outputs of a committed or in-flight transaction;
/// virtual ids address the implicit initial state of keyed substates, derived
/// from the particle's canonical hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubstateId {
    Physical { txn_id: CommandId, index: u32 },
    Virtual { hash: Hash },
}

impl SubstateId {
    pub fn physical(txn_id: CommandId, index: u32) -> Self {
        SubstateId::Physical { txn_id, index }
    }

    /// The virtual id of a particle: double SHA-256 of its encoding.
    pub fn virtual_of(particle_bytes: &[u8]) -> Self {
        SubstateId::Virtual {
            hash: Hash::sha256_twice(particle_bytes),
        }
    }

    pub fn encode(&self, w: &mut Writer) {
        match self {
            SubstateId::Physical { txn_id, index } => {
                w.put_u8(0x00);
                w.put_raw(txn_id.0.as_bytes());
                w.put_u32(*index);
            }
            SubstateId::Virtual { hash } => {
                w.put_u8(0x01);
                w.put_raw(hash.as_bytes());
            }
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        match r.u8()? {
            0x00 => Ok(SubstateId::Physical {
                txn_id: CommandId(Hash::from_bytes(r.array::<32>()?)),
                index: r.u32()?,
            }),
            0x01 => Ok(SubstateId::Virtual {
                hash: Hash::from_bytes(r.array::<32>()?),
            }),
            tag => Err(CodecError::UnknownTag {
                what: "substate id",
                tag,
            }),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(40);
        self.encode(&mut w);
        w.into_bytes()
    }
}

impl fmt::Debug for SubstateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubstateId::Physical { txn_id, index } => write!(f, "{txn_id:?}[{index}]"),
            SubstateId::Virtual { hash } => write!(f, "virtual:{hash:?}"),
        }
    }
}

/// Declared substate type ids (byte 0 of every substate encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SubstateTypeId {
    Tokens = 0x01,
    EpochData = 0x02,
    RoundData = 0x03,
    ValidatorStake = 0x04,
    StakeOwnership = 0x05,
    ExittingStake = 0x06,
    PreparedStake = 0x07,
    PreparedUnstake = 0x08,
    ValidatorBftData = 0x09,
    PreparedRegisteredUpdate = 0x0a,
    PreparedRakeUpdate = 0x0b,
    PreparedOwnerUpdate = 0x0c,
    SystemMetadata = 0x0d,
}

impl SubstateTypeId {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x01 => SubstateTypeId::Tokens,
            0x02 => SubstateTypeId::EpochData,
            0x03 => SubstateTypeId::RoundData,
            0x04 => SubstateTypeId::ValidatorStake,
            0x05 => SubstateTypeId::StakeOwnership,
            0x06 => SubstateTypeId::ExittingStake,
            0x07 => SubstateTypeId::PreparedStake,
            0x08 => SubstateTypeId::PreparedUnstake,
            0x09 => SubstateTypeId::ValidatorBftData,
            0x0a => SubstateTypeId::PreparedRegisteredUpdate,
            0x0b => SubstateTypeId::PreparedRakeUpdate,
            0x0c => SubstateTypeId::PreparedOwnerUpdate,
            0x0d => SubstateTypeId::SystemMetadata,
            _ => return None,
        })
    }
}
