//! Transaction instructions and their framing.
//!
//! A transaction payload is a sequence of instructions:
//! `[op:u8][len:u16][payload]`, except `END` (op byte only) and `SIG`
//! (op byte plus a fixed 65-byte recoverable signature). `SIG`, when
//! present, is always the last instruction.

use crate::addressing::SubstateId;
use crate::particles::Particle;
use cascade_types::codec::{CodecError, Reader, Writer};
use cascade_types::Signature;

/// Instruction op codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum REOp {
    End = 0x00,
    Up = 0x01,
    VDown = 0x02,
    Down = 0x03,
    LDown = 0x04,
    Read = 0x05,
    LRead = 0x06,
    Msg = 0x07,
    Sig = 0x08,
}

impl REOp {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => REOp::End,
            0x01 => REOp::Up,
            0x02 => REOp::VDown,
            0x03 => REOp::Down,
            0x04 => REOp::LDown,
            0x05 => REOp::Read,
            0x06 => REOp::LRead,
            0x07 => REOp::Msg,
            0x08 => REOp::Sig,
            _ => return None,
        })
    }
}

/// A parsed instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum REInstruction {
    /// Boot up a new substate.
    Up { particle: Particle },
    /// Shut down a virtual (never instantiated) substate.
    VDown { particle: Particle },
    /// Shut down a remote substate by id.
    Down { id: SubstateId },
    /// Shut down a substate created earlier in this transaction, by its
    /// up-instruction ordinal.
    LDown { index: u32 },
    /// Read a remote substate without consuming it.
    Read { id: SubstateId },
    /// Read a substate created earlier in this transaction.
    LRead { index: u32 },
    /// Close the current instruction group.
    End,
    /// Attach an opaque message.
    Msg { data: Vec<u8> },
    /// The transaction signature over everything before this instruction.
    Sig { signature: Signature },
}

impl REInstruction {
    pub fn op(&self) -> REOp {
        match self {
            REInstruction::Up { .. } => REOp::Up,
            REInstruction::VDown { .. } => REOp::VDown,
            REInstruction::Down { .. } => REOp::Down,
            REInstruction::LDown { .. } => REOp::LDown,
            REInstruction::Read { .. } => REOp::Read,
            REInstruction::LRead { .. } => REOp::LRead,
            REInstruction::End => REOp::End,
            REInstruction::Msg { .. } => REOp::Msg,
            REInstruction::Sig { .. } => REOp::Sig,
        }
    }

    /// Whether this instruction references a substate.
    pub fn has_substate(&self) -> bool {
        matches!(
            self,
            REInstruction::Up { .. }
                | REInstruction::VDown { .. }
                | REInstruction::Down { .. }
                | REInstruction::LDown { .. }
                | REInstruction::Read { .. }
                | REInstruction::LRead { .. }
        )
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u8(self.op() as u8);
        match self {
            REInstruction::End => {}
            REInstruction::Sig { signature } => {
                w.put_raw(&signature.to_bytes());
            }
            REInstruction::Up { particle } | REInstruction::VDown { particle } => {
                let body = particle.to_bytes();
                w.put_u16(body.len() as u16);
                w.put_raw(&body);
            }
            REInstruction::Down { id } | REInstruction::Read { id } => {
                let body = id.to_bytes();
                w.put_u16(body.len() as u16);
                w.put_raw(&body);
            }
            REInstruction::LDown { index } | REInstruction::LRead { index } => {
                w.put_u16(4);
                w.put_u32(*index);
            }
            REInstruction::Msg { data } => {
                w.put_u16(data.len() as u16);
                w.put_raw(data);
            }
        }
    }

    /// Append this instruction's encoding to a payload buffer.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut w = Writer::new();
        self.encode(&mut w);
        out.extend_from_slice(&w.into_bytes());
    }

    /// Read one instruction from the payload.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let op_byte = r.u8()?;
        let op = REOp::from_byte(op_byte).ok_or(CodecError::UnknownTag {
            what: "instruction op",
            tag: op_byte,
        })?;
        match op {
            REOp::End => Ok(REInstruction::End),
            REOp::Sig => {
                let signature = Signature::from_bytes(&r.array::<65>()?)
                    .map_err(|_| CodecError::InvalidValue("signature"))?;
                Ok(REInstruction::Sig { signature })
            }
            _ => {
                let len = r.u16()? as usize;
                let body = r.take(len)?;
                let mut body_reader = Reader::new(body);
                let inst = match op {
                    REOp::Up => REInstruction::Up {
                        particle: Particle::decode(&mut body_reader)?,
                    },
                    REOp::VDown => REInstruction::VDown {
                        particle: Particle::decode(&mut body_reader)?,
                    },
                    REOp::Down => REInstruction::Down {
                        id: SubstateId::decode(&mut body_reader)?,
                    },
                    REOp::Read => REInstruction::Read {
                        id: SubstateId::decode(&mut body_reader)?,
                    },
                    REOp::LDown => REInstruction::LDown {
                        index: body_reader.u32()?,
                    },
                    REOp::LRead => REInstruction::LRead {
                        index: body_reader.u32()?,
                    },
                    REOp::Msg => REInstruction::Msg {
                        data: body.to_vec(),
                    },
                    REOp::End | REOp::Sig => unreachable!("handled above"),
                };
                if !matches!(op, REOp::Msg) {
                    body_reader.expect_end()?;
                }
                Ok(inst)
            }
        }
    }
}

/// Encode a full instruction sequence into a transaction payload.
pub fn encode_instructions(instructions: &[REInstruction]) -> Vec<u8> {
    let mut w = Writer::with_capacity(instructions.len() * 64);
    for inst in instructions {
        inst.encode(&mut w);
    }
    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::REAddr;
    use crate::particles::TokensInAccount;
    use cascade_types::test_utils::test_keypair;
    use cascade_types::{CommandId, Hash, U256};

    #[test]
    fn instructions_round_trip() {
        let kp = test_keypair(1);
        let instructions = vec![
            REInstruction::Down {
                id: SubstateId::physical(CommandId(Hash::sha256(b"txn")), 0),
            },
            REInstruction::Up {
                particle: Particle::Tokens(TokensInAccount {
                    owner: REAddr::of_key(kp.node_key()),
                    amount: U256::from(10u64),
                }),
            },
            REInstruction::LRead { index: 1 },
            REInstruction::Msg {
                data: vec![1, 2, 3],
            },
            REInstruction::End,
            REInstruction::Sig {
                signature: kp.sign(&Hash::sha256(b"body")),
            },
        ];

        let payload = encode_instructions(&instructions);
        let mut r = Reader::new(&payload);
        let mut decoded = Vec::new();
        while r.has_remaining() {
            decoded.push(REInstruction::decode(&mut r).unwrap());
        }
        assert_eq!(instructions, decoded);
    }

    #[test]
    fn unknown_op_is_rejected() {
        let mut r = Reader::new(&[0xff, 0x00, 0x00]);
        assert!(matches!(
            REInstruction::decode(&mut r),
            Err(CodecError::UnknownTag { .. })
        ));
    }

    #[test]
    fn truncated_substate_body_is_rejected() {
        // UP with declared length 10 but only 2 bytes present.
        let mut r = Reader::new(&[0x01, 0x00, 0x0a, 0x01, 0x00]);
        assert!(REInstruction::decode(&mut r).is_err());
    }
}
