//! Stateless transaction verification.
//!
//! The stateless pass parses the instruction stream, runs the static
//! per-particle checks, enforces the structural rules (group shape, message
//! limit, signature placement) and recovers the signer from the
//! hash-to-sign: the double SHA-256 of every byte before the `SIG`
//! instruction.

use crate::instructions::{REInstruction, REOp};
use crate::machine::CmError;
use crate::rules::RulesConfig;
use cascade_types::codec::Reader;
use cascade_types::{Hash, NodeKey};

/// Outcome of the stateless pass.
#[derive(Debug, Clone)]
pub struct StatelessVerification {
    pub instructions: Vec<REInstruction>,
    /// The recovered signer, when a `SIG` instruction is present.
    pub signer: Option<NodeKey>,
    /// The hash the signature covers.
    pub hash_to_sign: Option<Hash>,
}

/// Parse and statically verify a transaction payload.
pub fn stateless_verify(
    config: &RulesConfig,
    payload: &[u8],
) -> Result<StatelessVerification, CmError> {
    let mut reader = Reader::new(payload);
    let mut instructions = Vec::new();
    let mut substates_in_group = 0usize;
    let mut messages = 0usize;
    let mut signature = None;
    let mut signature_position = 0usize;
    let mut index = 0usize;

    while reader.has_remaining() {
        if signature.is_some() {
            return Err(CmError::SignatureNotLast { index });
        }
        let position = reader.position();
        let instruction = REInstruction::decode(&mut reader).map_err(|source| match source {
            cascade_types::codec::CodecError::UnknownTag {
                what: "instruction op",
                ..
            } => CmError::UnknownOp { index },
            source => CmError::Malformed { index, source },
        })?;

        match &instruction {
            REInstruction::Up { particle } | REInstruction::VDown { particle } => {
                particle
                    .static_check()
                    .map_err(|reason| CmError::StaticCheckFailed { index, reason })?;
                substates_in_group += 1;
            }
            REInstruction::Down { .. }
            | REInstruction::LDown { .. }
            | REInstruction::Read { .. }
            | REInstruction::LRead { .. } => {
                substates_in_group += 1;
            }
            REInstruction::Msg { .. } => {
                messages += 1;
                if messages > config.max_messages {
                    return Err(CmError::TooManyMessages { index });
                }
            }
            REInstruction::End => {
                if substates_in_group == 0 {
                    return Err(CmError::EmptyGroup { index });
                }
                substates_in_group = 0;
            }
            REInstruction::Sig { signature: sig } => {
                signature = Some(*sig);
                signature_position = position;
            }
        }

        instructions.push(instruction);
        index += 1;
    }

    if substates_in_group != 0 {
        return Err(CmError::MissingEndOfGroup { index });
    }

    let (signer, hash_to_sign) = match signature {
        Some(sig) => {
            let hash = Hash::sha256_twice(&payload[..signature_position]);
            let signer = sig
                .recover(&hash)
                .map_err(|_| CmError::InvalidSignatureEncoding)?;
            (Some(signer), Some(hash))
        }
        None => (None, None),
    };

    Ok(StatelessVerification {
        instructions,
        signer,
        hash_to_sign,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::REAddr;
    use crate::instructions::encode_instructions;
    use crate::particles::{Particle, TokensInAccount};
    use cascade_types::test_utils::test_keypair;
    use cascade_types::U256;

    fn tokens_up(seed: u8, amount: u64) -> REInstruction {
        REInstruction::Up {
            particle: Particle::Tokens(TokensInAccount {
                owner: REAddr::of_key(test_keypair(seed).node_key()),
                amount: U256::from(amount),
            }),
        }
    }

    #[test]
    fn signature_recovers_the_signer() {
        let kp = test_keypair(5);
        let body = encode_instructions(&[tokens_up(1, 10), REInstruction::End]);
        let hash = Hash::sha256_twice(&body);
        let mut payload = body.clone();
        REInstruction::Sig {
            signature: kp.sign(&hash),
        }
        .encode_into(&mut payload);

        let result = stateless_verify(&RulesConfig::default(), &payload).unwrap();
        assert_eq!(result.signer, Some(kp.node_key()));
        assert_eq!(result.hash_to_sign, Some(hash));
    }

    #[test]
    fn empty_group_is_rejected() {
        let payload = encode_instructions(&[REInstruction::End]);
        assert!(matches!(
            stateless_verify(&RulesConfig::default(), &payload),
            Err(CmError::EmptyGroup { .. })
        ));
    }

    #[test]
    fn unterminated_group_is_rejected() {
        let payload = encode_instructions(&[tokens_up(1, 10)]);
        assert!(matches!(
            stateless_verify(&RulesConfig::default(), &payload),
            Err(CmError::MissingEndOfGroup { .. })
        ));
    }

    #[test]
    fn instructions_after_sig_are_rejected() {
        let kp = test_keypair(5);
        let body = encode_instructions(&[tokens_up(1, 10), REInstruction::End]);
        let hash = Hash::sha256_twice(&body);
        let mut payload = body;
        REInstruction::Sig {
            signature: kp.sign(&hash),
        }
        .encode_into(&mut payload);
        REInstruction::End.encode_into(&mut payload);

        assert!(matches!(
            stateless_verify(&RulesConfig::default(), &payload),
            Err(CmError::SignatureNotLast { .. })
        ));
    }

    #[test]
    fn message_limit_follows_the_ruleset() {
        let with_msg = encode_instructions(&[
            tokens_up(1, 10),
            REInstruction::Msg { data: vec![1] },
            REInstruction::End,
        ]);

        let strict = RulesConfig {
            max_messages: 0,
            ..Default::default()
        };
        assert!(matches!(
            stateless_verify(&strict, &with_msg),
            Err(CmError::TooManyMessages { .. })
        ));

        let permissive = RulesConfig {
            max_messages: 1,
            ..Default::default()
        };
        assert!(stateless_verify(&permissive, &with_msg).is_ok());
    }
}
