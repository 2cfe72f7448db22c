//! Particles: the deserialized forms of substates.
//!
//! Binary format: byte 0 is the [`SubstateTypeId`], byte 1 is reserved and
//! must be zero, and the body is type-specific with big-endian numerics.
//! Encoding is canonical; the virtual id of a keyed particle is the double
//! SHA-256 of exactly these bytes.

use crate::addressing::{REAddr, SubstateId, SubstateTypeId};
use cascade_types::codec::{CodecError, Reader, Writer};
use cascade_types::{NodeKey, U256};
use std::fmt;

/// Basis points denominator for rake percentages.
pub const RAKE_MAX_BPS: u64 = 10_000;

fn put_u256(w: &mut Writer, value: &U256) {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    w.put_raw(&bytes);
}

fn get_u256(r: &mut Reader<'_>) -> Result<U256, CodecError> {
    Ok(U256::from_big_endian(&r.array::<32>()?))
}

fn put_key(w: &mut Writer, key: &NodeKey) {
    w.put_raw(key.as_bytes());
}

fn get_key(r: &mut Reader<'_>) -> Result<NodeKey, CodecError> {
    NodeKey::from_bytes(r.array::<33>()?).map_err(|_| CodecError::InvalidValue("validator key"))
}

/// Fungible tokens held by an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokensInAccount {
    pub owner: REAddr,
    pub amount: U256,
}

/// The current epoch. Exactly one lives in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochData {
    pub epoch: u64,
}

/// The current round within the epoch. Exactly one lives in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundData {
    pub view: u64,
    pub timestamp_ms: u64,
}

/// A validator's aggregate stake state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorStakeData {
    pub validator: NodeKey,
    pub total_stake: U256,
    pub total_ownership: U256,
    pub rake_bps: u64,
    pub owner: REAddr,
    pub registered: bool,
}

impl ValidatorStakeData {
    /// The implicit state of a validator nobody has touched: unregistered,
    /// no stake, owned by its own key.
    pub fn initial(validator: NodeKey) -> Self {
        ValidatorStakeData {
            validator,
            total_stake: U256::zero(),
            total_ownership: U256::zero(),
            rake_bps: 0,
            owner: REAddr::of_key(validator),
            registered: false,
        }
    }

    /// Add emission (rewards) to the stake without minting ownership; every
    /// ownership unit appreciates.
    pub fn add_emission(&self, amount: U256) -> Result<Self, StakeArithmeticError> {
        let total_stake = self
            .total_stake
            .checked_add(amount)
            .ok_or(StakeArithmeticError::Overflow)?;
        Ok(ValidatorStakeData {
            total_stake,
            ..self.clone()
        })
    }

    /// Stake tokens, minting ownership pro-rata.
    pub fn stake(
        &self,
        owner: REAddr,
        amount: U256,
    ) -> Result<(Self, StakeOwnership), StakeArithmeticError> {
        let minted = if self.total_stake.is_zero() || self.total_ownership.is_zero() {
            amount
        } else {
            self.total_ownership
                .checked_mul(amount)
                .ok_or(StakeArithmeticError::Overflow)?
                / self.total_stake
        };
        let next = ValidatorStakeData {
            total_stake: self
                .total_stake
                .checked_add(amount)
                .ok_or(StakeArithmeticError::Overflow)?,
            total_ownership: self
                .total_ownership
                .checked_add(minted)
                .ok_or(StakeArithmeticError::Overflow)?,
            ..self.clone()
        };
        let ownership = StakeOwnership {
            delegate: self.validator,
            owner,
            amount: minted,
        };
        Ok((next, ownership))
    }

    /// Burn ownership, releasing the matching stake into an exit.
    pub fn unstake_ownership(
        &self,
        owner: REAddr,
        ownership_amount: U256,
        epoch_unlocked: u64,
    ) -> Result<(Self, ExittingStake), StakeArithmeticError> {
        if ownership_amount > self.total_ownership {
            return Err(StakeArithmeticError::InsufficientOwnership);
        }
        let stake_removed = self
            .total_stake
            .checked_mul(ownership_amount)
            .ok_or(StakeArithmeticError::Overflow)?
            / self.total_ownership;
        let next = ValidatorStakeData {
            total_stake: self.total_stake - stake_removed,
            total_ownership: self.total_ownership - ownership_amount,
            ..self.clone()
        };
        let exit = ExittingStake {
            epoch_unlocked,
            delegate: self.validator,
            owner,
            amount: stake_removed,
        };
        Ok((next, exit))
    }
}

/// Errors from stake conversion arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StakeArithmeticError {
    #[error("stake arithmetic overflow")]
    Overflow,
    #[error("unstaking more ownership than exists")]
    InsufficientOwnership,
}

/// A staker's share of a validator's stake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeOwnership {
    pub delegate: NodeKey,
    pub owner: REAddr,
    pub amount: U256,
}

/// Stake leaving a validator, unlockable at `epoch_unlocked`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExittingStake {
    pub epoch_unlocked: u64,
    pub delegate: NodeKey,
    pub owner: REAddr,
    pub amount: U256,
}

impl ExittingStake {
    /// The tokens this exit unlocks into.
    pub fn unlock(&self) -> TokensInAccount {
        TokensInAccount {
            owner: self.owner,
            amount: self.amount,
        }
    }
}

/// Tokens earmarked for staking at the next epoch boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStake {
    pub delegate: NodeKey,
    pub owner: REAddr,
    pub amount: U256,
}

/// Ownership earmarked for unstaking at the next epoch boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedUnstake {
    pub delegate: NodeKey,
    pub owner: REAddr,
    pub amount: U256,
}

/// Per-epoch proposal accounting for one validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorBftData {
    pub validator: NodeKey,
    pub proposals_completed: u64,
    pub proposals_missed: u64,
}

/// A validator's pending registration flag change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRegisteredUpdate {
    pub validator: NodeKey,
    pub registered: bool,
}

/// A validator's pending rake change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRakeUpdate {
    pub validator: NodeKey,
    pub rake_bps: u64,
}

/// A validator's pending owner change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedOwnerUpdate {
    pub validator: NodeKey,
    pub owner: REAddr,
}

/// Free-form per-validator on-chain bytes. Carries the fork vote hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSystemMetadata {
    pub validator: NodeKey,
    pub data: [u8; 32],
}

/// Any particle.
#[derive(Clone, PartialEq, Eq)]
pub enum Particle {
    Tokens(TokensInAccount),
    EpochData(EpochData),
    RoundData(RoundData),
    ValidatorStake(ValidatorStakeData),
    StakeOwnership(StakeOwnership),
    ExittingStake(ExittingStake),
    PreparedStake(PreparedStake),
    PreparedUnstake(PreparedUnstake),
    ValidatorBftData(ValidatorBftData),
    PreparedRegisteredUpdate(PreparedRegisteredUpdate),
    PreparedRakeUpdate(PreparedRakeUpdate),
    PreparedOwnerUpdate(PreparedOwnerUpdate),
    SystemMetadata(ValidatorSystemMetadata),
}

/// Discriminant of [`Particle`] used in transition dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticleKind {
    Tokens,
    EpochData,
    RoundData,
    ValidatorStake,
    StakeOwnership,
    ExittingStake,
    PreparedStake,
    PreparedUnstake,
    ValidatorBftData,
    PreparedRegisteredUpdate,
    PreparedRakeUpdate,
    PreparedOwnerUpdate,
    SystemMetadata,
}

impl Particle {
    pub fn kind(&self) -> ParticleKind {
        match self {
            Particle::Tokens(_) => ParticleKind::Tokens,
            Particle::EpochData(_) => ParticleKind::EpochData,
            Particle::RoundData(_) => ParticleKind::RoundData,
            Particle::ValidatorStake(_) => ParticleKind::ValidatorStake,
            Particle::StakeOwnership(_) => ParticleKind::StakeOwnership,
            Particle::ExittingStake(_) => ParticleKind::ExittingStake,
            Particle::PreparedStake(_) => ParticleKind::PreparedStake,
            Particle::PreparedUnstake(_) => ParticleKind::PreparedUnstake,
            Particle::ValidatorBftData(_) => ParticleKind::ValidatorBftData,
            Particle::PreparedRegisteredUpdate(_) => ParticleKind::PreparedRegisteredUpdate,
            Particle::PreparedRakeUpdate(_) => ParticleKind::PreparedRakeUpdate,
            Particle::PreparedOwnerUpdate(_) => ParticleKind::PreparedOwnerUpdate,
            Particle::SystemMetadata(_) => ParticleKind::SystemMetadata,
        }
    }

    pub fn type_id(&self) -> SubstateTypeId {
        match self.kind() {
            ParticleKind::Tokens => SubstateTypeId::Tokens,
            ParticleKind::EpochData => SubstateTypeId::EpochData,
            ParticleKind::RoundData => SubstateTypeId::RoundData,
            ParticleKind::ValidatorStake => SubstateTypeId::ValidatorStake,
            ParticleKind::StakeOwnership => SubstateTypeId::StakeOwnership,
            ParticleKind::ExittingStake => SubstateTypeId::ExittingStake,
            ParticleKind::PreparedStake => SubstateTypeId::PreparedStake,
            ParticleKind::PreparedUnstake => SubstateTypeId::PreparedUnstake,
            ParticleKind::ValidatorBftData => SubstateTypeId::ValidatorBftData,
            ParticleKind::PreparedRegisteredUpdate => SubstateTypeId::PreparedRegisteredUpdate,
            ParticleKind::PreparedRakeUpdate => SubstateTypeId::PreparedRakeUpdate,
            ParticleKind::PreparedOwnerUpdate => SubstateTypeId::PreparedOwnerUpdate,
            ParticleKind::SystemMetadata => SubstateTypeId::SystemMetadata,
        }
    }

    /// Canonical substate encoding: type byte, reserved byte, body.
    pub fn encode(&self, w: &mut Writer) {
        w.put_u8(self.type_id() as u8);
        w.put_u8(0x00);
        match self {
            Particle::Tokens(t) => {
                t.owner.encode(w);
                put_u256(w, &t.amount);
            }
            Particle::EpochData(e) => {
                w.put_u64(e.epoch);
            }
            Particle::RoundData(r) => {
                w.put_u64(r.view);
                w.put_u64(r.timestamp_ms);
            }
            Particle::ValidatorStake(s) => {
                put_key(w, &s.validator);
                put_u256(w, &s.total_stake);
                put_u256(w, &s.total_ownership);
                w.put_u64(s.rake_bps);
                s.owner.encode(w);
                w.put_u8(u8::from(s.registered));
            }
            Particle::StakeOwnership(s) => {
                put_key(w, &s.delegate);
                s.owner.encode(w);
                put_u256(w, &s.amount);
            }
            Particle::ExittingStake(e) => {
                w.put_u64(e.epoch_unlocked);
                put_key(w, &e.delegate);
                e.owner.encode(w);
                put_u256(w, &e.amount);
            }
            Particle::PreparedStake(p) => {
                put_key(w, &p.delegate);
                p.owner.encode(w);
                put_u256(w, &p.amount);
            }
            Particle::PreparedUnstake(p) => {
                put_key(w, &p.delegate);
                p.owner.encode(w);
                put_u256(w, &p.amount);
            }
            Particle::ValidatorBftData(v) => {
                put_key(w, &v.validator);
                w.put_u64(v.proposals_completed);
                w.put_u64(v.proposals_missed);
            }
            Particle::PreparedRegisteredUpdate(p) => {
                put_key(w, &p.validator);
                w.put_u8(u8::from(p.registered));
            }
            Particle::PreparedRakeUpdate(p) => {
                put_key(w, &p.validator);
                w.put_u64(p.rake_bps);
            }
            Particle::PreparedOwnerUpdate(p) => {
                put_key(w, &p.validator);
                p.owner.encode(w);
            }
            Particle::SystemMetadata(m) => {
                put_key(w, &m.validator);
                w.put_raw(&m.data);
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(64);
        self.encode(&mut w);
        w.into_bytes()
    }

    /// Decode from the canonical substate encoding.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let type_byte = r.u8()?;
        let type_id = SubstateTypeId::from_byte(type_byte).ok_or(CodecError::UnknownTag {
            what: "substate type",
            tag: type_byte,
        })?;
        let reserved = r.u8()?;
        if reserved != 0 {
            return Err(CodecError::InvalidValue("reserved byte"));
        }
        Ok(match type_id {
            SubstateTypeId::Tokens => Particle::Tokens(TokensInAccount {
                owner: REAddr::decode(r)?,
                amount: get_u256(r)?,
            }),
            SubstateTypeId::EpochData => Particle::EpochData(EpochData { epoch: r.u64()? }),
            SubstateTypeId::RoundData => Particle::RoundData(RoundData {
                view: r.u64()?,
                timestamp_ms: r.u64()?,
            }),
            SubstateTypeId::ValidatorStake => Particle::ValidatorStake(ValidatorStakeData {
                validator: get_key(r)?,
                total_stake: get_u256(r)?,
                total_ownership: get_u256(r)?,
                rake_bps: r.u64()?,
                owner: REAddr::decode(r)?,
                registered: r.u8()? != 0,
            }),
            SubstateTypeId::StakeOwnership => Particle::StakeOwnership(StakeOwnership {
                delegate: get_key(r)?,
                owner: REAddr::decode(r)?,
                amount: get_u256(r)?,
            }),
            SubstateTypeId::ExittingStake => Particle::ExittingStake(ExittingStake {
                epoch_unlocked: r.u64()?,
                delegate: get_key(r)?,
                owner: REAddr::decode(r)?,
                amount: get_u256(r)?,
            }),
            SubstateTypeId::PreparedStake => Particle::PreparedStake(PreparedStake {
                delegate: get_key(r)?,
                owner: REAddr::decode(r)?,
                amount: get_u256(r)?,
            }),
            SubstateTypeId::PreparedUnstake => Particle::PreparedUnstake(PreparedUnstake {
                delegate: get_key(r)?,
                owner: REAddr::decode(r)?,
                amount: get_u256(r)?,
            }),
            SubstateTypeId::ValidatorBftData => Particle::ValidatorBftData(ValidatorBftData {
                validator: get_key(r)?,
                proposals_completed: r.u64()?,
                proposals_missed: r.u64()?,
            }),
            SubstateTypeId::PreparedRegisteredUpdate => {
                Particle::PreparedRegisteredUpdate(PreparedRegisteredUpdate {
                    validator: get_key(r)?,
                    registered: r.u8()? != 0,
                })
            }
            SubstateTypeId::PreparedRakeUpdate => {
                Particle::PreparedRakeUpdate(PreparedRakeUpdate {
                    validator: get_key(r)?,
                    rake_bps: r.u64()?,
                })
            }
            SubstateTypeId::PreparedOwnerUpdate => {
                Particle::PreparedOwnerUpdate(PreparedOwnerUpdate {
                    validator: get_key(r)?,
                    owner: REAddr::decode(r)?,
                })
            }
            SubstateTypeId::SystemMetadata => Particle::SystemMetadata(ValidatorSystemMetadata {
                validator: get_key(r)?,
                data: r.array::<32>()?,
            }),
        })
    }

    /// Static (stateless) validity of the particle itself.
    pub fn static_check(&self) -> Result<(), &'static str> {
        match self {
            Particle::Tokens(t) => {
                if t.amount.is_zero() {
                    return Err("token amount must be positive");
                }
                if t.owner == REAddr::System {
                    return Err("tokens cannot be owned by the system address");
                }
                Ok(())
            }
            Particle::StakeOwnership(s) => {
                if s.amount.is_zero() {
                    return Err("ownership amount must be positive");
                }
                Ok(())
            }
            Particle::PreparedStake(p) => {
                if p.amount.is_zero() {
                    return Err("prepared stake must be positive");
                }
                Ok(())
            }
            Particle::PreparedUnstake(p) => {
                if p.amount.is_zero() {
                    return Err("prepared unstake must be positive");
                }
                Ok(())
            }
            Particle::PreparedRakeUpdate(p) => {
                if p.rake_bps > RAKE_MAX_BPS {
                    return Err("rake above 100%");
                }
                Ok(())
            }
            Particle::ValidatorStake(s) => {
                if s.rake_bps > RAKE_MAX_BPS {
                    return Err("rake above 100%");
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Whether this particle is a legal virtual initial state (VDOWN target).
    pub fn is_virtual_initial(&self) -> bool {
        match self {
            Particle::ValidatorStake(s) => *s == ValidatorStakeData::initial(s.validator),
            Particle::SystemMetadata(m) => m.data == [0u8; 32],
            _ => false,
        }
    }

    /// The virtual substate id of this particle.
    pub fn virtual_id(&self) -> SubstateId {
        SubstateId::virtual_of(&self.to_bytes())
    }
}

impl fmt::Debug for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Particle::Tokens(t) => write!(f, "Tokens({:?}, {})", t.owner, t.amount),
            Particle::EpochData(e) => write!(f, "EpochData({})", e.epoch),
            Particle::RoundData(r) => write!(f, "RoundData({})", r.view),
            Particle::ValidatorStake(s) => {
                write!(f, "ValidatorStake({:?}, stake={})", s.validator, s.total_stake)
            }
            Particle::StakeOwnership(s) => {
                write!(f, "StakeOwnership({:?}, {:?}, {})", s.delegate, s.owner, s.amount)
            }
            Particle::ExittingStake(e) => {
                write!(f, "ExittingStake(unlock@{}, {})", e.epoch_unlocked, e.amount)
            }
            Particle::PreparedStake(p) => write!(f, "PreparedStake({:?}, {})", p.delegate, p.amount),
            Particle::PreparedUnstake(p) => {
                write!(f, "PreparedUnstake({:?}, {})", p.delegate, p.amount)
            }
            Particle::ValidatorBftData(v) => write!(
                f,
                "ValidatorBftData({:?}, {}/{})",
                v.validator, v.proposals_completed, v.proposals_missed
            ),
            Particle::PreparedRegisteredUpdate(p) => {
                write!(f, "PreparedRegisteredUpdate({:?}, {})", p.validator, p.registered)
            }
            Particle::PreparedRakeUpdate(p) => {
                write!(f, "PreparedRakeUpdate({:?}, {}bps)", p.validator, p.rake_bps)
            }
            Particle::PreparedOwnerUpdate(p) => {
                write!(f, "PreparedOwnerUpdate({:?})", p.validator)
            }
            Particle::SystemMetadata(m) => write!(f, "SystemMetadata({:?})", m.validator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_types::test_utils::test_keypair;

    fn round_trip(particle: Particle) {
        let bytes = particle.to_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = Particle::decode(&mut r).expect("decodes");
        r.expect_end().expect("no trailing bytes");
        assert_eq!(particle, decoded);
    }

    #[test]
    fn particles_round_trip() {
        let key = test_keypair(1).node_key();
        let addr = REAddr::of_key(test_keypair(2).node_key());
        round_trip(Particle::Tokens(TokensInAccount {
            owner: addr,
            amount: U256::from(12345u64),
        }));
        round_trip(Particle::EpochData(EpochData { epoch: 7 }));
        round_trip(Particle::RoundData(RoundData {
            view: 3,
            timestamp_ms: 99,
        }));
        round_trip(Particle::ValidatorStake(ValidatorStakeData {
            validator: key,
            total_stake: U256::from(1000u64),
            total_ownership: U256::from(900u64),
            rake_bps: 250,
            owner: addr,
            registered: true,
        }));
        round_trip(Particle::ExittingStake(ExittingStake {
            epoch_unlocked: 12,
            delegate: key,
            owner: addr,
            amount: U256::MAX,
        }));
        round_trip(Particle::SystemMetadata(ValidatorSystemMetadata {
            validator: key,
            data: [9u8; 32],
        }));
    }

    #[test]
    fn reserved_byte_must_be_zero() {
        let particle = Particle::EpochData(EpochData { epoch: 1 });
        let mut bytes = particle.to_bytes();
        bytes[1] = 0x01;
        assert!(Particle::decode(&mut Reader::new(&bytes)).is_err());
    }

    #[test]
    fn zero_amount_tokens_fail_static_check() {
        let particle = Particle::Tokens(TokensInAccount {
            owner: REAddr::of_key(test_keypair(1).node_key()),
            amount: U256::zero(),
        });
        assert!(particle.static_check().is_err());
    }

    #[test]
    fn virtual_initial_stake_is_recognized() {
        let key = test_keypair(3).node_key();
        let initial = Particle::ValidatorStake(ValidatorStakeData::initial(key));
        assert!(initial.is_virtual_initial());

        let touched = Particle::ValidatorStake(ValidatorStakeData {
            registered: true,
            ..ValidatorStakeData::initial(key)
        });
        assert!(!touched.is_virtual_initial());
    }

    #[test]
    fn stake_and_unstake_are_inverse_at_par() {
        let key = test_keypair(4).node_key();
        let owner = REAddr::of_key(test_keypair(5).node_key());
        let initial = ValidatorStakeData::initial(key);
        let (staked, ownership) = initial.stake(owner, U256::from(500u64)).unwrap();
        assert_eq!(ownership.amount, U256::from(500u64));

        let (unstaked, exit) = staked
            .unstake_ownership(owner, ownership.amount, 9)
            .unwrap();
        assert_eq!(exit.amount, U256::from(500u64));
        assert!(unstaked.total_stake.is_zero());
        assert!(unstaked.total_ownership.is_zero());
    }
}
