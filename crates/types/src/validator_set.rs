//! Validator sets with stake-weighted quorum arithmetic.

use crate::{CryptoError, NodeKey};
use primitive_types::U256;
use std::collections::BTreeMap;
use std::fmt;

/// A single validator entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
    pub key: NodeKey,
    pub power: U256,
}

/// Errors constructing a validator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidatorSetError {
    #[error("validator set is empty")]
    Empty,
    #[error("duplicate validator key")]
    DuplicateKey,
    #[error("validator with zero power")]
    ZeroPower,
    #[error("total power overflows u256")]
    PowerOverflow,
    #[error("invalid validator key: {0}")]
    InvalidKey(#[from] CryptoError),
}

/// An ordered set of validators with their powers.
///
/// Iteration order is canonical (key byte order), equality is
/// order-independent by construction. The quorum threshold is the Byzantine
/// `⌈2·total/3⌉ + 1`, computed in full-width U256 so that stake sums near
/// `2^256 - 1` stay exact.
#[derive(Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    validators: BTreeMap<NodeKey, U256>,
    total_power: U256,
}

impl ValidatorSet {
    /// Build a set from validator entries. Rejects duplicates, zero powers
    /// and power sums that would overflow.
    pub fn from_validators(
        entries: impl IntoIterator<Item = Validator>,
    ) -> Result<Self, ValidatorSetError> {
        let mut validators = BTreeMap::new();
        let mut total_power = U256::zero();
        for entry in entries {
            if entry.power.is_zero() {
                return Err(ValidatorSetError::ZeroPower);
            }
            if validators.insert(entry.key, entry.power).is_some() {
                return Err(ValidatorSetError::DuplicateKey);
            }
            total_power = total_power
                .checked_add(entry.power)
                .ok_or(ValidatorSetError::PowerOverflow)?;
        }
        if validators.is_empty() {
            return Err(ValidatorSetError::Empty);
        }
        Ok(ValidatorSet {
            validators,
            total_power,
        })
    }

    /// Total power across all validators.
    pub fn total_power(&self) -> U256 {
        self.total_power
    }

    /// Minimum power for a Byzantine quorum: `⌈2·total/3⌉ + 1`.
    pub fn quorum_threshold(&self) -> U256 {
        // With total = 3q + r, ⌈2·total/3⌉ = 2q + r; splitting the division
        // this way also keeps 2·total from overflowing.
        (self.total_power / 3) * 2 + (self.total_power % 3) + 1
    }

    /// Whether the given accumulated power reaches quorum.
    pub fn is_quorum(&self, power: U256) -> bool {
        power >= self.quorum_threshold()
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.validators.contains_key(key)
    }

    /// Power of a member, zero for non-members.
    pub fn power_of(&self, key: &NodeKey) -> U256 {
        self.validators.get(key).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Validators in canonical (key byte) order.
    pub fn iter(&self) -> impl Iterator<Item = Validator> + '_ {
        self.validators.iter().map(|(key, power)| Validator {
            key: *key,
            power: *power,
        })
    }

    /// Member keys in canonical order.
    pub fn keys(&self) -> impl Iterator<Item = &NodeKey> + '_ {
        self.validators.keys()
    }
}

impl fmt::Debug for ValidatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorSet")
            .field("validators", &self.validators.len())
            .field("total_power", &self.total_power)
            .finish()
    }
}
