//! Deterministic stake-weighted leader election.
//!
//! Every honest node must pick the identical leader for a view, so the
//! draw is seeded from protocol state only: `sha256(epoch || view)` feeds a
//! ChaCha stream, and a uniform draw below the total power selects the
//! validator whose cumulative power interval contains it. Expected leader
//! share equals stake share; ties in the walk resolve by key byte order
//! because validator sets iterate canonically.

use crate::{Epoch, Hash, NodeKey, ValidatorSet, View};
use primitive_types::U256;
use rand::RngCore;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// The leader of `view` in `epoch` for the given validator set.
pub fn leader_for(validators: &ValidatorSet, epoch: Epoch, view: View) -> NodeKey {
    let mut seed_input = [0u8; 16];
    seed_input[..8].copy_from_slice(&epoch.0.to_be_bytes());
    seed_input[8..].copy_from_slice(&view.0.to_be_bytes());
    let seed = Hash::sha256(&seed_input);
    let mut rng = ChaCha8Rng::from_seed(seed.to_bytes());

    let draw = uniform_below(&mut rng, validators.total_power());

    let mut cumulative = U256::zero();
    for validator in validators.iter() {
        cumulative += validator.power;
        if draw < cumulative {
            return validator.key;
        }
    }
    // total_power is the sum of the iterated powers, so the walk always
    // terminates inside the loop.
    unreachable!("draw below total power selects a validator")
}

/// A uniform U256 below `bound` (which is never zero for a valid set).
///
/// Rejection sampling over the top: draw 256 bits, retry while the draw
/// falls into the final partial interval. The retry probability is < 1/2
/// per round, and the loop is deterministic given the seeded stream.
fn uniform_below(rng: &mut ChaCha8Rng, bound: U256) -> U256 {
    debug_assert!(!bound.is_zero());
    // largest multiple of bound that fits in 256 bits
    let limit = U256::MAX - (U256::MAX % bound);
    loop {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        let draw = U256::from_big_endian(&bytes);
        if draw < limit || limit.is_zero() {
            return draw % bound;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_validator_set;

    #[test]
    fn leader_is_deterministic() {
        let set = test_validator_set(&[(1, 100), (2, 100), (3, 100), (4, 100)]);
        let a = leader_for(&set, Epoch(3), View(7));
        let b = leader_for(&set, Epoch(3), View(7));
        assert_eq!(a, b);
    }

    #[test]
    fn different_views_rotate_the_leader() {
        let set = test_validator_set(&[(1, 100), (2, 100), (3, 100), (4, 100)]);
        let leaders: std::collections::HashSet<_> =
            (0..32).map(|v| leader_for(&set, Epoch(0), View(v))).collect();
        // With 32 draws over 4 equal validators, all of them lead sometimes.
        assert_eq!(leaders.len(), 4);
    }

    #[test]
    fn stake_weighting_biases_the_draw() {
        let set = test_validator_set(&[(1, 1), (2, 999)]);
        let heavy = crate::test_utils::test_keypair(2).node_key();
        let heavy_count = (0..200)
            .filter(|v| leader_for(&set, Epoch(0), View(*v)) == heavy)
            .count();
        // Expected ~199.8; anything above 180 rules out uniform selection.
        assert!(heavy_count > 180, "heavy validator led {heavy_count}/200");
    }

    #[test]
    fn single_validator_always_leads() {
        let set = test_validator_set(&[(5, 42)]);
        let only = crate::test_utils::test_keypair(5).node_key();
        for v in 0..16 {
            assert_eq!(leader_for(&set, Epoch(1), View(v)), only);
        }
    }
}
