//! The ledger accumulator: a running hash over committed command ids.

use cascade_types::{CommandId, Hash};

/// Extend the accumulator by one command id.
///
/// Chaining is per command: every committed command advances the state
/// version by one and the accumulator by one hash step, so any grouping of
/// commands into batches recomputes to the same value.
pub fn chain_accumulator(accumulator: Hash, command: CommandId) -> Hash {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(accumulator.as_bytes());
    data[32..].copy_from_slice(command.0.as_bytes());
    Hash::sha256(&data)
}
