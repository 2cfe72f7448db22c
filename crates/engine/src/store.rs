//! Engine store abstractions.
//!
//! The engine reads and writes substates through a narrow, single-writer,
//! transactional contract. Any backing store satisfying it works; the
//! in-memory implementation here backs tests and the deterministic
//! simulation, and a preview layer stacks uncommitted writes over a base
//! store for `prepare`.

use crate::addressing::{SubstateId, SubstateTypeId};
use crate::particles::Particle;
use std::collections::{BTreeMap, HashSet};

/// One substate-level effect of a validated transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateUpdate {
    /// A new UP substate.
    Up { id: SubstateId, particle: Particle },
    /// A physical substate shut down.
    Down { id: SubstateId },
    /// A virtual substate shut down for the first (and only) time.
    VirtualDown { id: SubstateId },
}

/// Read access for the constraint machine's stateful pass.
pub trait CmStore {
    /// The particle at `id`, if it is currently UP.
    fn load_up_substate(&self, id: &SubstateId) -> Option<Particle>;

    /// Whether the virtual substate at `id` was ever shut down.
    fn is_virtual_down(&self, id: &SubstateId) -> bool;
}

/// Full store contract: reads plus indexed scans and transactional writes.
pub trait EngineStore: CmStore {
    /// All UP substates of a type, ordered by substate id.
    ///
    /// The deterministic order matters: the epoch-boundary constructor
    /// iterates these cursors and every validator must see the same order.
    fn substates_of_type(&self, type_id: SubstateTypeId) -> Vec<(SubstateId, Particle)>;

    /// Apply a batch of updates atomically.
    fn apply(&mut self, updates: &[StateUpdate]);
}

/// In-memory single-writer store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryEngineStore {
    substates: BTreeMap<SubstateId, Particle>,
    virtual_downs: HashSet<SubstateId>,
}

impl InMemoryEngineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn up_count(&self) -> usize {
        self.substates.len()
    }
}

impl CmStore for InMemoryEngineStore {
    fn load_up_substate(&self, id: &SubstateId) -> Option<Particle> {
        self.substates.get(id).cloned()
    }

    fn is_virtual_down(&self, id: &SubstateId) -> bool {
        self.virtual_downs.contains(id)
    }
}

impl EngineStore for InMemoryEngineStore {
    fn substates_of_type(&self, type_id: SubstateTypeId) -> Vec<(SubstateId, Particle)> {
        self.substates
            .iter()
            .filter(|(_, particle)| particle.type_id() == type_id)
            .map(|(id, particle)| (*id, particle.clone()))
            .collect()
    }

    fn apply(&mut self, updates: &[StateUpdate]) {
        for update in updates {
            match update {
                StateUpdate::Up { id, particle } => {
                    self.substates.insert(*id, particle.clone());
                }
                StateUpdate::Down { id } => {
                    self.substates.remove(id);
                }
                StateUpdate::VirtualDown { id } => {
                    self.virtual_downs.insert(*id);
                }
            }
        }
    }
}

/// Uncommitted writes layered over a base store.
///
/// `prepare` runs transactions against the last committed state plus the
/// writes of uncommitted ancestor vertices; this layer holds those writes
/// without touching the base.
pub struct TransientStore<'a> {
    base: &'a dyn EngineStore,
    ups: BTreeMap<SubstateId, Particle>,
    downs: HashSet<SubstateId>,
    virtual_downs: HashSet<SubstateId>,
}

impl<'a> TransientStore<'a> {
    pub fn new(base: &'a dyn EngineStore) -> Self {
        TransientStore {
            base,
            ups: BTreeMap::new(),
            downs: HashSet::new(),
            virtual_downs: HashSet::new(),
        }
    }

    /// Stack further updates on the layer.
    pub fn stage(&mut self, updates: &[StateUpdate]) {
        for update in updates {
            match update {
                StateUpdate::Up { id, particle } => {
                    self.ups.insert(*id, particle.clone());
                }
                StateUpdate::Down { id } => {
                    self.ups.remove(id);
                    self.downs.insert(*id);
                }
                StateUpdate::VirtualDown { id } => {
                    self.virtual_downs.insert(*id);
                }
            }
        }
    }
}

impl CmStore for TransientStore<'_> {
    fn load_up_substate(&self, id: &SubstateId) -> Option<Particle> {
        if self.downs.contains(id) {
            return None;
        }
        self.ups
            .get(id)
            .cloned()
            .or_else(|| self.base.load_up_substate(id))
    }

    fn is_virtual_down(&self, id: &SubstateId) -> bool {
        self.virtual_downs.contains(id) || self.base.is_virtual_down(id)
    }
}

impl EngineStore for TransientStore<'_> {
    fn substates_of_type(&self, type_id: SubstateTypeId) -> Vec<(SubstateId, Particle)> {
        let mut merged: BTreeMap<SubstateId, Particle> = self
            .base
            .substates_of_type(type_id)
            .into_iter()
            .filter(|(id, _)| !self.downs.contains(id))
            .collect();
        for (id, particle) in &self.ups {
            if particle.type_id() == type_id {
                merged.insert(*id, particle.clone());
            }
        }
        merged.into_iter().collect()
    }

    fn apply(&mut self, updates: &[StateUpdate]) {
        self.stage(updates);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::REAddr;
    use crate::particles::TokensInAccount;
    use cascade_types::test_utils::test_keypair;
    use cascade_types::{CommandId, Hash, U256};

    fn tokens(amount: u64) -> Particle {
        Particle::Tokens(TokensInAccount {
            owner: REAddr::of_key(test_keypair(1).node_key()),
            amount: U256::from(amount),
        })
    }

    fn id(n: u8) -> SubstateId {
        SubstateId::physical(CommandId(Hash::sha256(&[n])), 0)
    }

    #[test]
    fn apply_up_then_down() {
        let mut store = InMemoryEngineStore::new();
        store.apply(&[StateUpdate::Up {
            id: id(1),
            particle: tokens(5),
        }]);
        assert!(store.load_up_substate(&id(1)).is_some());

        store.apply(&[StateUpdate::Down { id: id(1) }]);
        assert!(store.load_up_substate(&id(1)).is_none());
    }

    #[test]
    fn transient_layer_shadows_base() {
        let mut base = InMemoryEngineStore::new();
        base.apply(&[StateUpdate::Up {
            id: id(1),
            particle: tokens(5),
        }]);

        let mut layer = TransientStore::new(&base);
        layer.stage(&[
            StateUpdate::Down { id: id(1) },
            StateUpdate::Up {
                id: id(2),
                particle: tokens(7),
            },
        ]);

        assert!(layer.load_up_substate(&id(1)).is_none());
        assert!(layer.load_up_substate(&id(2)).is_some());
        // The base is untouched.
        assert!(base.load_up_substate(&id(1)).is_some());
    }

    #[test]
    fn virtual_downs_accumulate_through_layers() {
        let mut base = InMemoryEngineStore::new();
        base.apply(&[StateUpdate::VirtualDown { id: id(3) }]);

        let layer = TransientStore::new(&base);
        assert!(layer.is_virtual_down(&id(3)));
        assert!(!layer.is_virtual_down(&id(4)));
    }
}
