//! A minimal FIFO mempool.
//!
//! Batching policy is out of scope for the core; this holds validated
//! commands in arrival order and hands the proposer one command per
//! vertex, which is all the proposer contract requires.

use cascade_bft::CommandSource;
use cascade_types::{Command, CommandId};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Why a command was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MempoolRejection {
    #[error("mempool is full")]
    Full,
    #[error("command already pending")]
    Duplicate,
}

/// FIFO command queue with duplicate suppression.
pub struct Mempool {
    queue: VecDeque<Command>,
    pending: HashSet<CommandId>,
    max_size: usize,
}

impl Mempool {
    pub fn new(max_size: usize) -> Self {
        Mempool {
            queue: VecDeque::new(),
            pending: HashSet::new(),
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn contains(&self, id: &CommandId) -> bool {
        self.pending.contains(id)
    }

    /// Admit an already-validated command.
    pub fn add(&mut self, command: Command) -> Result<(), MempoolRejection> {
        if self.queue.len() >= self.max_size {
            return Err(MempoolRejection::Full);
        }
        if !self.pending.insert(command.id()) {
            return Err(MempoolRejection::Duplicate);
        }
        debug!(command = ?command.id(), pending = self.queue.len() + 1, "command admitted");
        self.queue.push_back(command);
        Ok(())
    }

    /// Drop commands that just committed (possibly via another proposer).
    pub fn remove_committed(&mut self, committed: impl IntoIterator<Item = CommandId>) {
        for id in committed {
            if self.pending.remove(&id) {
                self.queue.retain(|command| command.id() != id);
            }
        }
    }
}

impl CommandSource for Mempool {
    fn next_command(&mut self) -> Option<Command> {
        let command = self.queue.pop_front()?;
        self.pending.remove(&command.id());
        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_and_duplicate_rejection() {
        let mut mempool = Mempool::new(10);
        let a = Command::new(vec![1]);
        let b = Command::new(vec![2]);
        mempool.add(a.clone()).unwrap();
        mempool.add(b.clone()).unwrap();
        assert_eq!(mempool.add(a.clone()), Err(MempoolRejection::Duplicate));

        assert_eq!(mempool.next_command(), Some(a));
        assert_eq!(mempool.next_command(), Some(b));
        assert_eq!(mempool.next_command(), None);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut mempool = Mempool::new(1);
        mempool.add(Command::new(vec![1])).unwrap();
        assert_eq!(
            mempool.add(Command::new(vec![2])),
            Err(MempoolRejection::Full)
        );
    }

    #[test]
    fn committed_commands_are_evicted() {
        let mut mempool = Mempool::new(10);
        let a = Command::new(vec![1]);
        let b = Command::new(vec![2]);
        mempool.add(a.clone()).unwrap();
        mempool.add(b.clone()).unwrap();

        mempool.remove_committed([a.id()]);
        assert_eq!(mempool.len(), 1);
        assert_eq!(mempool.next_command(), Some(b));
    }
}
