//! Client commands: opaque payloads ordered by consensus.

use crate::Hash;
use std::fmt;
use std::sync::Arc;

/// A command identifier: double SHA-256 of the payload.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId(pub Hash);

impl fmt::Debug for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd:{:?}", self.0)
    }
}

/// An opaque command payload plus its id.
///
/// Consensus orders commands without interpreting them; only the constraint
/// machine looks inside. The payload is shared, not cloned, as commands flow
/// through proposals, the vertex store and the ledger.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    payload: Arc<[u8]>,
    id: CommandId,
}

impl Command {
    pub fn new(payload: Vec<u8>) -> Self {
        let id = CommandId(Hash::sha256_twice(&payload));
        Command {
            payload: payload.into(),
            id,
        }
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("bytes", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_double_sha256_of_payload() {
        let cmd = Command::new(vec![1, 2, 3]);
        assert_eq!(cmd.id().0, Hash::sha256_twice(&[1, 2, 3]));
    }
}
