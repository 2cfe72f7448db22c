//! Ledger commitment and state computation.
//!
//! The [`StateComputer`] is the bridge between consensus and the constraint
//! machine. `prepare` executes a vertex's commands in preview against the
//! committed state plus its uncommitted ancestors; `commit` applies a
//! proven, ordered command batch and persists the proof. Commits are
//! idempotent by state version and totally ordered; a proof that
//! contradicts the locally recomputed accumulator is fatal.

mod accumulator;
mod computer;

pub use accumulator::chain_accumulator;
pub use computer::{LedgerError, PreparedVertex, StateComputer};
