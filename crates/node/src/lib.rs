//! The Cascade node: one state machine composing every subsystem.
//!
//! The node owns the epoch manager, BFT processor, ledger, sync service
//! and mempool by value, and dispatches [`cascade_core::Event`]s to them.
//! Everything runs on one run-to-completion loop; the runner (simulation
//! or production shell) performs the returned actions.

mod config;
mod mempool;
mod state;

pub use config::NodeConfig;
pub use mempool::{Mempool, MempoolRejection};
pub use state::{timer_event, NodeStateMachine};
