//! Deterministic simulation of a Cascade validator network.
//!
//! Nodes run their real state machines; only time, the network and storage
//! are simulated. A single seeded event queue makes every run reproducible,
//! which turns consensus scenarios (silent leaders, partitions, Byzantine
//! proposals, catch-up sync) into plain assertions.

mod event_queue;
mod runner;

pub use event_queue::EventKey;
pub use runner::{client_keypair, validator_keypair, SimConfig, SimulationRunner};
