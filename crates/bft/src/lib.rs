//! BFT consensus core.
//!
//! This crate provides a synchronous, leader-based, pipelined chained-BFT
//! state machine (3-chain commit rule) driven by the node event loop:
//!
//! - [`Pacemaker`] — view progression, exponential timeout backoff
//! - [`VertexStore`] — the uncommitted vertex tree above the last commit
//! - [`PendingVotes`] — vote and timeout accumulation into QCs and TCs
//! - [`SafetyRules`] — the voting rule (last voted view, locked view)
//! - [`BftEventProcessor`] — proposal/vote/timeout processing
//!
//! All I/O happens through returned [`cascade_core::Action`]s; the
//! processor never blocks and never touches the network or disk itself.
//!
//! # Safety
//!
//! A validator votes for a proposal only if its view is newer than the last
//! voted view and its parent is at or above the locked view (the parent of
//! the highest committed QC). Together with quorum intersection this gives
//! the classic 3-chain guarantee: no two conflicting vertices commit at the
//! same view.
//!
//! # Liveness
//!
//! Views time out on an exponential schedule. A quorum of timeout votes
//! forms a TC; the next leader proposes on top of the highest QC any
//! timeout signer had seen, which re-synchronizes the chain after silence
//! or equivocation.

mod config;
mod pacemaker;
mod processor;
mod safety;
mod vertex_store;
mod votes;

pub use config::BftConfig;
pub use pacemaker::Pacemaker;
pub use processor::{BftEventProcessor, CommandSource, NoCommands};
pub use safety::SafetyRules;
pub use vertex_store::{VertexStore, VertexStoreError};
pub use votes::{PendingVotes, VoteOutcome, VoteRejection};
