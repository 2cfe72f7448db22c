//! Core event/action model for the Cascade node.
//!
//! This crate provides the foundational pieces of the node architecture:
//!
//! - [`Event`]: All possible inputs to the state machine
//! - [`Action`]: All possible outputs from the state machine
//! - [`EventPriority`]: Ordering priority for events at the same timestamp
//! - [`StateMachine`]: The trait the node state machine implements
//!
//! # Architecture
//!
//! The node is built on a simple event-driven model:
//!
//! ```text
//! Events → StateMachine::handle() → Actions
//! ```
//!
//! The state machine is:
//! - **Synchronous**: No async, no .await
//! - **Deterministic**: Same state + event = same actions
//! - **Pure-ish**: Mutates self, but performs no I/O
//!
//! All I/O is handled by the runner (simulation or production) which:
//! 1. Delivers events to the state machine
//! 2. Executes the returned actions
//! 3. Converts action results back into events

mod action;
mod event;
mod traits;

pub use action::Action;
pub use event::{Event, EventPriority};
pub use traits::StateMachine;

use cascade_types::{Epoch, View};

/// Identification for scheduled timers.
///
/// Every timer carries the tag of the state it was armed for; handlers
/// compare the tag against their current state and drop stale firings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Pacemaker timeout for a specific view.
    ViewTimeout { epoch: Epoch, view: View },
    /// Patience timeout for an in-flight sync request.
    SyncPatience { token: u64 },
}
