//! The state machine contract.

use crate::{Action, Event};
use std::time::Duration;

/// A synchronous, deterministic state machine.
///
/// The runner sets the clock before each call; `handle` must not perform
/// I/O and must be a pure function of `(state, now, event)`.
pub trait StateMachine {
    /// Advance the machine's notion of the current time.
    fn set_time(&mut self, now: Duration);

    /// Process one event to completion, returning the actions it caused.
    fn handle(&mut self, event: Event) -> Vec<Action>;
}
