//! Rulesets: the constraint-machine configuration active during an epoch.

use crate::procedures::{Procedure, TransitionToken};
use crate::scrypts;
use cascade_types::U256;

/// Numeric knobs of a ruleset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesConfig {
    /// Views per epoch; proposing past this bound forces the epoch boundary.
    pub max_rounds: u64,
    /// Maximum `MSG` instructions per transaction.
    pub max_messages: usize,
    /// Emission per completed proposal.
    pub rewards_per_proposal: U256,
    /// Minimum completed-proposal share (basis points) to earn rewards.
    pub min_completed_proposals_bps: u64,
    /// Epochs between unstaking and unlock.
    pub unstaking_epoch_delay: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        RulesConfig {
            max_rounds: 10_000,
            max_messages: 0,
            rewards_per_proposal: U256::from(10u64),
            min_completed_proposals_bps: 9_800,
            unstaking_epoch_delay: 1,
        }
    }
}

/// A named ruleset: configuration plus the transition procedure tables.
///
/// One `RERules` is active per epoch; fork activation swaps it atomically
/// with the epoch change.
#[derive(Debug, Clone)]
pub struct RERules {
    name: &'static str,
    config: RulesConfig,
}

impl RERules {
    pub fn new(name: &'static str, config: RulesConfig) -> Self {
        RERules { name, config }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &RulesConfig {
        &self.config
    }

    pub fn max_rounds(&self) -> u64 {
        self.config.max_rounds
    }

    /// Resolve the procedure for a transition token, first match across the
    /// scrypts wins. The scrypts register disjoint tokens.
    pub fn procedure_for(&self, token: &TransitionToken) -> Option<Procedure> {
        scrypts::tokens::procedure_for(token)
            .or_else(|| scrypts::validators::procedure_for(token))
            .or_else(|| scrypts::epoch::procedure_for(token))
    }
}
