//! Ledger catch-up: pulling committed command batches from peers.
//!
//! The sync state machine tracks the locally committed header (`current`)
//! and the highest proven header it has seen (`target`). While behind, it
//! requests batches starting at its own state version from one candidate
//! peer at a time, re-sending on a patience timeout until the ledger
//! catches up. Responses are validated by the ledger itself (proof
//! signatures and accumulator chaining); sync only sequences the requests.

use cascade_core::{Action, Event, TimerId};
use cascade_ledger::{LedgerError, StateComputer};
use cascade_messages::{Message, SyncResponse};
use cascade_types::{LedgerProof, NodeKey, StateVersion};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Commands requested per batch.
    pub batch_size: usize,
    /// Re-send interval for unanswered requests.
    pub patience: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            batch_size: 10,
            patience: Duration::from_millis(2_000),
        }
    }
}

/// An unanswered batch request.
#[derive(Debug, Clone)]
struct SyncInProgress {
    token: u64,
    candidates: Vec<NodeKey>,
    attempt: usize,
}

/// The catch-up state machine.
pub struct SyncState {
    config: SyncConfig,
    current_version: StateVersion,
    target: Option<LedgerProof>,
    in_flight: Option<SyncInProgress>,
    next_token: u64,
}

impl SyncState {
    pub fn new(config: SyncConfig, current_version: StateVersion) -> Self {
        SyncState {
            config,
            current_version,
            target: None,
            in_flight: None,
            next_token: 0,
        }
    }

    pub fn current_version(&self) -> StateVersion {
        self.current_version
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Consensus noticed a proven header ahead of the ledger.
    pub fn on_local_sync_request(
        &mut self,
        target: LedgerProof,
        candidates: Vec<NodeKey>,
    ) -> Vec<Action> {
        let target_version = target.state_version();
        let known = self
            .target
            .as_ref()
            .map(|proof| proof.state_version())
            .unwrap_or(self.current_version);
        if target_version <= known {
            return vec![];
        }
        info!(
            target = target_version.0,
            current = self.current_version.0,
            "sync target raised"
        );
        self.target = Some(target);
        self.send_request(candidates, 0)
    }

    /// A batch arrived: hand it to the ledger and continue until caught up.
    pub fn on_sync_response(
        &mut self,
        response: SyncResponse,
        ledger: &mut StateComputer,
    ) -> Vec<Action> {
        let batch = response.batch;
        let header_version = batch.proof.state_version();
        if header_version <= self.current_version {
            debug!(version = header_version.0, "stale sync response");
            return vec![];
        }

        match ledger.commit(&batch) {
            Ok(_) => {}
            Err(LedgerError::Corruption(reason)) => {
                // A proven batch that contradicts local state is fatal.
                warn!(%reason, "sync batch contradicts the local ledger");
                return vec![];
            }
            Err(error) => {
                warn!(%error, "sync batch rejected");
                return vec![];
            }
        }

        self.current_version = header_version;
        let mut actions = vec![Action::EnqueueInternal {
            event: Event::LedgerCommitted { proof: batch.proof },
        }];

        match &self.target {
            Some(target) if target.state_version() > self.current_version => {
                let candidates = self
                    .in_flight
                    .take()
                    .map(|progress| progress.candidates)
                    .unwrap_or_default();
                actions.extend(self.send_request(candidates, 0));
            }
            _ => {
                if self.target.is_some() {
                    info!(version = self.current_version.0, "sync complete");
                }
                self.target = None;
                self.in_flight = None;
            }
        }
        actions
    }

    /// The patience timer fired: re-send to another candidate.
    pub fn on_patience(&mut self, token: u64) -> Vec<Action> {
        let Some(progress) = self.in_flight.take() else {
            return vec![];
        };
        if progress.token != token {
            // A newer request replaced this one; the timer is stale.
            self.in_flight = Some(progress);
            return vec![];
        }
        let behind = self
            .target
            .as_ref()
            .is_some_and(|target| target.state_version() > self.current_version);
        if !behind {
            return vec![];
        }
        debug!(attempt = progress.attempt + 1, "sync request timed out; retrying");
        self.send_request(progress.candidates, progress.attempt + 1)
    }

    /// The ledger committed locally (consensus path); sync may be obsolete.
    pub fn on_version_update(&mut self, version: StateVersion) {
        if version > self.current_version {
            self.current_version = version;
        }
        if let Some(target) = &self.target {
            if target.state_version() <= self.current_version {
                self.target = None;
                self.in_flight = None;
            }
        }
    }

    fn send_request(&mut self, candidates: Vec<NodeKey>, attempt: usize) -> Vec<Action> {
        if candidates.is_empty() {
            warn!("sync has no candidate peers");
            return vec![];
        }
        // Rotate deterministically through the candidates across retries.
        let peer = candidates[attempt % candidates.len()];
        let token = self.next_token;
        self.next_token += 1;
        self.in_flight = Some(SyncInProgress {
            token,
            candidates,
            attempt,
        });
        debug!(
            to = ?peer,
            from_version = self.current_version.0,
            "requesting sync batch"
        );
        vec![
            Action::SendTo {
                target: peer,
                message: Message::sync_request(self.current_version),
            },
            Action::SetTimer {
                id: TimerId::SyncPatience { token },
                duration: self.config.patience,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_types::test_utils::test_keypair;
    use cascade_types::{Hash, LedgerHeader, SignatureSet};

    fn proof_at(version: u64) -> LedgerProof {
        let mut header = LedgerHeader::genesis();
        header.state_version = StateVersion(version);
        LedgerProof::new(Hash::ZERO, header, SignatureSet::new())
    }

    fn candidates() -> Vec<NodeKey> {
        vec![test_keypair(1).node_key(), test_keypair(2).node_key()]
    }

    #[test]
    fn raising_the_target_sends_a_request() {
        let mut sync = SyncState::new(SyncConfig::default(), StateVersion(0));
        let actions = sync.on_local_sync_request(proof_at(5), candidates());
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], Action::SendTo { .. }));
        assert!(matches!(actions[1], Action::SetTimer { .. }));
        assert!(sync.is_syncing());
    }

    #[test]
    fn lower_targets_are_ignored() {
        let mut sync = SyncState::new(SyncConfig::default(), StateVersion(0));
        sync.on_local_sync_request(proof_at(5), candidates());
        assert!(sync.on_local_sync_request(proof_at(3), candidates()).is_empty());
    }

    #[test]
    fn patience_retries_with_the_next_peer() {
        let mut sync = SyncState::new(SyncConfig::default(), StateVersion(0));
        sync.on_local_sync_request(proof_at(5), candidates());
        let actions = sync.on_patience(0);
        assert!(matches!(actions[0], Action::SendTo { .. }));
    }

    #[test]
    fn stale_patience_tokens_are_dropped() {
        let mut sync = SyncState::new(SyncConfig::default(), StateVersion(0));
        sync.on_local_sync_request(proof_at(5), candidates());
        assert!(sync.on_patience(99).is_empty());
        assert!(sync.is_syncing());
    }

    #[test]
    fn version_updates_clear_reached_targets() {
        let mut sync = SyncState::new(SyncConfig::default(), StateVersion(0));
        sync.on_local_sync_request(proof_at(5), candidates());
        sync.on_version_update(StateVersion(5));
        assert!(!sync.is_syncing());
        assert_eq!(sync.current_version(), StateVersion(5));
    }
}
