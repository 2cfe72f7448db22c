//! The node state machine: event routing and epoch management.

use crate::{Mempool, NodeConfig};
use cascade_bft::BftEventProcessor;
use cascade_core::{Action, Event, StateMachine, TimerId};
use cascade_engine::{ForkRegistry, REAddr};
use cascade_ledger::{LedgerError, StateComputer};
use cascade_messages::{GetEpochResponse, Message, SyncResponse};
use cascade_sync::SyncState;
use cascade_types::{
    Command, Epoch, KeyPair, LedgerHeader, LedgerProof, NodeKey, StateVersion, U256, ValidatorSet,
    VerifiedCommandsAndProof,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How many next-epoch consensus events to hold while we finish this one.
const MAX_QUEUED_NEXT_EPOCH: usize = 128;

/// The full node state machine.
///
/// Composes the epoch-scoped consensus processor with the long-lived
/// ledger, sync and mempool. The epoch manager lives here: committed
/// end-of-epoch proofs swap the validator set and rebuild the processor on
/// the next epoch's genesis vertex.
pub struct NodeStateMachine {
    key: KeyPair,
    config: NodeConfig,
    ledger: StateComputer,
    processor: BftEventProcessor,
    sync: SyncState,
    mempool: Mempool,
    /// Consensus messages from the immediately-next epoch, replayed after
    /// the boundary commits.
    queued_next_epoch: Vec<Event>,
    /// Highest state version already announced to observers. Empty-vertex
    /// commits re-prove the same version and must not re-announce it.
    emitted_up_to: StateVersion,
    now: Duration,
}

impl NodeStateMachine {
    /// Construct a node from genesis.
    ///
    /// A custom fork registry is honoured only when `overwrite_forks` is
    /// enabled (a testing knob); otherwise the built-in registry applies.
    pub fn new(
        key: KeyPair,
        config: NodeConfig,
        custom_registry: Option<ForkRegistry>,
        genesis_validators: &[(NodeKey, U256)],
        genesis_balances: &[(REAddr, U256)],
    ) -> Result<Self, LedgerError> {
        let registry = match custom_registry {
            Some(registry) if config.overwrite_forks => registry,
            Some(_) => {
                warn!("custom fork registry supplied without overwrite_forks; ignoring");
                cascade_engine::default_fork_registry()
            }
            None => cascade_engine::default_fork_registry(),
        };
        let mut ledger = StateComputer::new(registry, genesis_validators, genesis_balances)?;
        let processor = BftEventProcessor::new(
            key.clone(),
            Epoch::GENESIS,
            ledger.current_validator_set().clone(),
            LedgerHeader::genesis(),
            config.bft(),
            &mut ledger,
        );
        let sync = SyncState::new(config.sync(), ledger.state_version());
        let mempool = Mempool::new(config.mempool_max_size);
        Ok(NodeStateMachine {
            key,
            config,
            ledger,
            processor,
            sync,
            mempool,
            queued_next_epoch: Vec::new(),
            emitted_up_to: StateVersion(0),
            now: Duration::ZERO,
        })
    }

    /// Kick off consensus: arm the first timer, propose if we lead view 1.
    pub fn start(&mut self) -> Vec<Action> {
        self.processor.start(&mut self.ledger, &mut self.mempool)
    }

    pub fn node_key(&self) -> NodeKey {
        self.key.node_key()
    }

    pub fn epoch(&self) -> Epoch {
        self.processor.epoch()
    }

    pub fn is_halted(&self) -> bool {
        self.processor.is_halted()
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn ledger(&self) -> &StateComputer {
        &self.ledger
    }

    pub fn processor(&self) -> &BftEventProcessor {
        &self.processor
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Query interface (the narrow hooks the outer shell gets)
    // ═══════════════════════════════════════════════════════════════════════

    /// The latest proof, or the earliest proof at or after a version.
    pub fn get_ledger_proof(&self, state_version: Option<StateVersion>) -> Option<LedgerProof> {
        match state_version {
            None => Some(self.ledger.last_proof().clone()),
            Some(version) => self
                .ledger
                .committed_after(StateVersion(version.0.saturating_sub(1)), 1)
                .map(|batch| batch.proof),
        }
    }

    /// The current epoch's validator set.
    pub fn get_validators(&self) -> &ValidatorSet {
        self.ledger.current_validator_set()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Event handlers
    // ═══════════════════════════════════════════════════════════════════════

    fn on_submit_command(&mut self, command: Command) -> Vec<Action> {
        if let Err(error) = self.ledger.preview(&command) {
            debug!(command = ?command.id(), %error, "command rejected at submission");
            return vec![Action::EmitCommandRejected {
                id: command.id(),
                reason: error.to_string(),
            }];
        }
        match self.mempool.add(command.clone()) {
            Ok(()) => vec![],
            Err(rejection) => vec![Action::EmitCommandRejected {
                id: command.id(),
                reason: rejection.to_string(),
            }],
        }
    }

    fn on_ledger_committed(&mut self, proof: LedgerProof) -> Vec<Action> {
        let version = proof.state_version();
        self.sync.on_version_update(version);

        let mut actions = Vec::new();
        if version > self.emitted_up_to {
            if let Some(commands) = self.ledger.commands_for_proof(version) {
                let ids: Vec<_> = commands.iter().map(|command| command.id()).collect();
                let batch = VerifiedCommandsAndProof::new(commands.to_vec(), proof.clone());
                self.mempool.remove_committed(ids);
                actions.push(Action::EmitCommitted { batch });
                self.emitted_up_to = version;
            }
        }

        if proof.header().is_end_of_epoch() {
            actions.extend(self.enter_next_epoch(&proof));
        }
        actions
    }

    /// The epoch manager's swap: reseed consensus on the next epoch.
    fn enter_next_epoch(&mut self, boundary: &LedgerProof) -> Vec<Action> {
        let next_epoch = boundary.header().epoch.next();
        if next_epoch <= self.processor.epoch() {
            // Replayed boundary (e.g. via sync of an old epoch).
            return vec![];
        }
        // The ledger swapped its set and rules when it committed the
        // boundary; consensus follows.
        let validator_set = self.ledger.current_validator_set().clone();
        let opening = LedgerHeader::epoch_genesis(next_epoch, boundary.header());
        info!(
            epoch = next_epoch.0,
            validators = validator_set.len(),
            "entering epoch"
        );
        self.processor = BftEventProcessor::new(
            self.key.clone(),
            next_epoch,
            validator_set,
            opening,
            self.config.bft(),
            &mut self.ledger,
        );
        self.processor.set_time(self.now);

        let mut actions = self.processor.start(&mut self.ledger, &mut self.mempool);
        for event in std::mem::take(&mut self.queued_next_epoch) {
            actions.push(Action::EnqueueInternal { event });
        }
        actions
    }

    /// Route a consensus message by its epoch: current is processed, the
    /// next is buffered, anything else is dropped.
    fn route_epoch(&mut self, message_epoch: Epoch, event: Event) -> Option<Event> {
        let current = self.processor.epoch();
        if message_epoch == current {
            return Some(event);
        }
        if message_epoch == current.next() && self.queued_next_epoch.len() < MAX_QUEUED_NEXT_EPOCH
        {
            debug!(epoch = message_epoch.0, "buffering next-epoch message");
            self.queued_next_epoch.push(event);
        } else {
            debug!(epoch = message_epoch.0, "dropping message from another epoch");
        }
        None
    }
}

impl StateMachine for NodeStateMachine {
    fn set_time(&mut self, now: Duration) {
        self.now = now;
        self.processor.set_time(now);
    }

    fn handle(&mut self, event: Event) -> Vec<Action> {
        if self.is_halted() {
            warn!("node is halted; dropping {}", event.type_name());
            return vec![];
        }
        match event {
            Event::ViewTimeout { epoch, view } => {
                self.processor
                    .on_local_timeout(epoch, view, &mut self.ledger, &mut self.mempool)
            }
            Event::SyncPatience { token } => self.sync.on_patience(token),

            Event::ProposalReceived { proposal } => {
                let epoch = proposal.vertex.qc().epoch();
                let mut actions = Vec::new();
                // A proposal from a later epoch proves the network is ahead;
                // its committed QC gives sync a target even though the
                // proposal itself cannot be processed yet.
                if epoch > self.processor.epoch() {
                    if let Some(target) = LedgerProof::from_qc(&proposal.high_committed_qc) {
                        if target.state_version() > self.ledger.state_version() {
                            let candidates = self.sync_candidates();
                            actions.extend(self.sync.on_local_sync_request(target, candidates));
                        }
                    }
                }
                if let Some(Event::ProposalReceived { proposal }) =
                    self.route_epoch(epoch, Event::ProposalReceived { proposal })
                {
                    actions.extend(self.processor.on_proposal(
                        proposal,
                        &mut self.ledger,
                        &mut self.mempool,
                    ));
                }
                actions
            }
            Event::VoteReceived { vote } => {
                let epoch = vote.vote.epoch();
                match self.route_epoch(epoch, Event::VoteReceived { vote }) {
                    Some(Event::VoteReceived { vote }) => {
                        self.processor
                            .on_vote(vote, &mut self.ledger, &mut self.mempool)
                    }
                    _ => vec![],
                }
            }
            Event::VerticesRequested { from, request } => {
                self.processor.on_vertices_request(from, request)
            }
            Event::VerticesReceived { response } => self.processor.on_vertices_response(
                response,
                &mut self.ledger,
                &mut self.mempool,
            ),

            Event::EpochProofRequested { from, request } => {
                let proof = self.ledger.proof_of_epoch(request.epoch).cloned();
                vec![Action::SendTo {
                    target: from,
                    message: Message::GetEpochResponse(GetEpochResponse { proof }),
                }]
            }
            Event::EpochProofReceived { response } => match response.proof {
                Some(proof) => {
                    let candidates = self.sync_candidates();
                    self.sync.on_local_sync_request(proof, candidates)
                }
                None => vec![],
            },

            Event::SyncRequested { from, request } => {
                match self
                    .ledger
                    .committed_after(request.state_version, self.config.sync_batch_size)
                {
                    Some(batch) => vec![Action::SendTo {
                        target: from,
                        message: Message::SyncResponse(Box::new(SyncResponse { batch })),
                    }],
                    None => vec![],
                }
            }
            Event::SyncResponseReceived { response } => {
                self.sync.on_sync_response(*response, &mut self.ledger)
            }

            Event::LedgerCommitted { proof } => self.on_ledger_committed(proof),
            Event::LocalSyncRequest { target, candidates } => {
                self.sync.on_local_sync_request(target, candidates)
            }
            Event::SubmitCommand { command } => self.on_submit_command(command),
        }
    }
}

impl NodeStateMachine {
    fn sync_candidates(&self) -> Vec<NodeKey> {
        self.ledger
            .current_validator_set()
            .keys()
            .filter(|key| **key != self.key.node_key())
            .copied()
            .collect()
    }
}

/// Timer-to-event mapping for runners.
pub fn timer_event(id: TimerId) -> Event {
    match id {
        TimerId::ViewTimeout { epoch, view } => Event::ViewTimeout { epoch, view },
        TimerId::SyncPatience { token } => Event::SyncPatience { token },
    }
}
