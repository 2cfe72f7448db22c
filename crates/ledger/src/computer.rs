//! The state computer: prepare and commit.

use crate::accumulator::chain_accumulator;
use cascade_engine::{
    epoch_update, genesis, CmError, ConstraintMachine, EngineStore, ForkRegistry,
    InMemoryEngineStore, Particle, PermissionLevel, ProposalStats, REAddr, StateUpdate,
    SubstateTypeId, TransientStore,
};
use cascade_types::{
    leader_for, Command, Epoch, LedgerHeader, LedgerProof, NodeKey, StateVersion, U256, Validator,
    ValidatorSet, VerifiedCommandsAndProof, Vertex, VertexId, View,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Ledger failures.
///
/// `Corruption` means the node's committed state and an incoming proof
/// disagree; per the error-handling policy the node halts rather than
/// commit past it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger corruption: {0}")]
    Corruption(String),
    #[error("proof rejected: {0}")]
    BadProof(#[from] cascade_types::ProofError),
    #[error("commit of unknown vertex {0:?}")]
    UnknownVertex(VertexId),
}

/// A vertex's prepared execution: the resulting header, the commands that
/// actually executed, and their substate writes.
#[derive(Debug, Clone)]
pub struct PreparedVertex {
    pub parent: VertexId,
    pub header: LedgerHeader,
    pub commands: Vec<Command>,
    pub updates: Vec<StateUpdate>,
    pub proposer: NodeKey,
    pub view: View,
    pub parent_view: View,
}

/// One committed batch.
struct CommitEntry {
    first_version: StateVersion,
    commands: Vec<Command>,
    proof: LedgerProof,
}

/// The ledger and its state computer.
///
/// Owns the engine store, the committed command log with proofs, the fork
/// registry, and the preview cache of prepared (uncommitted) vertices.
pub struct StateComputer {
    store: InMemoryEngineStore,
    registry: ForkRegistry,
    active_fork: usize,
    validator_set: ValidatorSet,
    epoch: Epoch,
    entries: Vec<CommitEntry>,
    epoch_proofs: BTreeMap<u64, LedgerProof>,
    last_proof: LedgerProof,
    prepared: HashMap<VertexId, PreparedVertex>,
    /// Proposal statistics of the running epoch, from committed vertices.
    stats: BTreeMap<NodeKey, ProposalStats>,
}

impl StateComputer {
    /// Boot a ledger from genesis validators and balances.
    pub fn new(
        registry: ForkRegistry,
        genesis_validators: &[(NodeKey, U256)],
        genesis_balances: &[(REAddr, U256)],
    ) -> Result<Self, LedgerError> {
        let mut store = InMemoryEngineStore::new();
        let rules = &registry.fork(0).rules;
        let payload = genesis(genesis_validators, genesis_balances);
        let parsed = ConstraintMachine::new(rules)
            .validate(&store, &payload, PermissionLevel::System)
            .map_err(|e| LedgerError::Corruption(format!("genesis does not validate: {e}")))?;
        store.apply(&parsed.updates);

        let validator_set = ValidatorSet::from_validators(
            genesis_validators.iter().map(|(key, power)| Validator {
                key: *key,
                power: *power,
            }),
        )
        .map_err(|e| LedgerError::Corruption(format!("invalid genesis validators: {e}")))?;

        Ok(StateComputer {
            store,
            registry,
            active_fork: 0,
            validator_set,
            epoch: Epoch::GENESIS,
            entries: Vec::new(),
            epoch_proofs: BTreeMap::new(),
            last_proof: LedgerProof::genesis(),
            prepared: HashMap::new(),
            stats: BTreeMap::new(),
        })
    }

    pub fn active_rules(&self) -> &cascade_engine::RERules {
        &self.registry.fork(self.active_fork).rules
    }

    pub fn current_validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn last_proof(&self) -> &LedgerProof {
        &self.last_proof
    }

    pub fn state_version(&self) -> StateVersion {
        self.last_proof.state_version()
    }

    pub fn engine_store(&self) -> &InMemoryEngineStore {
        &self.store
    }

    /// The proof that closed `epoch`, if committed locally.
    pub fn proof_of_epoch(&self, epoch: Epoch) -> Option<&LedgerProof> {
        self.epoch_proofs.get(&epoch.0)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Prepare
    // ═══════════════════════════════════════════════════════════════════════

    /// Prepare a vertex: execute its commands in preview and compute the
    /// resulting ledger header. Pure with respect to committed state; the
    /// result is cached until commit or epoch change.
    pub fn prepare(&mut self, vertex: &Vertex) -> LedgerHeader {
        if let Some(prepared) = self.prepared.get(&vertex.id()) {
            return prepared.header.clone();
        }

        let parent_header = vertex.qc().voted().ledger_header.clone();
        let parent_id = vertex.parent_id();

        // Epoch-genesis vertices and descendants of a closed epoch execute
        // nothing; the boundary header is carried forward so any late
        // commit still signals the epoch change.
        if vertex.is_genesis() || parent_header.is_end_of_epoch() {
            let header = LedgerHeader {
                view: vertex.view(),
                ..parent_header
            };
            self.cache(vertex, parent_id, header.clone(), vec![], vec![]);
            return header;
        }

        let overlay = self.overlay_for(parent_id);
        let rules = self.active_rules();
        let machine = ConstraintMachine::new(rules);
        let boundary_view = vertex.view().0 >= rules.max_rounds();

        let mut commands = Vec::new();
        let mut updates = Vec::new();
        let mut header = LedgerHeader {
            view: vertex.view(),
            timestamp_ms: if vertex.qc().signatures().is_empty() {
                parent_header.timestamp_ms
            } else {
                vertex.qc().timestamp_ms()
            },
            next_validator_set: None,
            ..parent_header.clone()
        };

        if let Some(command) = vertex.command() {
            let permission = if boundary_view {
                PermissionLevel::System
            } else {
                PermissionLevel::User
            };
            match machine.validate(&overlay, command.payload(), permission) {
                Ok(parsed) => {
                    // A boundary command must be exactly the round closure
                    // plus the epoch progression; any extra group would run
                    // under system permission.
                    let boundary_txn = parsed.is_epoch_boundary()
                        && parsed.actions.len() == 2
                        && matches!(parsed.actions[0], cascade_engine::TxAction::NextRound { .. });
                    if boundary_view != boundary_txn {
                        debug!(
                            vertex = ?vertex.id(),
                            boundary_view,
                            "command does not fit the view; dropping"
                        );
                    } else if boundary_txn {
                        match self.next_set_of(&overlay, &parsed.updates) {
                            Ok(next_set) => {
                                header.next_validator_set = Some(next_set);
                                header.state_version = header.state_version.next();
                                header.accumulator =
                                    chain_accumulator(header.accumulator, command.id());
                                commands.push(command.clone());
                                updates.extend(parsed.updates);
                            }
                            Err(reason) => {
                                warn!(vertex = ?vertex.id(), reason, "bad boundary command");
                            }
                        }
                    } else {
                        header.state_version = header.state_version.next();
                        header.accumulator = chain_accumulator(header.accumulator, command.id());
                        commands.push(command.clone());
                        updates.extend(parsed.updates);
                    }
                }
                Err(error) => {
                    debug!(
                        vertex = ?vertex.id(),
                        command = ?command.id(),
                        %error,
                        "command rejected in prepare; vertex continues empty"
                    );
                }
            }
        }

        self.cache(vertex, parent_id, header.clone(), commands, updates);
        header
    }

    fn cache(
        &mut self,
        vertex: &Vertex,
        parent: VertexId,
        header: LedgerHeader,
        commands: Vec<Command>,
        updates: Vec<StateUpdate>,
    ) {
        self.prepared.insert(
            vertex.id(),
            PreparedVertex {
                parent,
                header,
                commands,
                updates,
                proposer: vertex.proposer(),
                view: vertex.view(),
                parent_view: vertex.parent_view(),
            },
        );
    }

    /// Committed state plus the staged writes of the uncommitted ancestor
    /// chain ending at `parent`.
    fn overlay_for(&self, parent: VertexId) -> TransientStore<'_> {
        let mut chain = Vec::new();
        let mut cursor = parent;
        while let Some(prepared) = self.prepared.get(&cursor) {
            chain.push(cursor);
            cursor = prepared.parent;
        }
        let mut overlay = TransientStore::new(&self.store);
        for id in chain.into_iter().rev() {
            overlay.stage(&self.prepared[&id].updates);
        }
        overlay
    }

    /// Derive the next validator set from a boundary transaction's writes:
    /// the UPped proposal counters name the members, the stake values give
    /// the powers.
    fn next_set_of(
        &self,
        overlay: &TransientStore<'_>,
        updates: &[StateUpdate],
    ) -> Result<ValidatorSet, &'static str> {
        let mut stakes: BTreeMap<NodeKey, U256> = overlay
            .substates_of_type(SubstateTypeId::ValidatorStake)
            .into_iter()
            .filter_map(|(_, particle)| match particle {
                Particle::ValidatorStake(stake) => Some((stake.validator, stake.total_stake)),
                _ => None,
            })
            .collect();
        let mut members = Vec::new();
        for update in updates {
            if let StateUpdate::Up { particle, .. } = update {
                match particle {
                    Particle::ValidatorStake(stake) => {
                        stakes.insert(stake.validator, stake.total_stake);
                    }
                    Particle::ValidatorBftData(data) => members.push(data.validator),
                    _ => {}
                }
            }
        }
        let validators = members.into_iter().map(|key| Validator {
            key,
            power: stakes.get(&key).copied().unwrap_or_default(),
        });
        ValidatorSet::from_validators(validators).map_err(|_| "boundary set is not a valid set")
    }

    /// The proposer's command for a view: the boundary transaction when the
    /// epoch is out of rounds, otherwise nothing (the mempool supplies user
    /// commands).
    pub fn boundary_command(&self, parent: VertexId, view: View, timestamp_ms: u64) -> Option<Command> {
        let rules = self.active_rules();
        if view.0 < rules.max_rounds() {
            return None;
        }
        let mut stats = self.stats.clone();
        // Fold in the uncommitted ancestors' proposals.
        let mut cursor = parent;
        while let Some(prepared) = self.prepared.get(&cursor) {
            if !prepared.view.is_genesis() {
                self.tally(&mut stats, prepared.proposer, prepared.parent_view, prepared.view);
            }
            cursor = prepared.parent;
        }
        let overlay = self.overlay_for(parent);
        match epoch_update(&overlay, rules.config(), timestamp_ms, view.0, &stats) {
            Ok(boundary) => Some(Command::new(boundary.payload)),
            Err(error) => {
                warn!(%error, "failed to construct the boundary command");
                None
            }
        }
    }

    fn tally(
        &self,
        stats: &mut BTreeMap<NodeKey, ProposalStats>,
        proposer: NodeKey,
        parent_view: View,
        view: View,
    ) {
        stats.entry(proposer).or_default().completed += 1;
        for skipped in (parent_view.0 + 1)..view.0 {
            let leader = leader_for(&self.validator_set, self.epoch, View(skipped));
            stats.entry(leader).or_default().missed += 1;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Commit
    // ═══════════════════════════════════════════════════════════════════════

    /// Commit a chain of prepared vertices under a proof (consensus path).
    pub fn commit_vertices(
        &mut self,
        path: &[Vertex],
        proof: LedgerProof,
    ) -> Result<Option<ValidatorSet>, LedgerError> {
        let mut commands = Vec::new();
        let mut tallied = Vec::new();
        for vertex in path {
            let prepared = self
                .prepared
                .get(&vertex.id())
                .ok_or(LedgerError::UnknownVertex(vertex.id()))?;
            commands.extend(prepared.commands.iter().cloned());
            if !prepared.view.is_genesis() {
                tallied.push((prepared.proposer, prepared.parent_view, prepared.view));
            }
        }
        let mut stats = std::mem::take(&mut self.stats);
        for (proposer, parent_view, view) in tallied {
            self.tally(&mut stats, proposer, parent_view, view);
        }
        self.stats = stats;

        self.commit(&VerifiedCommandsAndProof::new(commands, proof))
    }

    /// Commit a proven command batch (consensus and sync paths).
    ///
    /// Idempotent by state version. Returns the next validator set when the
    /// proof closes the epoch.
    pub fn commit(
        &mut self,
        batch: &VerifiedCommandsAndProof,
    ) -> Result<Option<ValidatorSet>, LedgerError> {
        let proof = &batch.proof;
        let current = self.state_version();
        if proof.state_version() <= current {
            debug!(version = proof.state_version().0, "commit is stale; ignoring");
            return Ok(None);
        }
        if proof.state_version().0 != current.0 + batch.commands.len() as u64 {
            return Err(LedgerError::Corruption(format!(
                "proof at {} does not follow version {} with {} commands",
                proof.state_version(),
                current,
                batch.commands.len()
            )));
        }
        proof.verify(&self.validator_set)?;

        // Recompute the accumulator over the batch.
        let mut accumulator = self.last_proof.header().accumulator;
        for command in &batch.commands {
            accumulator = chain_accumulator(accumulator, command.id());
        }
        if accumulator != proof.header().accumulator {
            return Err(LedgerError::Corruption(format!(
                "accumulator mismatch at {}",
                proof.state_version()
            )));
        }

        // Apply the commands through the machine in one store transaction.
        let rules = self.active_rules().clone();
        let machine = ConstraintMachine::new(&rules);
        let mut staged = TransientStore::new(&self.store);
        let mut all_updates = Vec::new();
        for command in &batch.commands {
            let parsed = machine
                .validate(&staged, command.payload(), PermissionLevel::System)
                .map_err(|e| {
                    LedgerError::Corruption(format!(
                        "proven command {:?} does not execute: {e}",
                        command.id()
                    ))
                })?;
            staged.stage(&parsed.updates);
            all_updates.extend(parsed.updates);
        }
        self.store.apply(&all_updates);

        let first_version = StateVersion(current.0 + 1);
        self.entries.push(CommitEntry {
            first_version,
            commands: batch.commands.clone(),
            proof: proof.clone(),
        });
        self.last_proof = proof.clone();

        // Drop preview entries this commit superseded. Entries AT the
        // committed version stay: empty vertices share their parent's
        // version and later commits still walk through them (re-staging a
        // committed vertex's updates over the store is idempotent).
        let committed = proof.state_version();
        self.prepared
            .retain(|_, prepared| prepared.header.state_version >= committed);

        info!(
            version = proof.state_version().0,
            commands = batch.commands.len(),
            end_of_epoch = proof.header().is_end_of_epoch(),
            "committed"
        );

        if let Some(next_set) = proof.header().next_validator_set.clone() {
            self.epoch_boundary(proof.clone(), next_set.clone());
            return Ok(Some(next_set));
        }
        Ok(None)
    }

    fn epoch_boundary(&mut self, proof: LedgerProof, next_set: ValidatorSet) {
        let closed = proof.header().epoch;
        self.epoch_proofs.insert(closed.0, proof);
        self.epoch = closed.next();
        self.validator_set = next_set;
        self.prepared.clear();
        self.stats.clear();

        let next_fork = self.registry.evaluate_boundary(
            self.active_fork,
            self.epoch,
            &self.store,
            &self.validator_set,
        );
        if next_fork != self.active_fork {
            info!(
                from = self.registry.fork(self.active_fork).name,
                to = self.registry.fork(next_fork).name,
                epoch = self.epoch.0,
                "fork activated"
            );
            self.active_fork = next_fork;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Committed reader (sync serving)
    // ═══════════════════════════════════════════════════════════════════════

    /// Committed commands following `version`, whole proof-aligned entries
    /// up to roughly `max_commands`, with the last entry's proof.
    pub fn committed_after(
        &self,
        version: StateVersion,
        max_commands: usize,
    ) -> Option<VerifiedCommandsAndProof> {
        let mut commands = Vec::new();
        let mut proof = None;
        for entry in &self.entries {
            let end = entry.first_version.0 + entry.commands.len() as u64 - 1;
            if end <= version.0 {
                continue;
            }
            // The first served entry may start mid-entry when the requester
            // already holds a prefix of it.
            let skip = version.0.saturating_sub(entry.first_version.0 - 1) as usize;
            let take_from = if proof.is_none() { skip } else { 0 };
            commands.extend(entry.commands[take_from..].iter().cloned());
            proof = Some(entry.proof.clone());
            // Never serve past an epoch boundary: the next entry's proof is
            // signed by a validator set the requester does not know yet.
            if commands.len() >= max_commands || entry.proof.header().is_end_of_epoch() {
                break;
            }
        }
        proof.map(|proof| VerifiedCommandsAndProof::new(commands, proof))
    }

    /// The commands of the commit entry a proof closed, for observers that
    /// need to know what just landed (mempool eviction, status reporting).
    pub fn commands_for_proof(&self, version: StateVersion) -> Option<&[Command]> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.proof.state_version() == version)
            .map(|entry| entry.commands.as_slice())
    }

    /// Preview a client command against committed state (mempool admission).
    pub fn preview(&self, command: &Command) -> Result<(), CmError> {
        ConstraintMachine::new(self.active_rules())
            .validate(&self.store, command.payload(), PermissionLevel::User)
            .map(|_| ())
    }
}
