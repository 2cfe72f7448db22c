//! The BFT event processor: proposals, votes and timeouts.

use crate::{
    BftConfig, Pacemaker, PendingVotes, SafetyRules, VertexStore, VertexStoreError, VoteOutcome,
    VoteRejection,
};
use cascade_core::{Action, Event, TimerId};
use cascade_ledger::StateComputer;
use cascade_messages::{
    GetVerticesRequest, GetVerticesResponse, Message, Proposal, VoteMessage,
};
use cascade_types::{
    leader_for, timeout_message, vote_message, Command, Epoch, KeyPair, LedgerHeader,
    LedgerProof, NodeKey, QuorumCertificate, TimeoutCertificate, TimeoutVote, U256, ValidatorSet,
    Vertex, VertexId, View, Vote,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, instrument, trace, warn};

/// Supplies the proposer's next user command (the mempool's contract).
pub trait CommandSource {
    fn next_command(&mut self) -> Option<Command>;
}

/// A command source with nothing to propose.
pub struct NoCommands;

impl CommandSource for NoCommands {
    fn next_command(&mut self) -> Option<Command> {
        None
    }
}

/// Upper bound on vertices served per request.
const MAX_VERTICES_SERVED: u32 = 64;

/// The consensus state machine for one epoch.
///
/// Owns the pacemaker, vertex store, safety rules and vote accumulator.
/// Every handler is synchronous and returns the actions its effects
/// require; the epoch manager replaces the whole processor when a
/// committed proof closes the epoch.
pub struct BftEventProcessor {
    key: KeyPair,
    epoch: Epoch,
    validator_set: ValidatorSet,
    config: BftConfig,
    pacemaker: Pacemaker,
    vertex_store: VertexStore,
    safety: SafetyRules,
    pending_votes: PendingVotes,
    /// Proposals waiting for a missing parent, keyed by that parent.
    buffered: HashMap<VertexId, Vec<Proposal>>,
    /// QCs whose certified vertex has not arrived yet (votes can outrun
    /// the proposal broadcast), keyed by that vertex.
    buffered_qcs: HashMap<VertexId, QuorumCertificate>,
    /// The TC justifying our next proposal, if the last view timed out.
    last_tc: Option<TimeoutCertificate>,
    halted: Option<String>,
    now: Duration,
}

impl BftEventProcessor {
    /// Build the processor for an epoch, rooting the vertex store at the
    /// epoch's derived genesis vertex.
    pub fn new(
        key: KeyPair,
        epoch: Epoch,
        validator_set: ValidatorSet,
        opening: LedgerHeader,
        config: BftConfig,
        ledger: &mut StateComputer,
    ) -> Self {
        let genesis_proposer = leader_for(&validator_set, epoch, View::GENESIS);
        let genesis = Vertex::epoch_genesis(epoch, opening, genesis_proposer);
        ledger.prepare(&genesis);
        let root_qc = genesis.qc().clone();
        let pacemaker = Pacemaker::new(config.clone());

        info!(
            epoch = epoch.0,
            validators = validator_set.len(),
            root = ?genesis.id(),
            "consensus processor for epoch"
        );

        BftEventProcessor {
            pending_votes: PendingVotes::new(epoch),
            safety: SafetyRules::new(key.clone()),
            vertex_store: VertexStore::new(genesis, root_qc),
            pacemaker,
            key,
            epoch,
            validator_set,
            config,
            buffered: HashMap::new(),
            buffered_qcs: HashMap::new(),
            last_tc: None,
            halted: None,
            now: Duration::ZERO,
        }
    }

    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn current_view(&self) -> View {
        self.pacemaker.current_view()
    }

    pub fn validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }

    pub fn vertex_store(&self) -> &VertexStore {
        &self.vertex_store
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    fn me(&self) -> NodeKey {
        self.key.node_key()
    }

    fn leader_of(&self, view: View) -> NodeKey {
        leader_for(&self.validator_set, self.epoch, view)
    }

    fn now_ms(&self) -> u64 {
        self.now.as_millis() as u64
    }

    fn halt(&mut self, reason: String) {
        error!(%reason, "consensus halted");
        self.halted = Some(reason);
    }

    fn arm_timer(&self) -> Action {
        Action::SetTimer {
            id: TimerId::ViewTimeout {
                epoch: self.epoch,
                view: self.pacemaker.current_view(),
            },
            duration: self.pacemaker.timeout(),
        }
    }

    /// Start the epoch: arm the first timer and propose if we lead view 1.
    pub fn start(
        &mut self,
        ledger: &mut StateComputer,
        commands: &mut dyn CommandSource,
    ) -> Vec<Action> {
        let mut actions = vec![self.arm_timer()];
        if self.leader_of(self.pacemaker.current_view()) == self.me() {
            actions.extend(self.propose(ledger, commands));
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Proposal path
    // ═══════════════════════════════════════════════════════════════════════

    fn propose(
        &mut self,
        ledger: &mut StateComputer,
        commands: &mut dyn CommandSource,
    ) -> Vec<Action> {
        let view = self.pacemaker.current_view();
        let high_qc = self.vertex_store.high_qc().clone();

        let command = ledger
            .boundary_command(high_qc.voted().vertex_id, view, self.now_ms())
            .or_else(|| {
                if view.0 >= ledger.active_rules().max_rounds() {
                    // Out of rounds and no boundary command: propose empty.
                    None
                } else {
                    commands.next_command()
                }
            });

        let vertex = Vertex::new(high_qc, view, command, self.me());
        let timeout_certificate = self
            .last_tc
            .as_ref()
            .filter(|tc| tc.view().next() == view)
            .cloned();
        let proposal = Proposal {
            vertex,
            high_committed_qc: self.vertex_store.high_committed_qc().clone(),
            timeout_certificate,
        };

        info!(
            view = view.0,
            vertex = ?proposal.vertex.id(),
            command = ?proposal.vertex.command().map(|c| c.id()),
            "proposing"
        );

        let mut actions = vec![Action::Broadcast {
            message: Message::Proposal(proposal.clone()),
        }];
        actions.extend(self.on_proposal(proposal, ledger, commands));
        actions
    }

    /// Process a proposal: validate leader and view, catch up through its
    /// certificates, insert the vertex, and vote if the safety rules allow.
    #[instrument(skip_all, fields(view = proposal.view().0, vertex = ?proposal.vertex.id()))]
    pub fn on_proposal(
        &mut self,
        proposal: Proposal,
        ledger: &mut StateComputer,
        commands: &mut dyn CommandSource,
    ) -> Vec<Action> {
        if self.halted.is_some() {
            return vec![];
        }
        let vertex = &proposal.vertex;
        let view = vertex.view();

        if vertex.qc().epoch() != self.epoch {
            debug!(epoch = vertex.qc().epoch().0, "proposal from another epoch");
            return vec![];
        }
        let expected = self.leader_of(view);
        if vertex.proposer() != expected {
            warn!(
                proposer = ?vertex.proposer(),
                expected = ?expected,
                "proposal from the wrong leader"
            );
            return vec![];
        }

        let mut actions = Vec::new();

        if let Some(tc) = &proposal.timeout_certificate {
            match self.verify_tc(tc) {
                Ok(()) => actions.extend(self.advance_on_tc(tc.clone(), ledger, commands)),
                Err(reason) => {
                    warn!(reason, "proposal carries an invalid TC");
                    return actions;
                }
            }
        }

        // The committed QC first: it may re-root us or reveal we're behind.
        actions.extend(self.process_qc(&proposal.high_committed_qc, ledger, commands));

        if !self.vertex_store.contains(&vertex.parent_id()) {
            debug!(parent = ?vertex.parent_id(), "buffering proposal, requesting ancestors");
            actions.push(Action::SendTo {
                target: vertex.proposer(),
                message: Message::GetVerticesRequest(GetVerticesRequest {
                    tip: vertex.parent_id(),
                    count: self.config.vertex_request_count,
                }),
            });
            self.buffered
                .entry(vertex.parent_id())
                .or_default()
                .push(proposal);
            return actions;
        }

        actions.extend(self.process_qc(vertex.qc(), ledger, commands));

        if view != self.pacemaker.current_view() {
            trace!(
                current = self.pacemaker.current_view().0,
                "proposal is not for the current view"
            );
            return actions;
        }

        let header = match self.vertex_store.insert_vertex(vertex.clone(), ledger) {
            Ok(header) => header,
            Err(error) => {
                warn!(%error, "vertex insertion failed");
                return actions;
            }
        };

        // A QC over this vertex may have arrived ahead of it.
        if let Some(qc) = self.buffered_qcs.remove(&vertex.id()) {
            actions.extend(self.process_qc(&qc, ledger, commands));
        }

        if let Some(vote) = self.safety.make_vote(header, vertex.qc(), self.now_ms()) {
            actions.push(Action::PersistSafetyState {
                last_voted_view: self.safety.last_voted_view(),
                locked_view: self.safety.locked_view(),
            });
            let next_leader = self.leader_of(view.next());
            debug!(view = view.0, to = ?next_leader, "voting");
            if next_leader == self.me() {
                actions.extend(self.count_vote(vote, ledger, commands));
            } else {
                actions.push(Action::SendTo {
                    target: next_leader,
                    message: Message::Vote(VoteMessage { vote }),
                });
            }
        }

        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Vote path
    // ═══════════════════════════════════════════════════════════════════════

    /// Process a vote addressed to us as (presumed) next leader.
    #[instrument(skip_all, fields(view = message.vote.view().0, author = ?message.vote.author))]
    pub fn on_vote(
        &mut self,
        message: VoteMessage,
        ledger: &mut StateComputer,
        commands: &mut dyn CommandSource,
    ) -> Vec<Action> {
        if self.halted.is_some() {
            return vec![];
        }
        let vote = message.vote;
        if vote.epoch() != self.epoch {
            debug!(epoch = vote.epoch().0, "vote from another epoch");
            return vec![];
        }
        // Author membership, signatures and double-vote detection all live
        // in the accumulator.
        self.count_vote(vote, ledger, commands)
    }

    fn count_vote(
        &mut self,
        vote: Vote,
        ledger: &mut StateComputer,
        commands: &mut dyn CommandSource,
    ) -> Vec<Action> {
        match self.pending_votes.insert(&vote, &self.validator_set) {
            Ok(VoteOutcome::Pending) => vec![],
            Ok(VoteOutcome::Qc(qc)) => self.process_qc(&qc, ledger, commands),
            Ok(VoteOutcome::Tc(tc)) => self.advance_on_tc(tc, ledger, commands),
            Err(rejection @ VoteRejection::InvalidSignature) => {
                warn!(author = ?vote.author, %rejection, "vote not counted");
                vec![]
            }
            Err(rejection) => {
                debug!(%rejection, "vote not counted");
                vec![]
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Certificates
    // ═══════════════════════════════════════════════════════════════════════

    /// Register a QC: bump the stored certificates, commit on a closed
    /// 3-chain, advance the pacemaker, and propose when we lead the new
    /// view. A QC naming an unknown vertex triggers catch-up instead.
    fn process_qc(
        &mut self,
        qc: &QuorumCertificate,
        ledger: &mut StateComputer,
        commands: &mut dyn CommandSource,
    ) -> Vec<Action> {
        let mut actions = Vec::new();

        if !self.vertex_store.add_qc(qc.clone()) {
            // The certified vertex is missing. If the QC proves a commit
            // ahead of our ledger, catch up through sync; otherwise fetch
            // the vertex (votes can outrun the proposal broadcast) and
            // retry the QC once it arrives.
            if let Some(committed) = qc.committed() {
                if committed.ledger_header.state_version > ledger.state_version() {
                    if let Some(proof) = LedgerProof::from_qc(qc) {
                        debug!(
                            target_version = committed.ledger_header.state_version.0,
                            "QC proves a commit ahead of us; requesting ledger sync"
                        );
                        actions.push(Action::EnqueueInternal {
                            event: Event::LocalSyncRequest {
                                target: proof,
                                candidates: self.sync_candidates(),
                            },
                        });
                        return actions;
                    }
                }
            }
            let missing = qc.voted().vertex_id;
            debug!(vertex = ?missing, "QC for a vertex we have not seen; fetching");
            self.buffered_qcs.insert(missing, qc.clone());
            actions.push(Action::SendTo {
                target: self.leader_of(qc.view()),
                message: Message::GetVerticesRequest(GetVerticesRequest {
                    tip: missing,
                    count: self.config.vertex_request_count,
                }),
            });
            return actions;
        }

        if let Some(committed) = qc.committed() {
            if committed.view > self.vertex_store.root().view() {
                self.safety.observe_commit(qc);
                if let Some(proof) = LedgerProof::from_qc(qc) {
                    match self.vertex_store.commit(committed, proof.clone(), ledger) {
                        Ok(path) if !path.is_empty() => {
                            self.pending_votes.garbage_collect(committed.view);
                            actions.push(Action::EnqueueInternal {
                                event: Event::LedgerCommitted { proof },
                            });
                        }
                        Ok(_) => {}
                        Err(VertexStoreError::Ledger(e)) => {
                            self.halt(e.to_string());
                            return actions;
                        }
                        Err(error) => {
                            warn!(%error, "commit failed");
                        }
                    }
                }
            }
        }

        if self.pacemaker.process_qc(qc.view()).is_some() {
            actions.push(self.arm_timer());
            if self.leader_of(self.pacemaker.current_view()) == self.me() {
                actions.extend(self.propose(ledger, commands));
            }
        }
        actions
    }

    fn advance_on_tc(
        &mut self,
        tc: TimeoutCertificate,
        ledger: &mut StateComputer,
        commands: &mut dyn CommandSource,
    ) -> Vec<Action> {
        let view = tc.view();
        let mut actions = Vec::new();
        self.last_tc = Some(tc);
        if self.pacemaker.process_tc(view).is_some() {
            actions.push(self.arm_timer());
            if self.leader_of(self.pacemaker.current_view()) == self.me() {
                actions.extend(self.propose(ledger, commands));
            }
        }
        actions
    }

    fn verify_tc(&self, tc: &TimeoutCertificate) -> Result<(), &'static str> {
        if tc.epoch() != self.epoch {
            return Err("wrong epoch");
        }
        let mut power = U256::zero();
        for (signer, info) in tc.signatures() {
            if !self.validator_set.contains(signer) {
                return Err("signer outside the validator set");
            }
            let hash = timeout_message(tc.epoch(), tc.view(), info.high_qc_view);
            if !signer.verify(&hash, &info.signature) {
                return Err("bad timeout signature");
            }
            power += self.validator_set.power_of(signer);
        }
        if !self.validator_set.is_quorum(power) {
            return Err("insufficient timeout power");
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Timeouts
    // ═══════════════════════════════════════════════════════════════════════

    /// The pacemaker timer fired. Broadcast a timeout vote carrying our
    /// high QC and re-arm with backoff.
    pub fn on_local_timeout(
        &mut self,
        epoch: Epoch,
        view: View,
        ledger: &mut StateComputer,
        commands: &mut dyn CommandSource,
    ) -> Vec<Action> {
        if self.halted.is_some() || epoch != self.epoch {
            return vec![];
        }
        if !self.pacemaker.on_view_timeout(view) {
            trace!(view = view.0, "stale timeout");
            return vec![];
        }

        info!(view = view.0, "view timed out; broadcasting timeout vote");

        let high_qc = self.vertex_store.high_qc().clone();
        let vote_data = high_qc.vote_data().clone();
        let timeout = TimeoutVote {
            view,
            high_qc_view: high_qc.view(),
            signature: self
                .key
                .sign(&timeout_message(self.epoch, view, high_qc.view())),
        };
        let vote = Vote {
            signature: self.key.sign(&vote_message(&vote_data)),
            vote_data,
            author: self.me(),
            timestamp_ms: self.now_ms(),
            timeout: Some(timeout),
        };

        let mut actions = vec![
            Action::Broadcast {
                message: Message::Vote(VoteMessage { vote: vote.clone() }),
            },
            self.arm_timer(),
        ];
        actions.extend(self.count_vote(vote, ledger, commands));
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Vertex catch-up
    // ═══════════════════════════════════════════════════════════════════════

    /// Serve a peer's vertex request from our store.
    pub fn on_vertices_request(&self, from: NodeKey, request: GetVerticesRequest) -> Vec<Action> {
        let count = request.count.min(MAX_VERTICES_SERVED);
        let vertices = self.vertex_store.vertices_from(request.tip, count);
        trace!(to = ?from, served = vertices.len(), "serving vertices");
        vec![Action::SendTo {
            target: from,
            message: Message::GetVerticesResponse(GetVerticesResponse { vertices }),
        }]
    }

    /// Insert synced vertices and retry any proposals they unblocked.
    pub fn on_vertices_response(
        &mut self,
        response: GetVerticesResponse,
        ledger: &mut StateComputer,
        commands: &mut dyn CommandSource,
    ) -> Vec<Action> {
        if self.halted.is_some() {
            return vec![];
        }
        let mut actions = Vec::new();

        // Responses are tip-first; insert oldest-first so parents land
        // before children.
        for vertex in response.vertices.into_iter().rev() {
            if self.vertex_store.contains(&vertex.id()) {
                continue;
            }
            if !self.vertex_store.contains(&vertex.parent_id()) {
                trace!(parent = ?vertex.parent_id(), "synced vertex still missing its parent");
                continue;
            }
            self.vertex_store.add_qc(vertex.qc().clone());
            if let Err(error) = self.vertex_store.insert_vertex(vertex.clone(), ledger) {
                warn!(%error, "synced vertex insertion failed");
                continue;
            }
            if let Some(qc) = self.buffered_qcs.remove(&vertex.id()) {
                actions.extend(self.process_qc(&qc, ledger, commands));
            }
            if let Some(waiting) = self.buffered.remove(&vertex.id()) {
                for proposal in waiting {
                    actions.extend(self.on_proposal(proposal, ledger, commands));
                }
            }
        }
        actions
    }

    fn sync_candidates(&self) -> Vec<NodeKey> {
        self.validator_set
            .keys()
            .filter(|key| **key != self.me())
            .copied()
            .collect()
    }
}
