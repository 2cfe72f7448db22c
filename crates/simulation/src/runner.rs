//! Deterministic simulation runner.
//!
//! Drives a set of [`NodeStateMachine`]s over a simulated network with a
//! single global event queue. Given the same seed and inputs, every run
//! produces identical results: message latency jitter comes from a seeded
//! ChaCha stream, timers are cancellable queue entries, and events at equal
//! timestamps are processed in priority order.

use crate::event_queue::EventKey;
use cascade_core::{Action, Event, StateMachine, TimerId};
use cascade_engine::{ForkRegistry, REAddr};
use cascade_messages::Message;
use cascade_node::{timer_event, NodeConfig, NodeStateMachine};
use cascade_types::{
    Command, CommandId, KeyPair, NodeKey, U256, VerifiedCommandsAndProof,
};
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, trace};

/// Simulation configuration.
#[derive(Clone)]
pub struct SimConfig {
    /// One validator per entry, with its power.
    pub validator_powers: Vec<u64>,
    /// Genesis balances: (account keypair seed, amount).
    pub balances: Vec<(u8, u64)>,
    /// One-way message latency.
    pub latency: Duration,
    /// Uniform jitter as a fraction of the latency.
    pub jitter_fraction: f64,
    /// RNG seed for the network.
    pub seed: u64,
    pub node_config: NodeConfig,
    /// Replace the built-in fork registry (all nodes).
    pub registry: Option<ForkRegistry>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            validator_powers: vec![100, 100, 100, 100],
            balances: vec![],
            latency: Duration::from_millis(10),
            jitter_fraction: 0.1,
            seed: 42,
            node_config: NodeConfig::default(),
            registry: None,
        }
    }
}

struct QueuedEvent {
    node: usize,
    event: Event,
}

/// The deterministic runner.
pub struct SimulationRunner {
    nodes: Vec<NodeStateMachine>,
    keys: Vec<KeyPair>,
    key_index: HashMap<NodeKey, usize>,
    queue: BTreeMap<EventKey, QueuedEvent>,
    timers: HashMap<(usize, TimerId), EventKey>,
    sequence: u64,
    now: Duration,
    rng: ChaCha8Rng,
    latency: Duration,
    jitter_fraction: f64,
    /// Directed blocked links.
    partitioned: HashSet<(usize, usize)>,
    /// Nodes currently offline (no delivery in either direction).
    offline: HashSet<usize>,
    committed: Vec<Vec<VerifiedCommandsAndProof>>,
    rejected: Vec<Vec<(CommandId, String)>>,
    messages_dropped: u64,
}

/// Deterministic validator keypair for a node index.
pub fn validator_keypair(index: usize) -> KeyPair {
    let mut seed = [0u8; 32];
    seed[0] = 1;
    seed[1] = index as u8;
    seed[2] = 0x5a;
    KeyPair::from_seed(&seed).expect("valid validator seed")
}

/// Deterministic client keypair for a seed byte.
pub fn client_keypair(seed: u8) -> KeyPair {
    cascade_types::test_utils::test_keypair(seed)
}

impl SimulationRunner {
    pub fn new(config: SimConfig) -> Self {
        let keys: Vec<KeyPair> = (0..config.validator_powers.len())
            .map(validator_keypair)
            .collect();
        let genesis_validators: Vec<(NodeKey, U256)> = keys
            .iter()
            .zip(&config.validator_powers)
            .map(|(key, power)| (key.node_key(), U256::from(*power)))
            .collect();
        let balances: Vec<(REAddr, U256)> = config
            .balances
            .iter()
            .map(|(seed, amount)| {
                (
                    REAddr::of_key(client_keypair(*seed).node_key()),
                    U256::from(*amount),
                )
            })
            .collect();

        let nodes: Vec<NodeStateMachine> = keys
            .iter()
            .map(|key| {
                let mut node_config = config.node_config.clone();
                if config.registry.is_some() {
                    node_config.overwrite_forks = true;
                }
                NodeStateMachine::new(
                    key.clone(),
                    node_config,
                    config.registry.clone(),
                    &genesis_validators,
                    &balances,
                )
                .expect("genesis boots")
            })
            .collect();

        let key_index = keys
            .iter()
            .enumerate()
            .map(|(index, key)| (key.node_key(), index))
            .collect();

        let count = nodes.len();
        let mut runner = SimulationRunner {
            nodes,
            keys,
            key_index,
            queue: BTreeMap::new(),
            timers: HashMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            latency: config.latency,
            jitter_fraction: config.jitter_fraction,
            partitioned: HashSet::new(),
            offline: HashSet::new(),
            committed: vec![Vec::new(); count],
            rejected: vec![Vec::new(); count],
            messages_dropped: 0,
        };

        for index in 0..count {
            let actions = runner.nodes[index].start();
            runner.perform(index, actions);
        }
        runner
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inspection
    // ═══════════════════════════════════════════════════════════════════════

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn node(&self, index: usize) -> &NodeStateMachine {
        &self.nodes[index]
    }

    pub fn node_key(&self, index: usize) -> NodeKey {
        self.keys[index].node_key()
    }

    pub fn keypair(&self, index: usize) -> &KeyPair {
        &self.keys[index]
    }

    /// Batches committed by a node, in commit order.
    pub fn committed(&self, index: usize) -> &[VerifiedCommandsAndProof] {
        &self.committed[index]
    }

    /// Command rejections reported to clients of a node.
    pub fn rejections(&self, index: usize) -> &[(CommandId, String)] {
        &self.rejected[index]
    }

    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Fault injection
    // ═══════════════════════════════════════════════════════════════════════

    /// Block traffic between two nodes, both directions.
    pub fn partition(&mut self, a: usize, b: usize) {
        self.partitioned.insert((a, b));
        self.partitioned.insert((b, a));
    }

    /// Restore traffic between two nodes.
    pub fn heal(&mut self, a: usize, b: usize) {
        self.partitioned.remove(&(a, b));
        self.partitioned.remove(&(b, a));
    }

    /// Take a node offline: nothing is delivered to or from it.
    pub fn set_offline(&mut self, node: usize, offline: bool) {
        if offline {
            self.offline.insert(node);
        } else {
            self.offline.remove(&node);
        }
    }

    /// Deliver a hand-crafted message to one node (Byzantine scenarios).
    pub fn inject_message(&mut self, from: usize, to: usize, message: Message) {
        self.inject_message_at(from, to, message, self.latency);
    }

    /// Deliver a hand-crafted message after a chosen delay, e.g. to beat an
    /// honest broadcast already in flight.
    pub fn inject_message_at(&mut self, from: usize, to: usize, message: Message, delay: Duration) {
        let event = Event::from_message(self.keys[from].node_key(), message);
        let time = self.now + delay;
        self.schedule(to, time, event);
    }

    /// Submit a client command to a node.
    pub fn submit_command(&mut self, node: usize, command: Command) {
        let time = self.now;
        self.schedule(node, time, Event::SubmitCommand { command });
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Execution
    // ═══════════════════════════════════════════════════════════════════════

    /// Run until the queue is empty or the simulated clock passes `until`.
    pub fn run_until(&mut self, until: Duration) {
        while let Some((key, _)) = self.queue.iter().next().map(|(k, _)| (*k, ())) {
            if key.time > until {
                break;
            }
            let queued = self.queue.remove(&key).expect("head exists");
            self.now = key.time;

            // Skip cancelled/stale timers.
            let timer_id = match &queued.event {
                Event::ViewTimeout { epoch, view } => Some(TimerId::ViewTimeout {
                    epoch: *epoch,
                    view: *view,
                }),
                Event::SyncPatience { token } => Some(TimerId::SyncPatience { token: *token }),
                _ => None,
            };
            if let Some(timer_id) = timer_id {
                match self.timers.get(&(queued.node, timer_id)) {
                    Some(armed) if *armed == key => {
                        self.timers.remove(&(queued.node, timer_id));
                    }
                    _ => {
                        trace!(node = queued.node, "stale timer dropped");
                        continue;
                    }
                }
            }

            trace!(
                node = queued.node,
                event = queued.event.type_name(),
                at_ms = self.now.as_millis() as u64,
                "dispatch"
            );
            self.nodes[queued.node].set_time(self.now);
            let actions = self.nodes[queued.node].handle(queued.event);
            self.perform(queued.node, actions);
        }
        if self.now < until {
            self.now = until;
        }
    }

    /// Run for a simulated duration.
    pub fn run_for(&mut self, duration: Duration) {
        let until = self.now + duration;
        self.run_until(until);
    }

    fn schedule(&mut self, node: usize, time: Duration, event: Event) -> EventKey {
        let key = EventKey::new(time, event.priority(), self.sequence);
        self.sequence += 1;
        self.queue.insert(key, QueuedEvent { node, event });
        key
    }

    fn delivery_time(&mut self) -> Duration {
        let jitter = self.latency.as_secs_f64() * self.jitter_fraction * self.rng.gen::<f64>();
        self.now + self.latency + Duration::from_secs_f64(jitter)
    }

    fn deliver(&mut self, from: usize, to: usize, message: Message) {
        if from == to {
            return;
        }
        if self.offline.contains(&from)
            || self.offline.contains(&to)
            || self.partitioned.contains(&(from, to))
        {
            self.messages_dropped += 1;
            return;
        }
        let time = self.delivery_time();
        let event = Event::from_message(self.keys[from].node_key(), message);
        self.schedule(to, time, event);
    }

    fn perform(&mut self, node: usize, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::SendTo { target, message } => {
                    if let Some(to) = self.key_index.get(&target).copied() {
                        self.deliver(node, to, message);
                    } else {
                        debug!(?target, "message to unknown validator dropped");
                        self.messages_dropped += 1;
                    }
                }
                Action::Broadcast { message } => {
                    for to in 0..self.nodes.len() {
                        if to != node {
                            self.deliver(node, to, message.clone());
                        }
                    }
                }
                Action::SetTimer { id, duration } => {
                    let time = self.now + duration;
                    // Re-arming replaces the previous instance.
                    if let Some(old) = self.timers.remove(&(node, id)) {
                        self.queue.remove(&old);
                    }
                    let key = self.schedule(node, time, timer_event(id));
                    self.timers.insert((node, id), key);
                }
                Action::CancelTimer { id } => {
                    if let Some(old) = self.timers.remove(&(node, id)) {
                        self.queue.remove(&old);
                    }
                }
                Action::EnqueueInternal { event } => {
                    let time = self.now;
                    self.schedule(node, time, event);
                }
                Action::PersistSafetyState { .. } => {
                    // In-memory runner: the persistence contract is a no-op.
                }
                Action::EmitCommitted { batch } => {
                    self.committed[node].push(batch);
                }
                Action::EmitCommandRejected { id, reason } => {
                    self.rejected[node].push((id, reason));
                }
            }
        }
    }
}
