//! Discrete-time simulation runner.
//!
//! The runner owns every node and link, advances the global tick counter,
//! and executes the actions nodes emit. All state mutation happens on the
//! thread driving [`tick`](SimulationRunner::tick); there is no
//! parallelism in the simulated domain, only the appearance of concurrent
//! nodes through deterministic interleaving.

use crate::collector::SnapshotCollector;
use crate::link::{Link, SendMessageEvent};
use crate::orchestrator::SnapshotOrchestrator;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet};
use tokennet_node::{NodeAction, NodeEvent, NodeState};
use tokennet_types::{Message, NodeId, SnapshotId, SnapshotState, TopologyError};
use tracing::{debug, info, trace};

/// Configuration for the simulation.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Minimum delivery delay in ticks (inclusive). Must be at least 1 so
    /// a message is never delivered on the tick it was sent.
    pub min_delay: u64,
    /// Maximum delivery delay in ticks (inclusive).
    pub max_delay: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        // 1 + uniform(0, 4): the classic 1-5 tick delivery window.
        Self {
            min_delay: 1,
            max_delay: 5,
        }
    }
}

impl SimulationConfig {
    /// Constant delivery delay. Removes the only source of
    /// non-determinism beyond the seed, fixing delivery order entirely.
    pub fn fixed_delay(delay: u64) -> Self {
        Self {
            min_delay: delay,
            max_delay: delay,
        }
    }
}

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulationStats {
    /// Ticks executed.
    pub ticks: u64,
    /// Token transfers injected by the caller.
    pub transfers_injected: u64,
    /// Total messages delivered to node packet handlers.
    pub messages_delivered: u64,
    /// Token messages delivered.
    pub tokens_delivered: u64,
    /// Marker messages delivered.
    pub markers_delivered: u64,
    /// Snapshots started.
    pub snapshots_started: u64,
    /// Snapshots fully reconciled and published.
    pub snapshots_completed: u64,
}

/// Externally injectable events: the only two actions a caller can
/// trigger besides ticking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedEvent {
    /// Transfer tokens from `src` to `dest` over the `src`->`dest` link.
    TokenTransfer {
        src: NodeId,
        dest: NodeId,
        amount: u64,
    },
    /// Start a global snapshot originating at `node`.
    StartSnapshot { node: NodeId },
}

/// The discrete-time engine.
///
/// Owns all [`NodeState`]s and [`Link`]s; nodes never reach across to one
/// another except by emitting send actions the runner turns into delayed
/// link deliveries. Given the same topology, injections, and seed, a run
/// is fully reproducible.
pub struct SimulationRunner {
    /// Global tick counter.
    time: u64,
    config: SimulationConfig,
    /// All nodes, keyed by id. BTreeMap gives the fixed lexicographic
    /// iteration order determinism requires.
    nodes: BTreeMap<NodeId, NodeState>,
    /// Outbound links per source node, keyed by destination.
    links: BTreeMap<NodeId, BTreeMap<NodeId, Link>>,
    /// RNG for delivery delays (seeded for determinism).
    rng: ChaCha8Rng,
    orchestrator: SnapshotOrchestrator,
    collector: SnapshotCollector,
    stats: SimulationStats,
}

impl SimulationRunner {
    /// Create a runner with the given delay configuration and seed.
    pub fn new(config: SimulationConfig, seed: u64) -> Self {
        Self {
            time: 0,
            config,
            nodes: BTreeMap::new(),
            links: BTreeMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            orchestrator: SnapshotOrchestrator::new(),
            collector: SnapshotCollector::new(),
            stats: SimulationStats::default(),
        }
    }

    /// Current simulated time in ticks.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Get a node by id.
    pub fn node(&self, id: &NodeId) -> Option<&NodeState> {
        self.nodes.get(id)
    }

    /// Simulation statistics.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// A cloneable handle for blocking snapshot retrieval from another
    /// thread.
    pub fn collector(&self) -> SnapshotCollector {
        self.collector.clone()
    }

    /// Block until snapshot `id` has been reconciled, then return it.
    ///
    /// The wait must happen on a different thread from the one driving
    /// [`tick`](Self::tick); use [`collector`](Self::collector) to obtain
    /// a handle for that thread.
    pub fn collect_snapshot(&self, id: SnapshotId) -> SnapshotState {
        self.collector.collect(id)
    }

    /// Whether every link queue is drained.
    pub fn is_quiescent(&self) -> bool {
        self.links
            .values()
            .all(|outbound| outbound.values().all(Link::is_empty))
    }

    /// Sum of all node balances plus all token amounts still in link
    /// queues. Constant for a closed network.
    pub fn total_tokens(&self) -> u64 {
        let held: u64 = self.nodes.values().map(NodeState::balance).sum();
        let in_flight: u64 = self
            .links
            .values()
            .flat_map(|outbound| outbound.values())
            .flat_map(Link::iter)
            .filter_map(|event| match event.message {
                Message::Token { amount } => Some(amount),
                Message::Marker { .. } => None,
            })
            .sum();
        held + in_flight
    }

    // ─── Topology Construction ───

    /// Add a node with the given starting token balance.
    pub fn add_node(
        &mut self,
        id: impl Into<NodeId>,
        tokens: u64,
    ) -> Result<(), TopologyError> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(TopologyError::DuplicateNode(id));
        }
        self.links.insert(id.clone(), BTreeMap::new());
        self.nodes.insert(id.clone(), NodeState::new(id, tokens));
        Ok(())
    }

    /// Add a unidirectional link between two existing nodes.
    pub fn add_link(
        &mut self,
        src: impl Into<NodeId>,
        dest: impl Into<NodeId>,
    ) -> Result<(), TopologyError> {
        let (src, dest) = (src.into(), dest.into());
        if !self.nodes.contains_key(&src) {
            return Err(TopologyError::UnknownNode(src));
        }
        if !self.nodes.contains_key(&dest) {
            return Err(TopologyError::UnknownNode(dest));
        }
        let outbound = self.links.get_mut(&src).expect("links entry per node");
        if outbound.contains_key(&dest) {
            return Err(TopologyError::DuplicateLink { src, dest });
        }
        outbound.insert(dest.clone(), Link::new());
        self.nodes
            .get_mut(&src)
            .expect("checked above")
            .add_outbound(dest.clone());
        self.nodes
            .get_mut(&dest)
            .expect("checked above")
            .add_inbound(src);
        Ok(())
    }

    // ─── Event Injection ───

    /// Run an externally triggered event.
    pub fn inject_event(&mut self, event: InjectedEvent) -> Result<(), TopologyError> {
        match event {
            InjectedEvent::TokenTransfer { src, dest, amount } => {
                self.inject_transfer(&src, &dest, amount)
            }
            InjectedEvent::StartSnapshot { node } => self.start_snapshot(&node).map(|_| ()),
        }
    }

    /// Debit `amount` from `src` immediately and schedule a delayed token
    /// delivery on the `src`->`dest` link.
    pub fn inject_transfer(
        &mut self,
        src: &NodeId,
        dest: &NodeId,
        amount: u64,
    ) -> Result<(), TopologyError> {
        if !self.nodes.contains_key(dest) {
            return Err(TopologyError::UnknownNode(dest.clone()));
        }
        let has_link = self
            .links
            .get(src)
            .is_some_and(|outbound| outbound.contains_key(dest));
        if !has_link {
            if !self.nodes.contains_key(src) {
                return Err(TopologyError::UnknownNode(src.clone()));
            }
            return Err(TopologyError::UnknownLink {
                src: src.clone(),
                dest: dest.clone(),
            });
        }

        self.nodes
            .get_mut(src)
            .expect("link implies node")
            .debit(amount)?;
        self.stats.transfers_injected += 1;
        debug!(%src, %dest, amount, time = self.time, "transfer injected");
        self.send_message(src, dest.clone(), Message::Token { amount });
        Ok(())
    }

    /// Start a new snapshot at the given node, returning the allocated id.
    pub fn start_snapshot(&mut self, node: &NodeId) -> Result<SnapshotId, TopologyError> {
        if !self.nodes.contains_key(node) {
            return Err(TopologyError::UnknownNode(node.clone()));
        }
        let snapshot = self.orchestrator.allocate();
        self.stats.snapshots_started += 1;
        info!(%node, %snapshot, time = self.time, "node started snapshot");

        let actions = self
            .nodes
            .get_mut(node)
            .expect("checked above")
            .handle(NodeEvent::StartSnapshot { snapshot });
        self.process_actions(node.clone(), actions);
        Ok(snapshot)
    }

    // ─── Event Loop ───

    /// Advance simulated time by one step and deliver due messages.
    ///
    /// Iterates source nodes in lexicographic id order and each source's
    /// links in lexicographic destination order. The first link whose
    /// head event is due and whose destination has not yet received a
    /// message this tick has its head popped and delivered, and delivery
    /// for that source stops for this tick. Delivering at most one
    /// message to each node per tick establishes a total order of packet
    /// arrivals at every node.
    pub fn tick(&mut self) {
        self.time += 1;
        self.stats.ticks += 1;
        trace!(time = self.time, "tick");

        // Decide this tick's deliveries before touching any node state so
        // that actions emitted mid-tick cannot affect eligibility.
        let mut delivered_to: BTreeSet<NodeId> = BTreeSet::new();
        let mut deliveries: Vec<(NodeId, NodeId)> = Vec::new();
        for (src, outbound) in &self.links {
            for (dest, link) in outbound {
                if delivered_to.contains(dest) {
                    continue;
                }
                if link.peek_due(self.time).is_some() {
                    delivered_to.insert(dest.clone());
                    deliveries.push((src.clone(), dest.clone()));
                    break;
                }
            }
        }

        for (src, dest) in deliveries {
            let event = self
                .links
                .get_mut(&src)
                .and_then(|outbound| outbound.get_mut(&dest))
                .and_then(|link| link.pop_due(self.time))
                .expect("selected head is due");
            self.deliver(event);
        }
    }

    /// Hand one popped link event to its destination's packet handler and
    /// execute the resulting actions.
    fn deliver(&mut self, event: SendMessageEvent) {
        let SendMessageEvent {
            src,
            dest,
            message,
            receive_time: _,
        } = event;

        self.stats.messages_delivered += 1;
        match message {
            Message::Token { .. } => self.stats.tokens_delivered += 1,
            Message::Marker { .. } => self.stats.markers_delivered += 1,
        }
        debug!(%src, %dest, ?message, time = self.time, "message delivered");

        let actions = self
            .nodes
            .get_mut(&dest)
            .expect("links only reference known nodes")
            .handle(NodeEvent::PacketDelivered { src, message });
        self.process_actions(dest, actions);
    }

    /// Execute actions emitted by `origin`'s state machine.
    fn process_actions(&mut self, origin: NodeId, actions: Vec<NodeAction>) {
        for action in actions {
            match action {
                NodeAction::Send { dest, message } => {
                    self.send_message(&origin, dest, message);
                }
                NodeAction::NotifyComplete { snapshot } => {
                    let all_done =
                        self.orchestrator
                            .notify_complete(&origin, snapshot, self.nodes.len());
                    if all_done {
                        let state =
                            self.orchestrator
                                .reconcile(snapshot, &self.nodes, &self.links);
                        // The reconciled state owns everything the nodes
                        // recorded; free their bookkeeping for this id.
                        for node in self.nodes.values_mut() {
                            node.discard_snapshot(snapshot);
                        }
                        self.stats.snapshots_completed += 1;
                        info!(
                            %snapshot,
                            time = self.time,
                            in_transit = state.messages.len(),
                            "snapshot reconciled"
                        );
                        self.collector.publish(state);
                    }
                }
            }
        }
    }

    /// Enqueue a message on an outbound link with a sampled delay.
    fn send_message(&mut self, src: &NodeId, dest: NodeId, message: Message) {
        let delay = self
            .rng
            .gen_range(self.config.min_delay..=self.config.max_delay);
        let receive_time = self.time + delay;
        trace!(%src, %dest, ?message, receive_time, "message enqueued");
        self.links
            .get_mut(src)
            .and_then(|outbound| outbound.get_mut(&dest))
            .expect("actions only target wired links")
            .enqueue(SendMessageEvent {
                src: src.clone(),
                dest,
                message,
                receive_time,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_node_is_rejected() {
        let mut sim = SimulationRunner::new(SimulationConfig::default(), 1);
        sim.add_node("a", 10).unwrap();
        assert_eq!(
            sim.add_node("a", 5),
            Err(TopologyError::DuplicateNode(NodeId::from("a")))
        );
    }

    #[test]
    fn link_requires_both_endpoints() {
        let mut sim = SimulationRunner::new(SimulationConfig::default(), 1);
        sim.add_node("a", 10).unwrap();
        assert_eq!(
            sim.add_link("a", "b"),
            Err(TopologyError::UnknownNode(NodeId::from("b")))
        );
        assert_eq!(
            sim.add_link("x", "a"),
            Err(TopologyError::UnknownNode(NodeId::from("x")))
        );
    }

    #[test]
    fn duplicate_link_is_rejected() {
        let mut sim = SimulationRunner::new(SimulationConfig::default(), 1);
        sim.add_node("a", 10).unwrap();
        sim.add_node("b", 0).unwrap();
        sim.add_link("a", "b").unwrap();
        assert!(matches!(
            sim.add_link("a", "b"),
            Err(TopologyError::DuplicateLink { .. })
        ));
    }

    #[test]
    fn transfer_requires_a_link() {
        let mut sim = SimulationRunner::new(SimulationConfig::default(), 1);
        sim.add_node("a", 10).unwrap();
        sim.add_node("b", 0).unwrap();
        assert!(matches!(
            sim.inject_transfer(&NodeId::from("a"), &NodeId::from("b"), 5),
            Err(TopologyError::UnknownLink { .. })
        ));
    }

    #[test]
    fn transfer_debits_immediately() {
        let mut sim = SimulationRunner::new(SimulationConfig::default(), 1);
        sim.add_node("a", 10).unwrap();
        sim.add_node("b", 0).unwrap();
        sim.add_link("a", "b").unwrap();

        sim.inject_transfer(&NodeId::from("a"), &NodeId::from("b"), 4)
            .unwrap();
        assert_eq!(sim.node(&NodeId::from("a")).unwrap().balance(), 6);
        assert_eq!(sim.node(&NodeId::from("b")).unwrap().balance(), 0);
        // The tokens exist only on the link until delivery.
        assert_eq!(sim.total_tokens(), 10);
    }

    #[test]
    fn overdraft_is_fatal() {
        let mut sim = SimulationRunner::new(SimulationConfig::default(), 1);
        sim.add_node("a", 3).unwrap();
        sim.add_node("b", 0).unwrap();
        sim.add_link("a", "b").unwrap();
        assert!(matches!(
            sim.inject_transfer(&NodeId::from("a"), &NodeId::from("b"), 5),
            Err(TopologyError::InsufficientTokens { .. })
        ));
    }

    #[test]
    fn fixed_delay_delivers_on_schedule() {
        let mut sim = SimulationRunner::new(SimulationConfig::fixed_delay(2), 1);
        sim.add_node("a", 10).unwrap();
        sim.add_node("b", 0).unwrap();
        sim.add_link("a", "b").unwrap();

        sim.inject_transfer(&NodeId::from("a"), &NodeId::from("b"), 10)
            .unwrap();
        sim.tick();
        assert_eq!(sim.node(&NodeId::from("b")).unwrap().balance(), 0);
        sim.tick();
        assert_eq!(sim.node(&NodeId::from("b")).unwrap().balance(), 10);
        assert!(sim.is_quiescent());
    }

    #[test]
    fn snapshot_at_unknown_node_is_fatal() {
        let mut sim = SimulationRunner::new(SimulationConfig::default(), 1);
        assert!(matches!(
            sim.start_snapshot(&NodeId::from("ghost")),
            Err(TopologyError::UnknownNode(_))
        ));
    }
}
