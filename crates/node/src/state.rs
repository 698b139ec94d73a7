//! Node state machine.

use std::collections::{BTreeMap, BTreeSet};
use tokennet_types::{Message, NodeId, SnapshotId, TopologyError};
use tracing::{debug, instrument, trace};

use crate::{NodeAction, NodeEvent};

/// Phase of a (node, snapshot) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPhase {
    /// No local snapshot taken yet for this id.
    Idle,
    /// Local state recorded, waiting for markers on remaining inbound
    /// channels.
    Recording,
    /// Local state recorded and every inbound channel closed.
    Done,
}

/// Per-snapshot bookkeeping on one node.
///
/// Created exactly once, at the moment the node takes its local snapshot
/// for an id (first marker seen, or explicit start). Recording is
/// idempotent thereafter.
#[derive(Debug, Clone)]
struct SnapshotRecord {
    /// Local balance at the instant the snapshot was taken.
    recorded_balance: u64,
    /// Inbound channels (by source id) whose marker has not arrived yet.
    open_channels: BTreeSet<NodeId>,
    /// Token amounts received per still-open channel after the local
    /// record, in arrival order. These are in-transit candidates.
    buffered: BTreeMap<NodeId, Vec<u64>>,
    /// Completion has been reported to the orchestrator.
    done: bool,
}

/// One simulated node: a token balance plus snapshot bookkeeping.
///
/// The runner owns all nodes and is the only caller of [`handle`].
///
/// [`handle`]: NodeState::handle
#[derive(Debug)]
pub struct NodeState {
    id: NodeId,
    balance: u64,
    /// Destinations of outbound links, in fixed lexicographic order.
    outbound: BTreeSet<NodeId>,
    /// Sources of inbound links. Determines which markers a snapshot
    /// waits for.
    inbound: BTreeSet<NodeId>,
    /// Bookkeeping per in-progress or finished snapshot id. Records are
    /// discarded by the runner once the global snapshot reconciles.
    snapshots: BTreeMap<SnapshotId, SnapshotRecord>,
    /// Ids whose records have been discarded. Markers for these ids can
    /// still be in flight and must not re-initiate the snapshot.
    retired: BTreeSet<SnapshotId>,
}

impl NodeState {
    pub fn new(id: impl Into<NodeId>, tokens: u64) -> Self {
        Self {
            id: id.into(),
            balance: tokens,
            outbound: BTreeSet::new(),
            inbound: BTreeSet::new(),
            snapshots: BTreeMap::new(),
            retired: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    /// Register an outbound link to `dest`. Called during topology
    /// construction only.
    pub fn add_outbound(&mut self, dest: NodeId) {
        self.outbound.insert(dest);
    }

    /// Register an inbound link from `src`. Called during topology
    /// construction only.
    pub fn add_inbound(&mut self, src: NodeId) {
        self.inbound.insert(src);
    }

    /// Debit tokens for an injected transfer. Balances are non-negative
    /// by invariant, so overdrafts are a fatal configuration error.
    pub fn debit(&mut self, amount: u64) -> Result<(), TopologyError> {
        if amount > self.balance {
            return Err(TopologyError::InsufficientTokens {
                node: self.id.clone(),
                balance: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        Ok(())
    }

    /// Phase of this node for a snapshot id.
    pub fn phase(&self, snapshot: SnapshotId) -> SnapshotPhase {
        if self.retired.contains(&snapshot) {
            return SnapshotPhase::Done;
        }
        match self.snapshots.get(&snapshot) {
            None => SnapshotPhase::Idle,
            Some(record) if record.done => SnapshotPhase::Done,
            Some(_) => SnapshotPhase::Recording,
        }
    }

    /// Drop the bookkeeping for a snapshot whose global state has been
    /// reconciled. The record's contents have been copied out and every
    /// token delivery otherwise keeps scanning it; the id is remembered
    /// so a marker still in flight cannot restart the snapshot.
    pub fn discard_snapshot(&mut self, snapshot: SnapshotId) {
        if self.snapshots.remove(&snapshot).is_some() {
            self.retired.insert(snapshot);
        }
    }

    /// Balance recorded for a snapshot id, if the local snapshot has been
    /// taken.
    pub fn recorded_balance(&self, snapshot: SnapshotId) -> Option<u64> {
        self.snapshots.get(&snapshot).map(|r| r.recorded_balance)
    }

    /// Buffered in-transit token amounts for a snapshot, per inbound
    /// channel in lexicographic source order, arrival order within a
    /// channel.
    pub fn buffered_messages(
        &self,
        snapshot: SnapshotId,
    ) -> impl Iterator<Item = (&NodeId, &[u64])> {
        self.snapshots
            .get(&snapshot)
            .into_iter()
            .flat_map(|r| r.buffered.iter().map(|(src, amts)| (src, amts.as_slice())))
    }

    /// Process one event, returning actions for the runner to execute.
    ///
    /// Synchronous and deterministic: same state + event = same actions.
    #[instrument(skip_all, fields(node = %self.id))]
    pub fn handle(&mut self, event: NodeEvent) -> Vec<NodeAction> {
        match event {
            NodeEvent::PacketDelivered { src, message } => match message {
                Message::Token { amount } => self.on_token(src, amount),
                Message::Marker { snapshot } => self.on_marker(src, snapshot),
            },
            NodeEvent::StartSnapshot { snapshot } => self.on_start_snapshot(snapshot),
        }
    }

    /// A token message arrived from `src`: credit the balance, and buffer
    /// it for every snapshot whose channel from `src` is still open.
    fn on_token(&mut self, src: NodeId, amount: u64) -> Vec<NodeAction> {
        self.balance += amount;
        for (snapshot, record) in self.snapshots.iter_mut() {
            if record.open_channels.contains(&src) {
                trace!(%src, amount, %snapshot, "buffered in-transit token");
                record.buffered.entry(src.clone()).or_default().push(amount);
            }
        }
        Vec::new()
    }

    /// A marker arrived from `src`.
    ///
    /// First marker for an id doubles as snapshot initiation: record the
    /// local balance, close the arriving channel, and flood markers
    /// outbound. Subsequent markers only close their channel. Once every
    /// inbound channel is closed, completion is reported exactly once.
    fn on_marker(&mut self, src: NodeId, snapshot: SnapshotId) -> Vec<NodeAction> {
        if self.retired.contains(&snapshot) {
            trace!(%snapshot, %src, "marker for discarded snapshot, ignored");
            return Vec::new();
        }
        let mut actions = Vec::new();

        match self.snapshots.get_mut(&snapshot) {
            None => {
                // Snapshot initiation by marker.
                let mut open_channels = self.inbound.clone();
                open_channels.remove(&src);
                debug!(%snapshot, balance = self.balance, %src, "recorded local snapshot on marker");
                self.snapshots.insert(
                    snapshot,
                    SnapshotRecord {
                        recorded_balance: self.balance,
                        open_channels,
                        buffered: BTreeMap::new(),
                        done: false,
                    },
                );
                actions.extend(self.flood_markers(snapshot));
            }
            Some(record) if record.done => {
                // Late or duplicate marker after completion: ignored.
                trace!(%snapshot, %src, "marker after done, ignored");
                return actions;
            }
            Some(record) => {
                if !record.open_channels.remove(&src) {
                    trace!(%snapshot, %src, "duplicate marker on closed channel, ignored");
                }
            }
        }

        if let Some(done) = self.try_finish(snapshot) {
            actions.push(done);
        }
        actions
    }

    /// Explicit snapshot trigger on the originating node: record, pre-close
    /// all inbound channels (the originator does not wait for its own
    /// marker), flood markers, and report completion immediately.
    fn on_start_snapshot(&mut self, snapshot: SnapshotId) -> Vec<NodeAction> {
        if self.snapshots.contains_key(&snapshot) || self.retired.contains(&snapshot) {
            // Already recorded for this id; recording is at-most-once.
            return Vec::new();
        }
        debug!(%snapshot, balance = self.balance, "recorded local snapshot as originator");
        self.snapshots.insert(
            snapshot,
            SnapshotRecord {
                recorded_balance: self.balance,
                open_channels: BTreeSet::new(),
                buffered: BTreeMap::new(),
                done: false,
            },
        );
        let mut actions = self.flood_markers(snapshot);
        if let Some(done) = self.try_finish(snapshot) {
            actions.push(done);
        }
        actions
    }

    /// Marker flood: one marker per outbound neighbor, fixed order.
    fn flood_markers(&self, snapshot: SnapshotId) -> Vec<NodeAction> {
        self.outbound
            .iter()
            .map(|dest| NodeAction::Send {
                dest: dest.clone(),
                message: Message::Marker { snapshot },
            })
            .collect()
    }

    /// Transition to Done and emit the completion notification once all
    /// inbound channels are closed. Idempotent.
    fn try_finish(&mut self, snapshot: SnapshotId) -> Option<NodeAction> {
        let record = self.snapshots.get_mut(&snapshot)?;
        if record.done || !record.open_channels.is_empty() {
            return None;
        }
        record.done = true;
        debug!(%snapshot, "local snapshot done");
        Some(NodeAction::NotifyComplete { snapshot })
    }
}
