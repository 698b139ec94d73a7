//! Snapshot completion tracking and reconciliation.

use crate::link::Link;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokennet_node::NodeState;
use tokennet_types::{Message, NodeId, SnapshotId, SnapshotMessage, SnapshotState};
use tracing::{debug, info, trace};

/// Tracks which nodes have finished their local snapshot for each id, and
/// merges per-node state into one consistent global snapshot once every
/// node has reported.
///
/// Bookkeeping for an id is allocated on [`allocate`](Self::allocate) (or
/// on the first completion notification) and cleared when the snapshot
/// finalizes.
#[derive(Debug, Default)]
pub struct SnapshotOrchestrator {
    next_snapshot: u64,
    /// Per snapshot id: nodes that have reported completion. O(1)
    /// duplicate suppression.
    completed: HashMap<SnapshotId, HashSet<NodeId>>,
    /// Per snapshot id: node ids in the order they reported completion.
    /// Audit trail only; reconciliation never consults it.
    completion_order: HashMap<SnapshotId, Vec<NodeId>>,
}

impl SnapshotOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh, monotonically increasing snapshot id.
    pub fn allocate(&mut self) -> SnapshotId {
        let id = SnapshotId(self.next_snapshot);
        self.next_snapshot += 1;
        self.completed.insert(id, HashSet::new());
        self.completion_order.insert(id, Vec::new());
        id
    }

    /// Record that `node` has reached Done for `snapshot`. Duplicate
    /// notifications are no-ops.
    ///
    /// Returns `true` exactly once: when the last of `total_nodes` nodes
    /// reports, at which point the id's bookkeeping is cleared and the
    /// caller must reconcile.
    pub fn notify_complete(
        &mut self,
        node: &NodeId,
        snapshot: SnapshotId,
        total_nodes: usize,
    ) -> bool {
        let completed = self.completed.entry(snapshot).or_default();
        if !completed.insert(node.clone()) {
            trace!(%node, %snapshot, "duplicate completion notification ignored");
            return false;
        }
        info!(%node, %snapshot, "node finished snapshot");

        let order = self.completion_order.entry(snapshot).or_default();
        order.push(node.clone());

        if completed.len() == total_nodes {
            debug!(%snapshot, ?order, "all nodes completed snapshot");
            self.completed.remove(&snapshot);
            self.completion_order.remove(&snapshot);
            true
        } else {
            false
        }
    }

    /// Merge per-node recorded balances and in-transit messages into the
    /// final snapshot. Called once per id, after every node has reported.
    ///
    /// In-transit messages come from two places:
    ///
    /// 1. every node's per-channel buffers: tokens *delivered* after the
    ///    receiver's local record but before that channel's marker, and
    /// 2. tokens still *undelivered* in a link queue ahead of the
    ///    snapshot's marker (the marker was enqueued at the sender's
    ///    record, so everything ahead of it predates the snapshot).
    ///
    /// Queue entries behind the marker, or queues with no marker for this
    /// id, were sent after the sender's record and are post-snapshot
    /// state.
    pub fn reconcile(
        &self,
        snapshot: SnapshotId,
        nodes: &BTreeMap<NodeId, NodeState>,
        links: &BTreeMap<NodeId, BTreeMap<NodeId, Link>>,
    ) -> SnapshotState {
        let mut balances = BTreeMap::new();
        let mut messages = Vec::new();

        for (id, node) in nodes {
            let recorded = node
                .recorded_balance(snapshot)
                .expect("every node has recorded at reconciliation time");
            balances.insert(id.clone(), recorded);

            for (src, amounts) in node.buffered_messages(snapshot) {
                for &amount in amounts {
                    messages.push(SnapshotMessage {
                        src: src.clone(),
                        dest: id.clone(),
                        amount,
                    });
                }
            }
        }

        for (src, outbound) in links {
            for (dest, link) in outbound {
                let mut ahead_of_marker = Vec::new();
                let mut saw_marker = false;
                for event in link.iter() {
                    match event.message {
                        Message::Marker { snapshot: id } if id == snapshot => {
                            saw_marker = true;
                            break;
                        }
                        Message::Token { amount } => ahead_of_marker.push(amount),
                        Message::Marker { .. } => {}
                    }
                }
                if saw_marker {
                    for amount in ahead_of_marker {
                        messages.push(SnapshotMessage {
                            src: src.clone(),
                            dest: dest.clone(),
                            amount,
                        });
                    }
                }
            }
        }

        SnapshotState {
            id: snapshot,
            balances,
            messages,
        }
    }
}
