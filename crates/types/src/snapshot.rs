//! Global snapshot value objects.

use crate::{NodeId, SnapshotId};
use std::collections::BTreeMap;

/// A token message judged to be in a channel at snapshot time: sent
/// before the sender's local snapshot, received (if ever) after the
/// receiver's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMessage {
    pub src: NodeId,
    pub dest: NodeId,
    pub amount: u64,
}

/// The reconciled global snapshot.
///
/// Immutable once the orchestrator finishes reconciliation: per-node
/// recorded balances plus every in-transit message, forming a consistent
/// cut of the distributed execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotState {
    /// Which snapshot this is.
    pub id: SnapshotId,
    /// Recorded local balance of every node, keyed by node id.
    pub balances: BTreeMap<NodeId, u64>,
    /// Messages captured in-channel, in deterministic (channel, arrival)
    /// order.
    pub messages: Vec<SnapshotMessage>,
}

impl SnapshotState {
    /// Sum of recorded balances plus in-transit amounts.
    ///
    /// For a closed network this equals the total token supply before the
    /// snapshot was started.
    pub fn total_tokens(&self) -> u64 {
        let recorded: u64 = self.balances.values().sum();
        let in_transit: u64 = self.messages.iter().map(|m| m.amount).sum();
        recorded + in_transit
    }
}
