//! Events consumed and actions produced by the node state machine.

use tokennet_types::{Message, NodeId, SnapshotId};

/// All possible inputs to a node.
///
/// Events are **passive data** - they describe something that happened.
/// The state machine processes events and returns actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A message arrived on the inbound channel from `src`.
    ///
    /// The runner delivers at most one of these per node per tick.
    PacketDelivered { src: NodeId, message: Message },

    /// Explicit snapshot trigger: this node is the originator for
    /// `snapshot`.
    StartSnapshot { snapshot: SnapshotId },
}

/// All possible outputs from a node.
///
/// The runner executes these: `Send` enqueues on the outbound link with a
/// sampled delay, `NotifyComplete` goes to the snapshot orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    /// Send a message on the outbound channel to `dest`.
    Send { dest: NodeId, message: Message },

    /// Report that this node's local snapshot for `snapshot` is done:
    /// local state recorded and every inbound channel closed.
    NotifyComplete { snapshot: SnapshotId },
}
