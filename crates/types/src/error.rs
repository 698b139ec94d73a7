//! Error taxonomy.
//!
//! Every failure in the core is a configuration or programming error and
//! is surfaced immediately (fail-fast). There are no retries and no
//! recoverable runtime conditions. Duplicate completion notifications and
//! duplicate markers are *not* errors: they are silently ignored for
//! idempotence.

use crate::NodeId;
use thiserror::Error;

/// Errors from topology construction and event injection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("node {0} already exists")]
    DuplicateNode(NodeId),

    #[error("link {src}->{dest} does not exist")]
    UnknownLink { src: NodeId, dest: NodeId },

    #[error("link {src}->{dest} already exists")]
    DuplicateLink { src: NodeId, dest: NodeId },

    #[error("node {node} holds {balance} tokens, cannot send {requested}")]
    InsufficientTokens {
        node: NodeId,
        balance: u64,
        requested: u64,
    },
}
