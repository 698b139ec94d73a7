//! Application and control messages carried on channels.

use crate::SnapshotId;

/// A message traveling on a channel.
///
/// Messages are **passive data** - they describe something that was sent.
/// The node state machine dispatches on the variant when a message is
/// delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// An application message transferring tokens from the channel's
    /// source to its destination. The amount was debited from the sender
    /// when the transfer was injected.
    Token { amount: u64 },

    /// A snapshot control marker, flooded on every outbound channel when
    /// a node records its local state. Closes the channel it travels on
    /// for recording purposes at the receiver.
    Marker { snapshot: SnapshotId },
}

impl Message {
    /// Whether this is an application (token) message.
    pub fn is_token(&self) -> bool {
        matches!(self, Message::Token { .. })
    }
}
