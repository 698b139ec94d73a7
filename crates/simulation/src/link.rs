//! FIFO channel queues with delayed visibility.

use std::collections::VecDeque;
use tokennet_types::{Message, NodeId};

/// A message sitting on a link, wrapped with its scheduled receive time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageEvent {
    pub src: NodeId,
    pub dest: NodeId,
    pub message: Message,
    /// Earliest tick at which this event may surface at the head of its
    /// link. Because a message is only delivered once it reaches the head
    /// *and* the destination's per-tick delivery budget allows it, actual
    /// delivery may happen later.
    pub receive_time: u64,
}

/// An ordered FIFO queue of pending deliveries on one (src, dest)
/// channel.
///
/// FIFO is strict: an event is never visible before an earlier-enqueued
/// event on the same link has been delivered, even if its own receive
/// time would otherwise make it eligible. The receive time only gates
/// *when* the head becomes eligible; it never reorders the queue.
#[derive(Debug, Default)]
pub struct Link {
    events: VecDeque<SendMessageEvent>,
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to the tail.
    pub fn enqueue(&mut self, event: SendMessageEvent) {
        self.events.push_back(event);
    }

    /// The head event, if its receive time has passed.
    pub fn peek_due(&self, now: u64) -> Option<&SendMessageEvent> {
        self.events.front().filter(|e| e.receive_time <= now)
    }

    /// Remove and return the head event, if its receive time has passed.
    pub fn pop_due(&mut self, now: u64) -> Option<SendMessageEvent> {
        if self.peek_due(now).is_some() {
            self.events.pop_front()
        } else {
            None
        }
    }

    /// All pending events in queue order. Used by snapshot reconciliation
    /// to find token messages still ahead of a marker.
    pub fn iter(&self) -> impl Iterator<Item = &SendMessageEvent> {
        self.events.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}
