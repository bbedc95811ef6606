//! Bounded FIFO of outbound frames held while the socket is down.

use std::collections::VecDeque;

use tokio::time::Instant;

/// A serialized frame waiting for a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Serialized JSON text.
    pub payload: String,
    /// When the frame was queued.
    pub enqueued_at: Instant,
    /// Times the frame was handed to a socket that then failed.
    pub attempts: u32,
}

impl QueuedMessage {
    /// Wrap `payload`, stamped now.
    pub fn new(payload: String) -> Self {
        Self {
            payload,
            enqueued_at: Instant::now(),
            attempts: 0,
        }
    }
}

/// Outbound queue that drops its oldest entry when full.
#[derive(Debug)]
pub struct OutboundQueue {
    messages: VecDeque<QueuedMessage>,
    capacity: usize,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` messages (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Append a message, returning the evicted oldest one when full.
    pub fn push(&mut self, message: QueuedMessage) -> Option<QueuedMessage> {
        let evicted = if self.messages.len() >= self.capacity {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(message);
        evicted
    }

    /// Put unsent messages back at the head, ahead of anything queued since.
    ///
    /// `messages` must be in their original order. Returns how many of the
    /// oldest entries were evicted to respect the capacity.
    pub fn restore(&mut self, messages: Vec<QueuedMessage>) -> usize {
        for message in messages.into_iter().rev() {
            self.messages.push_front(message);
        }
        let mut evicted = 0;
        while self.messages.len() > self.capacity {
            let _ = self.messages.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Remove and return every message in FIFO order.
    pub fn drain(&mut self) -> impl Iterator<Item = QueuedMessage> + '_ {
        self.messages.drain(..)
    }

    /// Drop every message, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.messages.len();
        self.messages.clear();
        dropped
    }

    /// Messages waiting.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Maximum messages held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
