use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// What a full [`MediaQueue`] does with the next item. Chosen at construction
/// and never changed for the lifetime of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Reject the incoming item; the queue keeps its older content.
    DropIncoming,
    /// Free the oldest item to make room; the queue keeps the freshest audio.
    #[default]
    EvictOldest,
}

/// Bounded FIFO of media units. Insertion order is playout order.
///
/// The queue itself is single-threaded; the scheduler shares it between the
/// producer and the worker behind a mutex taken with a bounded wait.
#[derive(Debug)]
pub struct MediaQueue<T> {
    name: &'static str,
    items: VecDeque<T>,
    capacity: usize,
    policy: OverflowPolicy,
    overflowed: u64,
}

impl<T> MediaQueue<T> {
    pub fn new(name: &'static str, capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            items: VecDeque::with_capacity(capacity),
            capacity,
            policy,
            overflowed: 0,
        }
    }

    /// Appends `item`. Returns `false` only when the queue is full and the
    /// policy is [`OverflowPolicy::DropIncoming`].
    pub fn try_enqueue(&mut self, item: T) -> bool {
        if self.items.len() >= self.capacity {
            self.overflowed += 1;
            match self.policy {
                OverflowPolicy::DropIncoming => {
                    warn!(
                        "{} queue full ({}), dropping incoming frame",
                        self.name, self.capacity
                    );
                    return false;
                }
                OverflowPolicy::EvictOldest => {
                    warn!(
                        "{} queue full ({}), evicting oldest frame",
                        self.name, self.capacity
                    );
                    self.items.pop_front();
                }
            }
        }
        self.items.push_back(item);
        true
    }

    pub fn try_dequeue(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn peek_first(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn peek_first_mut(&mut self) -> Option<&mut T> {
        self.items.front_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Items rejected or evicted because the queue was full.
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }

    /// Evicts from the head until at least `slots` entries are free.
    /// Returns how many items were freed.
    pub fn make_room(&mut self, slots: usize) -> usize {
        let keep = self.capacity.saturating_sub(slots);
        let mut evicted = 0;
        while self.items.len() > keep {
            self.items.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            warn!(
                "{} queue congested, evicted {} oldest frames",
                self.name, evicted
            );
        }
        evicted
    }

    /// Drains and frees every entry. Returns how many were dropped.
    pub fn flush(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        dropped
    }
}
