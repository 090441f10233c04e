//! Message ordering structures.
//!
//! The asynchronous discipline uses [`TimeQueue`], a min-heap keyed by arrival time with insertion order as the
//! tie-breaker. The synchronous discipline uses [`RoundQueue`], which buckets messages by destination and round.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;

use crate::message::Message;
use crate::node::NodeId;

struct QueueEntry {
    time: f64,
    seq: u64,
    message: Message,
}

impl Eq for QueueEntry {}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for QueueEntry {
    // reversed to turn BinaryHeap into a min-heap
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of messages ordered by `(arrival time, insertion sequence)`.
///
/// Messages with equal arrival times are popped in push order, which makes replay deterministic for a fixed seed.
#[derive(Default)]
pub struct TimeQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl TimeQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message.
    pub fn push(&mut self, message: Message) {
        let entry = QueueEntry {
            time: message.arrival.as_f64(),
            seq: self.next_seq,
            message,
        };
        self.next_seq += 1;
        self.heap.push(entry);
    }

    /// Removes and returns the earliest message.
    pub fn pop(&mut self) -> Option<Message> {
        self.heap.pop().map(|e| e.message)
    }

    /// Returns the earliest message without removing it.
    pub fn peek(&self) -> Option<&Message> {
        self.heap.peek().map(|e| &e.message)
    }

    /// Returns `true` if the queue holds no messages.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

/// Messages bucketed by `(destination, round)`.
///
/// A bucket only becomes visible when the scheduler asks for its round.
#[derive(Default)]
pub struct RoundQueue {
    buckets: FxHashMap<(NodeId, u64), Vec<Message>>,
    len: usize,
}

impl RoundQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message to the bucket of its destination and arrival round.
    pub fn push(&mut self, message: Message) {
        let key = (message.dst, message.arrival.as_round());
        self.buckets.entry(key).or_default().push(message);
        self.len += 1;
    }

    /// Removes and returns all messages for `dst` in `round`, in push order.
    pub fn pop_all(&mut self, dst: NodeId, round: u64) -> Vec<Message> {
        let messages = self.buckets.remove(&(dst, round)).unwrap_or_default();
        self.len -= messages.len();
        messages
    }

    /// Drops every pending message addressed to `dst`. Returns the number of dropped messages.
    pub fn clear_destination(&mut self, dst: NodeId) -> usize {
        let mut dropped = 0;
        self.buckets.retain(|(d, _), messages| {
            if *d == dst {
                dropped += messages.len();
                false
            } else {
                true
            }
        });
        self.len -= dropped;
        dropped
    }

    /// Returns `true` if the queue holds no messages.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.len
    }
}

/// Ordering structure selected once per run.
pub enum MessageQueue {
    /// Asynchronous discipline.
    Time(TimeQueue),
    /// Synchronous discipline.
    Round(RoundQueue),
}

impl MessageQueue {
    /// Adds a message to the active structure.
    pub fn push(&mut self, message: Message) {
        match self {
            MessageQueue::Time(q) => q.push(message),
            MessageQueue::Round(q) => q.push(message),
        }
    }

    /// Returns `true` if no messages are pending.
    pub fn is_empty(&self) -> bool {
        match self {
            MessageQueue::Time(q) => q.is_empty(),
            MessageQueue::Round(q) => q.is_empty(),
        }
    }

    /// Number of pending messages.
    pub fn len(&self) -> usize {
        match self {
            MessageQueue::Time(q) => q.len(),
            MessageQueue::Round(q) => q.len(),
        }
    }
}
