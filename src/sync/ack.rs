//! Acknowledgment tracking
//!
//! Every outbound data frame takes the next id from the session's
//! [`AckCounter`] and stays in the [`AckTracker`] until the peer sends an
//! ACK carrying that id.

use std::collections::BTreeMap;
use std::time::Instant;

/// Monotonic ack id allocator, starting at 0.
///
/// Ids are never reused within a session; running out is reported rather
/// than wrapping around.
#[derive(Debug, Clone, Default)]
pub struct AckCounter {
    next: u32,
    exhausted: bool,
}

impl AckCounter {
    /// Create a counter whose first id is 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id, or `None` once `u32::MAX` was handed out.
    pub fn next_id(&mut self) -> Option<u32> {
        if self.exhausted {
            return None;
        }
        let id = self.next;
        match self.next.checked_add(1) {
            Some(next) => self.next = next,
            None => self.exhausted = true,
        }
        Some(id)
    }

    /// The id the next call will return, if any.
    pub fn peek(&self) -> Option<u32> {
        (!self.exhausted).then_some(self.next)
    }
}

/// An outbound data frame waiting for its ACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOutbound {
    /// Ack id the frame was sent with.
    pub ack_id: u32,
    /// When the frame was first handed to the transport.
    pub timestamp: Instant,
    /// The encoded plaintext frame.
    pub raw_message: Vec<u8>,
}

impl PendingOutbound {
    /// Create a record stamped with the current time.
    pub fn new(ack_id: u32, raw_message: Vec<u8>) -> Self {
        Self {
            ack_id,
            timestamp: Instant::now(),
            raw_message,
        }
    }
}

/// Acknowledgment tracker
///
/// Holds at most one record per ack id.
#[derive(Debug, Default)]
pub struct AckTracker {
    pending: BTreeMap<u32, PendingOutbound>,
}

impl AckTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outbound frame. Returns `false` and keeps the existing
    /// record if the id is already tracked.
    pub fn track(&mut self, record: PendingOutbound) -> bool {
        if self.pending.contains_key(&record.ack_id) {
            return false;
        }
        self.pending.insert(record.ack_id, record);
        true
    }

    /// Remove and return the record for `ack_id`.
    ///
    /// `None` for unknown, duplicate or late acknowledgments.
    pub fn confirm(&mut self, ack_id: u32) -> Option<PendingOutbound> {
        self.pending.remove(&ack_id)
    }

    /// Whether `ack_id` is still waiting.
    pub fn is_pending(&self, ack_id: u32) -> bool {
        self.pending.contains_key(&ack_id)
    }

    /// Outstanding records, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &PendingOutbound> {
        self.pending.values()
    }

    /// Number of outstanding records.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
