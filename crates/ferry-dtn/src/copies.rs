//! Replica budget bookkeeping
//!
//! Every message starts with a fixed budget of copies. When a replica is
//! handed to another host the budget is split between the two holders,
//! binary spray-and-wait style:
//!
//! - the receiver takes `old - max(1, old / 2)`, capped by an adaptive
//!   ceiling derived from how much of the population the two hosts have met
//! - the forwarder keeps the rest
//! - with one copy or less left, the hand-off consumes it and both sides
//!   drop to zero; such replicas only travel to their destination

use std::collections::{BTreeMap, BTreeSet};

use ferry_core::{HostAddress, MessageId};

/// Default replica budget of a new message
pub const DEFAULT_MAX_COPIES: u32 = 5;

/// How a budget is divided by one hand-off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopySplit {
    pub forwarder: u32,
    pub receiver: u32,
}

impl CopySplit {
    /// Split `remaining` copies, giving the receiver at most `ceiling`
    pub fn compute(remaining: u32, ceiling: u32) -> Self {
        if remaining <= 1 {
            return Self {
                forwarder: 0,
                receiver: 0,
            };
        }
        let kept = (remaining / 2).max(1);
        let receiver = (remaining - kept).min(ceiling.max(1));
        Self {
            forwarder: remaining - receiver,
            receiver,
        }
    }

    /// Whether this hand-off consumed the last copy
    pub fn is_final(&self) -> bool {
        self.receiver == 0
    }
}

/// Per-host remaining-copy counts
#[derive(Debug, Clone)]
pub struct CopyLedger {
    default_max: u32,
    entries: BTreeMap<MessageId, u32>,
}

impl Default for CopyLedger {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_COPIES)
    }
}

impl CopyLedger {
    pub fn new(default_max: u32) -> Self {
        Self {
            default_max,
            entries: BTreeMap::new(),
        }
    }

    pub fn default_max(&self) -> u32 {
        self.default_max
    }

    /// Start tracking a new message with the full budget
    pub fn register(&mut self, id: &MessageId) -> u32 {
        *self.entries.entry(id.clone()).or_insert(self.default_max)
    }

    /// Remaining copies; unknown messages read as the default budget
    pub fn copies(&self, id: &MessageId) -> u32 {
        self.entries.get(id).copied().unwrap_or(self.default_max)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.contains_key(id)
    }

    /// Lower the count of `id` to `remaining`
    ///
    /// Counts never grow back: the stored value is the smaller of the
    /// current count and `remaining`. Returns the stored value.
    pub fn record(&mut self, id: &MessageId, remaining: u32) -> u32 {
        let current = self.copies(id);
        let value = current.min(remaining);
        self.entries.insert(id.clone(), value);
        value
    }

    /// Split `remaining` copies for a hand-off and store the receiver share
    pub fn forward_half(&mut self, id: &MessageId, remaining: u32, ceiling: u32) -> CopySplit {
        let split = CopySplit::compute(remaining, ceiling);
        self.entries.insert(id.clone(), split.receiver);
        split
    }

    /// Consume the last copy of `id`
    pub fn forward_final(&mut self, id: &MessageId) {
        self.entries.insert(id.clone(), 0);
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<u32> {
        self.entries.remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy ceiling for a hand-off between two hosts
    ///
    /// `min(remaining, max(1, floor(|contacts_a ∪ contacts_b| / total * max_copies)))`
    pub fn adaptive_limit(
        remaining: u32,
        max_copies: u32,
        contacts_a: &BTreeSet<HostAddress>,
        contacts_b: &BTreeSet<HostAddress>,
        total_nodes: usize,
    ) -> u32 {
        let coverage = if total_nodes == 0 {
            0.0
        } else {
            contacts_a.union(contacts_b).count() as f64 / total_nodes as f64
        };
        let limit = ((coverage * f64::from(max_copies)).floor() as u32).max(1);
        remaining.min(limit)
    }
}
