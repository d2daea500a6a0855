//! Bounded set of event ids already handled.

use std::collections::{HashSet, VecDeque};

/// Ids remembered before the oldest is forgotten.
///
/// Relays echo recent events, not ancient ones; an id evicted here is far
/// older than anything a live subscription replays.
pub(crate) const DEFAULT_SEEN_CAPACITY: usize = 10_000;

/// Insertion-ordered id set that evicts its oldest entry at capacity.
pub(crate) struct SeenEvents {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenEvents {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self { ids: HashSet::new(), order: VecDeque::new(), capacity: capacity.max(1) }
    }

    /// Record `id`. Returns false if it was already present.
    pub(crate) fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        while self.order.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.ids.remove(&oldest);
                },
                None => break,
            }
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

impl Default for SeenEvents {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SEEN_CAPACITY)
    }
}
