use std::collections::HashMap;

use parley_core::identity::normalize_name;

/// Per-partner unread counters. Not persisted.
#[derive(Debug, Default)]
pub struct UnreadIndex {
    counts: HashMap<String, u32>,
}

impl UnreadIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more unread message from `partner`; returns the new count.
    pub fn increment(&mut self, partner: &str) -> u32 {
        let count = self.counts.entry(normalize_name(partner)).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Reset the partner's counter, returning how many were unread.
    pub fn clear(&mut self, partner: &str) -> u32 {
        self.counts.remove(&normalize_name(partner)).unwrap_or(0)
    }

    pub fn count(&self, partner: &str) -> u32 {
        self.counts
            .get(&normalize_name(partner))
            .copied()
            .unwrap_or(0)
    }

    pub fn has_unread(&self, partner: &str) -> bool {
        self.count(partner) > 0
    }

    pub fn total(&self) -> u32 {
        self.counts
            .values()
            .fold(0_u32, |total, count| total.saturating_add(*count))
    }
}
