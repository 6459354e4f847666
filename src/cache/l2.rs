//! L2: an approximate membership filter used as the negative-lookup fast
//! path. Supports insertion and bulk clear only — per spec.md §4.7 and
//! design notes, it cannot delete a single key, so `Delete` never touches it.

use bloomfilter::Bloom;
use std::sync::RwLock;

pub struct L2 {
    filter: RwLock<Bloom<str>>,
    expected_items: usize,
    target_fpr: f64,
}

impl L2 {
    pub fn new(expected_items: usize, target_fpr: f64) -> Self {
        let filter = Bloom::new_for_fp_rate(expected_items.max(1), target_fpr);
        Self {
            filter: RwLock::new(filter),
            expected_items,
            target_fpr,
        }
    }

    /// `true` means "possibly present" (must be confirmed against L3);
    /// `false` is authoritative: the key was never `Set` since the last Clear.
    pub fn might_contain(&self, key: &str) -> bool {
        self.filter.read().unwrap().check(key)
    }

    pub fn insert(&self, key: &str) {
        self.filter.write().unwrap().set(key);
    }

    /// Rebuilds the filter from scratch; there is no targeted removal.
    pub fn clear(&self) {
        let mut guard = self.filter.write().unwrap();
        *guard = Bloom::new_for_fp_rate(self.expected_items.max(1), self.target_fpr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_before_insert() {
        let l2 = L2::new(1000, 0.01);
        assert!(!l2.might_contain("never-set"));
    }

    #[test]
    fn present_after_insert() {
        let l2 = L2::new(1000, 0.01);
        l2.insert("key");
        assert!(l2.might_contain("key"));
    }

    #[test]
    fn clear_rebuilds() {
        let l2 = L2::new(1000, 0.01);
        l2.insert("key");
        l2.clear();
        assert!(!l2.might_contain("key"));
    }
}
