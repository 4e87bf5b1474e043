//! Smallest-free view id allocation with a reuse quarantine.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::identifiers::ViewId;

// ============================================================================
// IdAllocator
// ============================================================================

/// Hands out global view ids.
///
/// A freed id is quarantined for a fixed duration so late messages for the
/// old view cannot be mistaken for a new one.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    live: BTreeSet<i32>,
    quarantined: Vec<(i32, Instant)>,
    quarantine: Duration,
}

impl IdAllocator {
    /// Creates an allocator with the given quarantine duration.
    #[must_use]
    pub fn new(quarantine: Duration) -> Self {
        Self {
            live: BTreeSet::new(),
            quarantined: Vec::new(),
            quarantine,
        }
    }

    /// Allocates the smallest non-negative id that is neither live nor
    /// quarantined.
    pub fn allocate(&mut self, now: Instant) -> ViewId {
        self.expire(now);

        let mut candidate = 0;
        for &id in &self.live {
            if id > candidate {
                break;
            }
            if id == candidate {
                candidate += 1;
            }
        }

        // Quarantined ids may sit in gaps between live ones.
        while self.live.contains(&candidate) || self.is_quarantined(candidate) {
            candidate += 1;
        }

        self.live.insert(candidate);
        ViewId::new(candidate)
    }

    /// Frees an id into quarantine.
    ///
    /// Returns `false` if the id was not live.
    pub fn release(&mut self, id: ViewId, now: Instant) -> bool {
        if !self.live.remove(&id.as_i32()) {
            return false;
        }
        self.quarantined.push((id.as_i32(), now + self.quarantine));
        true
    }

    /// Returns `true` if the id is currently allocated.
    #[inline]
    #[must_use]
    pub fn is_live(&self, id: ViewId) -> bool {
        self.live.contains(&id.as_i32())
    }

    /// Number of live ids.
    #[inline]
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Number of ids waiting out their quarantine.
    #[inline]
    #[must_use]
    pub fn quarantined_count(&self) -> usize {
        self.quarantined.len()
    }

    /// Drops quarantine entries that have expired by `now`.
    pub fn expire(&mut self, now: Instant) {
        self.quarantined.retain(|&(_, until)| until > now);
    }

    fn is_quarantined(&self, id: i32) -> bool {
        self.quarantined.iter().any(|&(q, _)| q == id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    const Q: Duration = Duration::from_secs(5);

    #[test]
    fn test_allocates_from_zero() {
        let mut alloc = IdAllocator::new(Q);
        let now = Instant::now();
        assert_eq!(alloc.allocate(now), ViewId::new(0));
        assert_eq!(alloc.allocate(now), ViewId::new(1));
        assert_eq!(alloc.allocate(now), ViewId::new(2));
    }

    #[test]
    fn test_fills_gap() {
        let mut alloc = IdAllocator::new(Duration::ZERO);
        let now = Instant::now();
        for _ in 0..4 {
            alloc.allocate(now);
        }
        assert!(alloc.release(ViewId::new(1), now));
        assert_eq!(alloc.allocate(now), ViewId::new(1));
    }

    #[test]
    fn test_quarantine_blocks_reuse() {
        let mut alloc = IdAllocator::new(Q);
        let start = Instant::now();
        alloc.allocate(start);
        alloc.allocate(start);
        alloc.release(ViewId::new(0), start);

        assert_eq!(alloc.allocate(start + Duration::from_secs(1)), ViewId::new(2));
        assert_eq!(alloc.quarantined_count(), 1);

        assert_eq!(alloc.allocate(start + Duration::from_secs(6)), ViewId::new(0));
        assert_eq!(alloc.quarantined_count(), 0);
    }

    #[test]
    fn test_release_unknown() {
        let mut alloc = IdAllocator::new(Q);
        assert!(!alloc.release(ViewId::new(7), Instant::now()));
    }

    proptest! {
        #[test]
        fn prop_allocates_smallest_free(ops in proptest::collection::vec(any::<(bool, u8)>(), 1..200)) {
            let mut alloc = IdAllocator::new(Q);
            let now = Instant::now();
            let mut blocked = BTreeSet::new();

            for (release, pick) in ops {
                if release && alloc.live_count() > 0 {
                    let live: Vec<i32> = alloc.live.iter().copied().collect();
                    let id = live[pick as usize % live.len()];
                    prop_assert!(alloc.release(ViewId::new(id), now));
                    blocked.insert(id);
                } else {
                    let id = alloc.allocate(now).as_i32();
                    let expected = (0..).find(|i| !blocked.contains(i)).unwrap_or(0);
                    prop_assert_eq!(id, expected);
                    blocked.insert(id);
                }
            }
        }
    }
}
