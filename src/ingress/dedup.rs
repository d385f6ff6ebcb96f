// In-memory dedup map for liquidation event identifiers (§4.1, layer 1).
// Bounded at a minimum retention count, with time-based reclaim of old
// entries. The database uniqueness constraint is the real source of truth
// (§5 "in-memory guards are optimizations, not the source of truth"); this
// is a cheap first filter to avoid round-tripping to the database for
// back-to-back duplicate frames.

use std::collections::HashMap;

use parking_lot::Mutex;

const MIN_RETAINED_ENTRIES: usize = 100;
const RECLAIM_AGE_MS: i64 = 5_000;

pub struct DedupMap {
    inner: Mutex<HashMap<String, i64>>,
}

impl DedupMap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if `event_id` was already seen (and still within the
    /// reclaim window or the minimum-retained set), recording it as seen
    /// either way.
    pub fn seen(&self, event_id: &str, now_ms: i64) -> bool {
        let mut map = self.inner.lock();
        self.reclaim_locked(&mut map, now_ms);
        let already_seen = map.contains_key(event_id);
        map.insert(event_id.to_string(), now_ms);
        already_seen
    }

    fn reclaim_locked(&self, map: &mut HashMap<String, i64>, now_ms: i64) {
        if map.len() <= MIN_RETAINED_ENTRIES {
            return;
        }
        map.retain(|_, seen_at| now_ms - *seen_at < RECLAIM_AGE_MS);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Default for DedupMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_not_seen_second_is() {
        let map = DedupMap::new();
        assert!(!map.seen("e1", 0));
        assert!(map.seen("e1", 10));
    }

    #[test]
    fn reclaim_only_kicks_in_past_minimum_size() {
        let map = DedupMap::new();
        for i in 0..50 {
            map.seen(&format!("e{i}"), 0);
        }
        // Below the retained floor — old entries are not purged yet.
        assert!(map.seen("e0", 100_000));
        assert_eq!(map.len(), 50);
    }

    #[test]
    fn reclaim_purges_aged_entries_once_past_floor() {
        let map = DedupMap::new();
        for i in 0..150 {
            map.seen(&format!("e{i}"), 0);
        }
        // Past the floor: a lookup long after RECLAIM_AGE_MS purges stale entries.
        assert!(!map.seen("e0", 50_000));
    }
}
