//! Bounded, TTL-aware map with FIFO-by-insertion eviction
//!
//! Every cache namespace, the anime store and the preference map are built on
//! this type. Eviction order is the order keys were (re)inserted; reads never
//! change it.

use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Slot<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
}

/// Insertion-ordered map bounded by item count and optionally by age
pub struct BoundedMap<K, V> {
    entries: HashMap<K, Slot<V>>,
    /// Insertion queue. An item is live only while its seq matches the slot's.
    order: VecDeque<(K, u64)>,
    next_seq: u64,
    max_items: usize,
    ttl: Option<Duration>,
}

impl<K, V> BoundedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// `max_items == 0` means unbounded, `ttl == None` means entries never expire
    pub fn new(max_items: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
            max_items,
            ttl,
        }
    }

    /// Build from a minutes value where 0 disables expiry
    pub fn with_ttl_minutes(max_items: usize, ttl_minutes: u64) -> Self {
        let ttl = (ttl_minutes > 0).then(|| Duration::from_secs(ttl_minutes * 60));
        Self::new(max_items, ttl)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Insert a value, returning the entries evicted to make room
    pub fn insert(&mut self, key: K, value: V) -> Vec<(K, V)> {
        self.insert_at(key, value, Instant::now())
    }

    pub fn insert_at(&mut self, key: K, value: V, now: Instant) -> Vec<(K, V)> {
        let mut evicted = Vec::new();

        // Replacing a key refreshes its position; the old queue item goes stale.
        if self.entries.remove(&key).is_none() && self.max_items > 0 {
            while self.entries.len() >= self.max_items {
                match self.pop_oldest() {
                    Some(pair) => evicted.push(pair),
                    None => break,
                }
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((key.clone(), seq));
        self.entries.insert(
            key,
            Slot {
                value,
                inserted_at: now,
                seq,
            },
        );

        self.compact_if_needed();
        evicted
    }

    /// Look up a live entry. Expired entries are removed and reported as absent.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_at(key, Instant::now())
    }

    pub fn get_at<Q>(&mut self, key: &Q, now: Instant) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let expired = match self.entries.get(key) {
            None => return None,
            Some(slot) => self.is_expired(slot, now),
        };

        if expired {
            self.entries.remove(key);
            return None;
        }

        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let before = self.entries.len();
        self.entries
            .retain(|_, slot| now.saturating_duration_since(slot.inserted_at) <= ttl);
        before - self.entries.len()
    }

    /// Live keys, oldest first
    pub fn keys(&self) -> Vec<K> {
        self.order
            .iter()
            .filter(|(key, seq)| self.entries.get(key).map(|s| s.seq) == Some(*seq))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn is_expired(&self, slot: &Slot<V>, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(slot.inserted_at) > ttl,
            None => false,
        }
    }

    fn pop_oldest(&mut self) -> Option<(K, V)> {
        while let Some((key, seq)) = self.order.pop_front() {
            let live = self.entries.get(&key).map(|slot| slot.seq) == Some(seq);
            if live {
                return self.entries.remove(&key).map(|slot| (key, slot.value));
            }
        }
        None
    }

    fn compact_if_needed(&mut self) {
        if self.order.len() > self.entries.len() * 2 + 32 {
            let entries = &self.entries;
            self.order
                .retain(|(key, seq)| entries.get(key).map(|s| s.seq) == Some(*seq));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_evicts_oldest_inserted() {
        let mut map = BoundedMap::new(2, None);
        map.insert("a", 1);
        map.insert("b", 2);
        // Reads do not refresh position
        assert_eq!(map.get("a"), Some(&1));

        let evicted = map.insert("c", 3);
        assert_eq!(evicted, vec![("a", 1)]);
        assert_eq!(map.keys(), vec!["b", "c"]);
    }

    #[test]
    fn test_reinsert_moves_to_back() {
        let mut map = BoundedMap::new(2, None);
        map.insert("a", 1);
        map.insert("b", 2);
        assert!(map.insert("a", 10).is_empty());

        let evicted = map.insert("c", 3);
        assert_eq!(evicted, vec![("b", 2)]);
        assert_eq!(map.get("a"), Some(&10));
    }

    #[test]
    fn test_ttl_expiry_removes_entry() {
        let start = Instant::now();
        let mut map = BoundedMap::with_ttl_minutes(0, 5);
        map.insert_at("q".to_string(), 1, start);

        let within = start + Duration::from_secs(5 * 60);
        assert_eq!(map.get_at("q", within), Some(&1));

        let after = start + Duration::from_secs(5 * 60 + 1);
        assert_eq!(map.get_at("q", after), None);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let start = Instant::now();
        let mut map = BoundedMap::with_ttl_minutes(0, 0);
        map.insert_at(1u64, "x", start);
        assert_eq!(map.get_at(&1u64, start + Duration::from_secs(86_400 * 365)), Some(&"x"));
    }

    #[test]
    fn test_purge_expired() {
        let start = Instant::now();
        let mut map = BoundedMap::with_ttl_minutes(0, 1);
        map.insert_at(1u64, (), start);
        map.insert_at(2u64, (), start + Duration::from_secs(50));
        assert_eq!(map.purge_expired(start + Duration::from_secs(80)), 1);
        assert_eq!(map.keys(), vec![2]);
    }

    #[test]
    fn test_expired_slot_does_not_block_eviction_order() {
        let start = Instant::now();
        let mut map = BoundedMap::with_ttl_minutes(2, 1);
        map.insert_at("a", 1, start);
        map.insert_at("b", 2, start);
        assert_eq!(map.get_at("a", start + Duration::from_secs(61)), None);

        // "a" is gone, so inserting "c" needs no eviction
        assert!(map.insert_at("c", 3, start + Duration::from_secs(62)).is_empty());
        assert_eq!(map.keys(), vec!["b", "c"]);
    }

    proptest! {
        #[test]
        fn prop_size_never_exceeds_max(max in 1usize..20, keys in proptest::collection::vec(0u16..64, 0..200)) {
            let mut map = BoundedMap::new(max, None);
            for key in keys {
                map.insert(key, ());
                prop_assert!(map.len() <= max);
            }
        }

        #[test]
        fn prop_distinct_inserts_evict_exact_overflow(max in 1usize..20, count in 0usize..100) {
            let mut map = BoundedMap::new(max, None);
            let mut evicted = Vec::new();
            for key in 0..count {
                evicted.extend(map.insert(key, key).into_iter().map(|(k, _)| k));
            }
            let expected: Vec<usize> = (0..count.saturating_sub(max)).collect();
            prop_assert_eq!(evicted, expected);
            prop_assert_eq!(map.len(), count.min(max));
        }
    }
}
