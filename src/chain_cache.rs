use dashmap::DashMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::Duration;

use crate::metrics;
use crate::types::{now_millis, ChainId, UnixMillis};

/// Cached data for one chain, stamped with the time it was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainCacheEntry<K: Eq + Hash, V> {
    pub chain_id: ChainId,
    pub timestamp: UnixMillis,
    pub data: HashMap<K, V>,
}

impl<K: Eq + Hash, V> ChainCacheEntry<K, V> {
    pub fn new(chain_id: ChainId, data: HashMap<K, V>) -> Self {
        Self::at(chain_id, now_millis(), data)
    }

    pub fn at(chain_id: ChainId, timestamp: UnixMillis, data: HashMap<K, V>) -> Self {
        Self {
            chain_id,
            timestamp,
            data,
        }
    }

    /// Older than `threshold` as seen at `now`.
    pub fn is_stale(&self, threshold: Duration, now: UnixMillis) -> bool {
        now.saturating_sub(self.timestamp) > i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Per-chain cache store.
///
/// Each chain's entry is replaced as a whole; writing one chain never touches
/// another. Entries only leave the store through `remove` or `clear`:
/// staleness decides whether a refresh runs, it does not evict.
#[derive(Debug)]
pub struct ChainCache<K: Eq + Hash, V> {
    name: &'static str,
    entries: DashMap<ChainId, ChainCacheEntry<K, V>>,
}

impl<K, V> ChainCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
        }
    }

    /// Seed the store with previously persisted entries.
    pub fn with_entries(
        name: &'static str,
        entries: impl IntoIterator<Item = ChainCacheEntry<K, V>>,
    ) -> Self {
        let cache = Self::new(name);
        for entry in entries {
            cache.entries.insert(entry.chain_id, entry);
        }
        cache
    }

    pub fn get(&self, chain_id: ChainId) -> Option<ChainCacheEntry<K, V>> {
        match self.entries.get(&chain_id) {
            Some(entry) => {
                metrics::increment_cache_hit(self.name);
                Some(entry.value().clone())
            }
            None => {
                metrics::increment_cache_miss(self.name);
                None
            }
        }
    }

    pub fn set(&self, chain_id: ChainId, entry: ChainCacheEntry<K, V>) {
        debug!(
            "{}: replacing entry for chain {} ({} items)",
            self.name,
            chain_id,
            entry.data.len()
        );
        self.entries.insert(chain_id, entry);
        metrics::set_cache_size(self.name, self.entries.len() as f64);
    }

    pub fn remove(&self, chain_id: ChainId) -> Option<ChainCacheEntry<K, V>> {
        let removed = self.entries.remove(&chain_id).map(|(_, entry)| entry);
        if removed.is_some() {
            debug!("{}: removed entry for chain {}", self.name, chain_id);
            metrics::set_cache_size(self.name, self.entries.len() as f64);
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
        metrics::set_cache_size(self.name, 0.0);
    }

    /// Entry exists and is not older than `threshold`.
    pub fn is_fresh(&self, chain_id: ChainId, threshold: Duration, now: UnixMillis) -> bool {
        self.entries
            .get(&chain_id)
            .map(|entry| !entry.is_stale(threshold, now))
            .unwrap_or(false)
    }

    pub fn contains(&self, chain_id: ChainId) -> bool {
        self.entries.contains_key(&chain_id)
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        let mut ids: Vec<ChainId> = self.entries.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Copy of every entry, ordered by chain id.
    pub fn snapshot(&self) -> BTreeMap<ChainId, ChainCacheEntry<K, V>> {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(chain_id: ChainId, timestamp: UnixMillis, items: &[(&str, u32)]) -> ChainCacheEntry<String, u32> {
        ChainCacheEntry::at(
            chain_id,
            timestamp,
            items.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        )
    }

    #[test]
    fn set_replaces_only_the_target_chain() {
        let cache = ChainCache::new("test");
        cache.set(ChainId::MAINNET, entry(ChainId::MAINNET, 1, &[("a", 1), ("b", 2)]));
        cache.set(ChainId::POLYGON, entry(ChainId::POLYGON, 1, &[("c", 3)]));

        cache.set(ChainId::MAINNET, entry(ChainId::MAINNET, 2, &[("z", 9)]));

        let mainnet = cache.get(ChainId::MAINNET).unwrap();
        assert_eq!(mainnet.data.len(), 1);
        assert_eq!(mainnet.data.get("z"), Some(&9));
        assert_eq!(cache.get(ChainId::POLYGON).unwrap(), entry(ChainId::POLYGON, 1, &[("c", 3)]));
    }

    #[test]
    fn huge_threshold_never_expires() {
        let old = entry(ChainId::MAINNET, 0, &[("a", 1)]);
        assert!(!old.is_stale(Duration::MAX, now_millis()));
        assert!(!old.is_stale(Duration::from_millis(u64::MAX), i64::MAX));
        assert!(old.is_stale(Duration::from_secs(1), 5_000));
    }

    #[test]
    fn remove_leaves_other_chains_untouched() {
        let cache = ChainCache::new("test");
        cache.set(ChainId::MAINNET, entry(ChainId::MAINNET, 1, &[("a", 1)]));
        cache.set(ChainId::BSC, entry(ChainId::BSC, 5, &[("b", 2)]));
        let before = cache.get(ChainId::BSC).unwrap();

        assert!(cache.remove(ChainId::MAINNET).is_some());
        assert!(cache.remove(ChainId::MAINNET).is_none());

        assert!(cache.get(ChainId::MAINNET).is_none());
        assert_eq!(cache.get(ChainId::BSC).unwrap(), before);
        assert_eq!(cache.chain_ids(), vec![ChainId::BSC]);
    }

    #[test]
    fn clear_empties_the_store() {
        let cache = ChainCache::new("test");
        cache.set(ChainId::MAINNET, entry(ChainId::MAINNET, 1, &[("a", 1)]));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.snapshot().is_empty());
    }

    #[test]
    fn freshness_follows_threshold() {
        let cache = ChainCache::new("test");
        cache.set(ChainId::MAINNET, entry(ChainId::MAINNET, 1_000, &[]));
        let threshold = Duration::from_millis(500);

        assert!(cache.is_fresh(ChainId::MAINNET, threshold, 1_400));
        assert!(cache.is_fresh(ChainId::MAINNET, threshold, 1_500));
        assert!(!cache.is_fresh(ChainId::MAINNET, threshold, 1_501));
        assert!(!cache.is_fresh(ChainId::POLYGON, threshold, 1_000));
    }

    #[test]
    fn seeded_entries_are_readable() {
        let cache = ChainCache::with_entries(
            "test",
            vec![entry(ChainId::MAINNET, 1, &[("a", 1)]), entry(ChainId::LINEA, 2, &[])],
        );
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(ChainId::LINEA));
        assert_eq!(
            cache.snapshot().keys().copied().collect::<Vec<_>>(),
            vec![ChainId::MAINNET, ChainId::LINEA]
        );
    }
}
