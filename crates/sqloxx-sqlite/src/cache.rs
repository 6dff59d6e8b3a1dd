//! Reuse of prepared statements across executions.
//!
//! The cache maps statement text to a shared prepared statement. When it is
//! full, the least-recently-used entry that is not currently checked out is
//! evicted. A capacity of zero disables caching; callers then prepare a new
//! statement every time, which is slower but otherwise indistinguishable.

use std::collections::HashMap;
use std::rc::Rc;

/// Anything the cache can hold: it only needs to know whether an entry is
/// checked out, since checked-out entries are never evicted.
pub trait CacheSlot {
    fn is_locked(&self) -> bool;
}

#[derive(Debug)]
struct CacheEntry<S> {
    statement: Rc<S>,
    /// Value of the cache clock at the last access.
    last_used: u64,
    hit_count: u64,
}

/// Bounded LRU cache of prepared statements keyed by their SQL text.
///
/// Recency is tracked with a logical clock rather than wall time, so the
/// eviction order is fully determined by the access sequence.
#[derive(Debug)]
pub struct StatementCache<S> {
    cache: HashMap<String, CacheEntry<S>>,
    capacity: usize,
    clock: u64,
}

impl<S: CacheSlot> StatementCache<S> {
    /// Create a new cache with the given maximum number of entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: HashMap::with_capacity(capacity.min(256)),
            capacity,
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Look up a statement, marking it as most recently used.
    ///
    /// The returned statement may be locked; the caller decides what to do then.
    pub fn get(&mut self, sql: &str) -> Option<Rc<S>> {
        let now = self.tick();
        let entry = self.cache.get_mut(sql)?;
        entry.last_used = now;
        entry.hit_count += 1;
        tracing::trace!(sql = sql, hits = entry.hit_count, "statement cache hit");
        Some(Rc::clone(&entry.statement))
    }

    /// Insert a freshly prepared statement.
    ///
    /// Returns `false` when the statement was not retained: caching is
    /// disabled, the text is already cached, or every entry is checked out.
    pub fn insert(&mut self, sql: &str, statement: Rc<S>) -> bool {
        if self.capacity == 0 || self.cache.contains_key(sql) {
            return false;
        }
        if self.cache.len() >= self.capacity && !self.evict_lru() {
            tracing::trace!(sql = sql, "statement cache full of checked-out entries");
            return false;
        }
        let now = self.tick();
        self.cache.insert(
            sql.to_string(),
            CacheEntry {
                statement,
                last_used: now,
                hit_count: 0,
            },
        );
        true
    }

    /// Check if a statement is cached.
    pub fn contains(&self, sql: &str) -> bool {
        self.cache.contains_key(sql)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of reuses recorded for the given text.
    pub fn hit_count(&self, sql: &str) -> Option<u64> {
        self.cache.get(sql).map(|entry| entry.hit_count)
    }

    /// Clear all cached statements. Checked-out statements stay alive
    /// until their wrapper releases them.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Evict the least-recently-used entry that is not checked out.
    fn evict_lru(&mut self) -> bool {
        let victim = self
            .cache
            .iter()
            .filter(|(_, entry)| !entry.statement.is_locked())
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(sql, _)| sql.clone());
        match victim {
            Some(sql) => {
                tracing::trace!(sql = %sql, "evicting cached statement");
                self.cache.remove(&sql);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct Slot {
        locked: Cell<bool>,
    }

    impl CacheSlot for Slot {
        fn is_locked(&self) -> bool {
            self.locked.get()
        }
    }

    fn slot() -> Rc<Slot> {
        Rc::new(Slot::default())
    }

    #[test]
    fn test_cache_hit() {
        let mut cache = StatementCache::new(10);
        let first = slot();
        assert!(cache.insert("select 1", Rc::clone(&first)));
        let again = cache.get("select 1").unwrap();
        assert!(Rc::ptr_eq(&first, &again));
        assert_eq!(cache.hit_count("select 1"), Some(1));
        assert!(cache.get("select 2").is_none());
    }

    #[test]
    fn test_eviction() {
        let mut cache = StatementCache::new(2);
        cache.insert("select 1", slot());
        cache.insert("select 2", slot());
        // This should evict "select 1" (LRU)
        cache.insert("select 3", slot());

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("select 1"));
        assert!(cache.contains("select 2"));
        assert!(cache.contains("select 3"));
    }

    #[test]
    fn test_lru_ordering() {
        let mut cache = StatementCache::new(2);
        cache.insert("select 1", slot());
        cache.insert("select 2", slot());

        // Access "select 1" to make it recently used
        cache.get("select 1");

        cache.insert("select 3", slot());
        assert!(cache.contains("select 1"));
        assert!(!cache.contains("select 2"));
        assert!(cache.contains("select 3"));
    }

    #[test]
    fn test_locked_entries_survive_eviction() {
        let mut cache = StatementCache::new(2);
        let busy = slot();
        busy.locked.set(true);
        cache.insert("select 1", Rc::clone(&busy));
        cache.insert("select 2", slot());

        cache.insert("select 3", slot());
        assert!(cache.contains("select 1"));
        assert!(!cache.contains("select 2"));

        // Everything checked out: the newcomer is simply not retained.
        cache.get("select 3").unwrap().locked.set(true);
        assert!(!cache.insert("select 4", slot()));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_caches_nothing() {
        let mut cache = StatementCache::new(0);
        assert!(!cache.insert("select 1", slot()));
        assert!(cache.is_empty());
        assert!(cache.get("select 1").is_none());
    }
}
