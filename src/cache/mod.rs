//! In-memory unit cache
//!
//! A capacity-bounded, size-weighted store of [`CacheEntry`] values keyed by
//! canonical location:
//! - `get` only returns entries that are fresh, including every transitive
//!   dependency (see [`freshness`])
//! - `put` is the only place eviction runs; least recently used entries go first
//!   until the weighted total fits the configured capacity
//! - a global switch disables lookups and stores without discarding state

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

pub mod entry;
pub mod eviction;
pub mod freshness;

pub use entry::{CacheEntry, Payload, Stage, DEFAULT_MAX_AGE};
use eviction::{select_victims, EvictionCandidate, LruPolicy};

use crate::logging::{operations, status};

/// Default capacity in weighted units (roughly bytes)
pub const DEFAULT_MAX_SIZE: u64 = 64_000_000;

/// Weight charged for one entry against the store capacity
pub type Sizer = Arc<dyn Fn(&CacheEntry) -> u64 + Send + Sync>;

/// Entry size estimate plus the length of its key
pub fn default_sizer() -> Sizer {
    Arc::new(|entry: &CacheEntry| entry.size_estimate() + entry.location().as_os_str().len() as u64)
}

#[derive(Clone)]
pub struct CacheOptions {
    pub max_size: u64,
    pub sizer: Sizer,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            sizer: default_sizer(),
        }
    }
}

impl CacheOptions {
    pub fn with_max_size(max_size: u64) -> Self {
        Self {
            max_size,
            ..Default::default()
        }
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

/// Store statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub max_size: u64,
    pub enabled: bool,
}

struct Slot {
    entry: Arc<CacheEntry>,
    weight: u64,
    accessed_at: u64,
}

struct StoreState {
    slots: HashMap<PathBuf, Slot>,
    total_size: u64,
    clock: u64,
    options: CacheOptions,
}

impl StoreState {
    fn new(options: CacheOptions) -> Self {
        Self {
            slots: HashMap::new(),
            total_size: 0,
            clock: 0,
            options,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, location: &Path) -> Option<Slot> {
        let slot = self.slots.remove(location)?;
        self.total_size -= slot.weight;
        Some(slot)
    }

    /// Insert (or replace) an entry and evict until within capacity
    ///
    /// Returns `false` when the entry alone exceeds the capacity and was not stored.
    fn insert(&mut self, entry: Arc<CacheEntry>) -> bool {
        let location = entry.location().to_path_buf();
        let weight = (self.options.sizer)(&entry);
        self.remove(&location);

        if weight > self.options.max_size {
            return false;
        }

        let accessed_at = self.tick();
        self.total_size += weight;
        self.slots.insert(
            location.clone(),
            Slot {
                entry,
                weight,
                accessed_at,
            },
        );

        if self.total_size > self.options.max_size {
            let candidates = self
                .slots
                .iter()
                .filter(|(key, _)| **key != location)
                .map(|(key, slot)| EvictionCandidate {
                    location: key.clone(),
                    size: slot.weight,
                    accessed_at: slot.accessed_at,
                })
                .collect();
            let excess = self.total_size - self.options.max_size;

            for victim in select_victims(&LruPolicy, candidates, excess) {
                self.remove(&victim.location);
                debug!(
                    operation = operations::EVICT,
                    location = %victim.location.display(),
                    size = victim.size,
                    "evicted cache entry"
                );
            }
        }

        true
    }
}

pub struct CacheStore {
    enabled: AtomicBool,
    state: Mutex<StoreState>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

impl CacheStore {
    pub fn new(options: CacheOptions) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            state: Mutex::new(StoreState::new(options)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Stop serving and storing entries; existing state survives unless `clear`
    pub fn disable(&self, clear: bool) {
        self.enabled.store(false, Ordering::SeqCst);
        if clear {
            self.invalidate_all();
        }
    }

    /// Raw lookup: no freshness check and no recency update
    pub fn peek(&self, location: &Path) -> Option<Arc<CacheEntry>> {
        if !self.is_enabled() {
            return None;
        }
        self.lock()
            .slots
            .get(location)
            .map(|slot| Arc::clone(&slot.entry))
    }

    fn touch(&self, location: &Path) -> Option<Arc<CacheEntry>> {
        let mut state = self.lock();
        let accessed_at = state.tick();
        let slot = state.slots.get_mut(location)?;
        slot.accessed_at = accessed_at;
        Some(Arc::clone(&slot.entry))
    }

    /// Fresh entry for `location`, checking modification times with blocking I/O
    pub fn get(&self, location: &Path) -> Option<Arc<CacheEntry>> {
        if !self.is_enabled() {
            return None;
        }
        let Some(entry) = self.touch(location) else {
            debug!(operation = operations::GET, status = status::MISS, location = %location.display(), "cache miss");
            return None;
        };

        if freshness::is_fresh(self, &entry) {
            debug!(operation = operations::GET, status = status::HIT, location = %location.display(), "cache hit");
            Some(entry)
        } else {
            debug!(operation = operations::GET, status = status::STALE, location = %location.display(), "cache entry stale");
            None
        }
    }

    /// Fresh entry for `location`, checking modification times without blocking
    pub async fn get_async(&self, location: &Path) -> Option<Arc<CacheEntry>> {
        if !self.is_enabled() {
            return None;
        }
        let Some(entry) = self.touch(location) else {
            debug!(operation = operations::GET, status = status::MISS, location = %location.display(), "cache miss");
            return None;
        };

        if freshness::is_fresh_async(self, &entry).await {
            debug!(operation = operations::GET, status = status::HIT, location = %location.display(), "cache hit");
            Some(entry)
        } else {
            debug!(operation = operations::GET, status = status::STALE, location = %location.display(), "cache entry stale");
            None
        }
    }

    /// Store an entry under its location, replacing any previous one
    pub fn put(&self, entry: CacheEntry) {
        if !self.is_enabled() {
            return;
        }
        let location = entry.location().to_path_buf();
        let stage = entry.stage();
        let stored = self.lock().insert(Arc::new(entry));

        if stored {
            debug!(operation = operations::PUT, status = status::STORED, location = %location.display(), ?stage, "cache entry stored");
        } else {
            debug!(
                operation = operations::PUT,
                status = status::REJECTED,
                location = %location.display(),
                "cache entry larger than capacity, not stored"
            );
        }
    }

    /// Drop the entry for `location`; returns whether one was present
    pub fn invalidate(&self, location: &Path) -> bool {
        let removed = self.lock().remove(location).is_some();
        if removed {
            debug!(operation = operations::INVALIDATE, location = %location.display(), "cache entry invalidated");
        }
        removed
    }

    pub fn invalidate_all(&self) {
        let mut state = self.lock();
        let count = state.slots.len();
        state.slots.clear();
        state.total_size = 0;
        debug!(operation = operations::INVALIDATE, entries = count, "cache cleared");
    }

    /// Replace capacity and sizing; unless `clear`, entries that are still fresh
    /// on their own are migrated in recency order
    pub fn configure(&self, options: CacheOptions, clear: bool) {
        // One guard from snapshot to swap, so no concurrent put is lost
        let mut state = self.lock();
        let mut survivors: Vec<(u64, Arc<CacheEntry>)> = if clear {
            Vec::new()
        } else {
            state
                .slots
                .values()
                .filter(|slot| !slot.entry.is_stale())
                .map(|slot| (slot.accessed_at, Arc::clone(&slot.entry)))
                .collect()
        };
        survivors.sort_by_key(|(accessed_at, _)| *accessed_at);

        info!(
            max_size = options.max_size,
            migrated = survivors.len(),
            "cache reconfigured"
        );

        let mut next = StoreState::new(options);
        for (_, entry) in survivors {
            next.insert(entry);
        }
        *state = next;
    }

    /// All resident entries, ordered by location
    pub fn entries(&self) -> Vec<Arc<CacheEntry>> {
        let mut entries: Vec<_> = self
            .lock()
            .slots
            .values()
            .map(|slot| Arc::clone(&slot.entry))
            .collect();
        entries.sort_by(|a, b| a.location().cmp(b.location()));
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.slots.len(),
            total_size: state.total_size,
            max_size: state.options.max_size,
            enabled: self.is_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn executed(location: &str, deps: &[&str]) -> CacheEntry {
        let mut entry = CacheEntry::new(
            PathBuf::from(location),
            String::new(),
            None,
            Some(Duration::from_secs(3600)),
        );
        let deps: BTreeSet<PathBuf> = deps.iter().map(PathBuf::from).collect();
        entry.advance_to_executed(json!(location), deps);
        entry
    }

    fn unit_sizer() -> Sizer {
        Arc::new(|_: &CacheEntry| 10)
    }

    #[test]
    fn test_put_and_get() {
        let store = CacheStore::default();
        store.put(executed("/w/a.js", &[]));

        let entry = store.get(Path::new("/w/a.js")).unwrap();
        assert_eq!(entry.result(), Some(&json!("/w/a.js")));
        assert!(store.get(Path::new("/w/b.js")).is_none());
    }

    #[test]
    fn test_put_replaces_existing_entry() {
        let store = CacheStore::default();
        store.put(executed("/w/a.js", &["/w/old.js"]));
        store.put(executed("/w/a.js", &[]));

        assert_eq!(store.len(), 1);
        let entry = store.peek(Path::new("/w/a.js")).unwrap();
        assert!(entry.dependencies().is_empty());
    }

    #[test]
    fn test_eviction_removes_least_recently_used() {
        let store = CacheStore::new(CacheOptions {
            max_size: 30,
            sizer: unit_sizer(),
        });
        store.put(executed("/w/a.js", &[]));
        store.put(executed("/w/b.js", &[]));
        store.put(executed("/w/c.js", &[]));

        // Touch a so that b becomes the oldest
        assert!(store.get(Path::new("/w/a.js")).is_some());
        store.put(executed("/w/d.js", &[]));

        assert_eq!(store.len(), 3);
        assert!(store.peek(Path::new("/w/b.js")).is_none());
        assert!(store.peek(Path::new("/w/a.js")).is_some());
        assert_eq!(store.stats().total_size, 30);
    }

    #[test]
    fn test_oversized_entry_is_not_stored() {
        let store = CacheStore::new(CacheOptions::with_max_size(5));
        store.put(executed("/w/a.js", &[]));
        assert!(store.is_empty());
    }

    #[test]
    fn test_disabled_store_keeps_state() {
        let store = CacheStore::default();
        store.put(executed("/w/a.js", &[]));

        store.disable(false);
        assert!(store.get(Path::new("/w/a.js")).is_none());
        store.put(executed("/w/b.js", &[]));
        assert_eq!(store.len(), 1);

        store.enable();
        assert!(store.get(Path::new("/w/a.js")).is_some());

        store.disable(true);
        store.enable();
        assert!(store.is_empty());
    }

    #[test]
    fn test_invalidate() {
        let store = CacheStore::default();
        store.put(executed("/w/a.js", &[]));
        store.put(executed("/w/b.js", &[]));

        assert!(store.invalidate(Path::new("/w/a.js")));
        assert!(!store.invalidate(Path::new("/w/a.js")));
        assert_eq!(store.len(), 1);

        store.invalidate_all();
        assert!(store.is_empty());
        assert_eq!(store.stats().total_size, 0);
    }

    #[test]
    fn test_configure_migrates_fresh_entries() {
        let store = CacheStore::default();
        store.put(executed("/w/a.js", &[]));
        store.put(executed("/w/b.js", &[]));

        let mut expired = CacheEntry::new(
            PathBuf::from("/w/c.js"),
            String::new(),
            None,
            Some(Duration::ZERO),
        );
        expired.advance_to_executed(json!(null), BTreeSet::new());
        store.put(expired);

        store.configure(
            CacheOptions {
                max_size: 10,
                sizer: unit_sizer(),
            },
            false,
        );

        // Only one fits; the most recently used survivor wins
        let stats = store.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.max_size, 10);
        assert!(store.peek(Path::new("/w/b.js")).is_some());

        store.configure(CacheOptions::default(), true);
        assert!(store.is_empty());
    }

    #[test]
    fn test_get_rejects_entry_with_missing_dependency() {
        let store = CacheStore::default();
        store.put(executed("/w/a.js", &["/w/b.js"]));
        assert!(store.get(Path::new("/w/a.js")).is_none());

        store.put(executed("/w/b.js", &[]));
        assert!(store.get(Path::new("/w/a.js")).is_some());
    }

    #[test]
    fn test_configure_keeps_concurrent_puts() {
        let store = CacheStore::default();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..200 {
                    store.put(executed(&format!("/w/unit{}.js", i), &[]));
                }
            });
            for _ in 0..50 {
                store.configure(CacheOptions::default(), false);
            }
        });

        assert_eq!(store.len(), 200);
    }
}
