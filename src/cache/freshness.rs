/// Dependency-aware freshness validation
///
/// An entry is fresh when it is not stale on its own and every location in its
/// dependency set is present in the store and (recursively) fresh. Locations that
/// are already being checked further up the recursion count as fresh, which is
/// what terminates the walk on circular dependency graphs.
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use super::{CacheEntry, CacheStore};

#[derive(Default)]
struct Walk {
    /// Locations on the current recursion path
    in_progress: HashSet<PathBuf>,
    /// Completed verdicts, so shared dependencies are checked once
    settled: HashMap<PathBuf, bool>,
}

/// Blocking validation
pub fn is_fresh(store: &CacheStore, entry: &CacheEntry) -> bool {
    check(store, entry, &mut Walk::default())
}

fn check(store: &CacheStore, entry: &CacheEntry, walk: &mut Walk) -> bool {
    if entry.is_stale() {
        return false;
    }

    walk.in_progress.insert(entry.location().to_path_buf());
    let mut fresh = true;
    for dependency in entry.dependencies() {
        if !check_dependency(store, dependency, walk) {
            fresh = false;
            break;
        }
    }
    walk.in_progress.remove(entry.location());
    walk.settled.insert(entry.location().to_path_buf(), fresh);
    fresh
}

fn check_dependency(store: &CacheStore, dependency: &Path, walk: &mut Walk) -> bool {
    if walk.in_progress.contains(dependency) {
        return true;
    }
    if let Some(verdict) = walk.settled.get(dependency) {
        return *verdict;
    }
    match store.peek(dependency) {
        Some(entry) => check(store, &entry, walk),
        None => false,
    }
}

/// Non-blocking validation; same policy as [`is_fresh`]
pub async fn is_fresh_async(store: &CacheStore, entry: &CacheEntry) -> bool {
    let mut walk = Walk::default();
    check_async(store, entry, &mut walk).await
}

fn check_async<'a>(
    store: &'a CacheStore,
    entry: &'a CacheEntry,
    walk: &'a mut Walk,
) -> Pin<Box<dyn Future<Output = bool> + 'a>> {
    Box::pin(async move {
        if entry.is_stale_async().await {
            return false;
        }

        walk.in_progress.insert(entry.location().to_path_buf());
        let mut fresh = true;
        for dependency in entry.dependencies() {
            let verdict = if walk.in_progress.contains(dependency) {
                true
            } else if let Some(verdict) = walk.settled.get(dependency) {
                *verdict
            } else {
                match store.peek(dependency) {
                    Some(dep_entry) => check_async(store, &dep_entry, walk).await,
                    None => false,
                }
            };
            if !verdict {
                fresh = false;
                break;
            }
        }
        walk.in_progress.remove(entry.location());
        walk.settled.insert(entry.location().to_path_buf(), fresh);
        fresh
    })
}
