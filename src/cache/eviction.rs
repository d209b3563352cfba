//! Eviction policy for the in-memory store
//!
//! The store hands every resident entry to the policy as an [`EvictionCandidate`];
//! the policy orders them and victims are taken from the front until enough
//! weight has been freed.

use std::path::PathBuf;

/// Candidate for eviction with the metadata a policy needs
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub location: PathBuf,
    /// Weighted size as charged by the store's sizing function
    pub size: u64,
    /// Logical access clock value of the last get/put
    pub accessed_at: u64,
}

/// Orders candidates by eviction priority (first = evicted first)
pub trait EvictionPolicy: Send + Sync {
    fn sort_candidates(&self, candidates: &mut [EvictionCandidate]);
}

/// Least recently used first
#[derive(Debug, Default)]
pub struct LruPolicy;

impl EvictionPolicy for LruPolicy {
    fn sort_candidates(&self, candidates: &mut [EvictionCandidate]) {
        candidates.sort_by(|a, b| a.accessed_at.cmp(&b.accessed_at));
    }
}

/// Pick victims until at least `bytes_to_evict` weight is freed
pub fn select_victims(
    policy: &dyn EvictionPolicy,
    mut candidates: Vec<EvictionCandidate>,
    bytes_to_evict: u64,
) -> Vec<EvictionCandidate> {
    policy.sort_candidates(&mut candidates);

    let mut freed = 0u64;
    candidates
        .into_iter()
        .take_while(|candidate| {
            if freed >= bytes_to_evict {
                return false;
            }
            freed += candidate.size;
            true
        })
        .collect()
}
