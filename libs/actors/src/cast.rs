//! Candidate Pools for Randomcast and Fuzzycast
//!
//! Pure selection logic; the router supplies the names and does the delivery.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeSet;
use types::{Notification, SYSTEM_PREFIX};

/// Where broadcast-like sends look for recipients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// Entities of this platform only
    #[default]
    Local,
    /// Also entities (or platforms) reachable over the network
    Global,
}

/// Inclusion or exclusion list applied to a candidate pool
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CandidateFilter {
    #[default]
    All,
    /// Only these names are candidates
    Include(Vec<String>),
    /// These names are never candidates
    Exclude(Vec<String>),
}

impl CandidateFilter {
    fn admits(&self, name: &str) -> bool {
        match self {
            CandidateFilter::All => true,
            CandidateFilter::Include(names) => names.iter().any(|n| n == name),
            CandidateFilter::Exclude(names) => !names.iter().any(|n| n == name),
        }
    }
}

/// Sorted, de-duplicated candidates drawn from `local` and `remote`
///
/// The sender and platform entities are never candidates.
pub fn candidate_pool<'a>(
    local: impl IntoIterator<Item = &'a String>,
    remote: impl IntoIterator<Item = &'a String>,
    sender: &str,
    filter: &CandidateFilter,
) -> Vec<String> {
    local
        .into_iter()
        .chain(remote)
        .filter(|name| name.as_str() != sender && !name.starts_with(SYSTEM_PREFIX))
        .filter(|name| filter.admits(name))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Outcome of drawing `n` recipients from a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Pool smaller than requested; nothing is delivered
    Insufficient { requested: usize, available: usize },
    Chosen(Vec<String>),
}

impl Selection {
    pub fn into_notification(self) -> Option<Notification> {
        match self {
            Selection::Insufficient { requested, available } => {
                Some(Notification::insufficient_candidates(requested, available))
            }
            Selection::Chosen(_) => None,
        }
    }
}

/// Draw `n` distinct names uniformly without replacement
///
/// A pool of exactly `n` is returned whole without touching the RNG.
pub fn pick<R: Rng + ?Sized>(pool: Vec<String>, n: usize, rng: &mut R) -> Selection {
    let available = pool.len();
    if available < n {
        return Selection::Insufficient { requested: n, available };
    }
    if available == n {
        return Selection::Chosen(pool);
    }
    Selection::Chosen(pool.choose_multiple(rng, n).cloned().collect())
}

/// Recipient count for a fuzzycast quota; `None` when the quota is invalid
pub fn fuzzy_count(pool_size: usize, quota: f64) -> Option<usize> {
    if !(0.0..=1.0).contains(&quota) {
        return None;
    }
    Some((pool_size as f64 * quota).round() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pool_excludes_sender_and_system_entities() {
        let local = names(&["alice", "bob", "$generic"]);
        let remote = names(&["bob", "dave"]);

        let pool = candidate_pool(&local, &remote, "alice", &CandidateFilter::All);
        assert_eq!(pool, names(&["bob", "dave"]));
    }

    #[test]
    fn test_pool_filters() {
        let local = names(&["alice", "bob", "carol", "dave"]);

        let include = CandidateFilter::Include(names(&["bob", "carol", "zed"]));
        assert_eq!(candidate_pool(&local, &[], "alice", &include), names(&["bob", "carol"]));

        let exclude = CandidateFilter::Exclude(names(&["bob"]));
        assert_eq!(candidate_pool(&local, &[], "alice", &exclude), names(&["carol", "dave"]));
    }

    #[test]
    fn test_exact_pool_is_returned_whole() {
        let mut rng = StdRng::seed_from_u64(7);
        let pool = names(&["bob", "carol"]);
        assert_eq!(pick(pool.clone(), 2, &mut rng), Selection::Chosen(pool));
    }

    #[test]
    fn test_insufficient_pool() {
        let mut rng = StdRng::seed_from_u64(7);
        let selection = pick(names(&["bob"]), 3, &mut rng);
        assert_eq!(selection, Selection::Insufficient { requested: 3, available: 1 });

        let notification = selection.into_notification().unwrap();
        assert_eq!(notification.requested, Some(3));
        assert_eq!(notification.available, Some(1));
    }

    #[test]
    fn test_fuzzy_count_boundaries() {
        assert_eq!(fuzzy_count(10, -0.1), None);
        assert_eq!(fuzzy_count(10, 1.1), None);
        assert_eq!(fuzzy_count(10, f64::NAN), None);
        assert_eq!(fuzzy_count(10, 0.0), Some(0));
        assert_eq!(fuzzy_count(10, 1.0), Some(10));
        assert_eq!(fuzzy_count(5, 0.5), Some(3));
        assert_eq!(fuzzy_count(0, 0.5), Some(0));
    }

    proptest! {
        #[test]
        fn prop_pick_draws_distinct_members(
            size in 0usize..40,
            n in 0usize..50,
            seed in any::<u64>(),
        ) {
            let pool: Vec<String> = (0..size).map(|i| format!("e{:02}", i)).collect();
            let mut rng = StdRng::seed_from_u64(seed);

            match pick(pool.clone(), n, &mut rng) {
                Selection::Insufficient { requested, available } => {
                    prop_assert!(n > size);
                    prop_assert_eq!(requested, n);
                    prop_assert_eq!(available, size);
                }
                Selection::Chosen(chosen) => {
                    prop_assert!(n <= size);
                    prop_assert_eq!(chosen.len(), n);
                    let unique: BTreeSet<_> = chosen.iter().collect();
                    prop_assert_eq!(unique.len(), n);
                    prop_assert!(chosen.iter().all(|c| pool.contains(c)));
                }
            }
        }

        #[test]
        fn prop_pool_never_contains_sender(
            local in proptest::collection::vec("[a-d]{1,2}", 0..12),
            sender in "[a-d]{1,2}",
        ) {
            let pool = candidate_pool(&local, &[], &sender, &CandidateFilter::All);
            prop_assert!(!pool.contains(&sender));
            let mut sorted = pool.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(pool, sorted);
        }
    }
}
