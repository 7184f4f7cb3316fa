//! Reviewer selection.
//!
//! Selection is behind a trait so the engine can be exercised with a
//! deterministic selector in tests while production uses a uniform
//! random draw.

use rand::seq::SliceRandom;

use crate::model::UserId;

/// Chooses up to `count` distinct reviewers from a candidate pool.
///
/// Implementations must only return ids that appear in `pool`, without
/// duplicates, and must return `min(count, pool.len())` of them.
pub trait ReviewerSelector: Send + Sync {
    fn select(&self, pool: &[UserId], count: usize) -> Vec<UserId>;
}

/// Uniform random selection without replacement.
///
/// Shuffles a copy of the pool (Fisher-Yates via `SliceRandom::shuffle`)
/// and takes a prefix, so every subset of the requested size is equally
/// likely. The RNG is `thread_rng`: per-call local, seeded per process,
/// safe under concurrent use, and not required to be cryptographic.
pub struct RandomSelector;

impl ReviewerSelector for RandomSelector {
    fn select(&self, pool: &[UserId], count: usize) -> Vec<UserId> {
        let mut shuffled = pool.to_vec();
        shuffled.shuffle(&mut rand::thread_rng());
        shuffled.truncate(count);
        shuffled
    }
}

/// Deterministic selection: the first `count` candidates in pool order.
///
/// Exists so tests can assert exact selections.
pub struct FixedSelector;

impl ReviewerSelector for FixedSelector {
    fn select(&self, pool: &[UserId], count: usize) -> Vec<UserId> {
        pool.iter().take(count).cloned().collect()
    }
}
