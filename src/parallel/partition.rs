//! Job-to-worker assignment.
//!
//! Static policies are pure functions of `(worker, workers, len)`, so every
//! worker (thread or rank) computes its own share without talking to anyone.
//! The dynamic policy hands out indices from one shared atomic counter.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Partitioning policy for the shared-memory variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Schedule {
    /// Worker `r` of `N` takes `r, r+N, r+2N, ...`
    #[default]
    Interleave,
    /// Worker `r` takes one contiguous slice
    Block,
    /// Workers claim the next unprocessed index from a shared counter
    Dynamic,
}

/// Indices owned by `worker` under static interleave
pub fn interleaved(worker: usize, workers: usize, len: usize) -> Vec<usize> {
    if workers == 0 || worker >= workers {
        return Vec::new();
    }
    (worker..len).step_by(workers).collect()
}

/// Contiguous index range owned by `worker` under static block partitioning.
///
/// Sizes differ by at most one.
pub fn block(worker: usize, workers: usize, len: usize) -> Range<usize> {
    if workers == 0 || worker >= workers {
        return 0..0;
    }
    (worker * len / workers)..((worker + 1) * len / workers)
}

/// Shared counter for dynamic claiming; every index is observed exactly once
#[derive(Debug)]
pub struct ClaimCounter {
    next: AtomicUsize,
    len: usize,
}

impl ClaimCounter {
    pub fn new(len: usize) -> Self {
        Self {
            next: AtomicUsize::new(0),
            len,
        }
    }

    /// Next unclaimed index, or `None` once the list is exhausted
    pub fn claim(&self) -> Option<usize> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        (index < self.len).then_some(index)
    }
}

/// The job indices one worker processes, in processing order
#[derive(Debug)]
pub enum Assignment<'a> {
    Indices(std::vec::IntoIter<usize>),
    Claim(&'a ClaimCounter),
}

impl<'a> Assignment<'a> {
    /// Every index in list order, for the single sequential worker
    pub fn all(len: usize) -> Self {
        Assignment::Indices((0..len).collect::<Vec<_>>().into_iter())
    }

    pub fn interleaved(worker: usize, workers: usize, len: usize) -> Self {
        Assignment::Indices(interleaved(worker, workers, len).into_iter())
    }

    pub fn block(worker: usize, workers: usize, len: usize) -> Self {
        Assignment::Indices(block(worker, workers, len).collect::<Vec<_>>().into_iter())
    }

    pub fn claim(counter: &'a ClaimCounter) -> Self {
        Assignment::Claim(counter)
    }
}

impl Iterator for Assignment<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        match self {
            Assignment::Indices(indices) => indices.next(),
            Assignment::Claim(counter) => counter.claim(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn assert_exact_cover(assignments: Vec<Vec<usize>>, len: usize) {
        let mut seen = vec![0usize; len];
        for indices in assignments {
            for index in indices {
                assert!(index < len, "index {index} out of range");
                seen[index] += 1;
            }
        }
        assert!(seen.iter().all(|&count| count == 1), "coverage {seen:?}");
    }

    #[test]
    fn test_interleave_covers_every_index_once() {
        for workers in 1..=8 {
            for len in [0, 1, 5, 7, 16, 23] {
                let assignments = (0..workers)
                    .map(|w| interleaved(w, workers, len))
                    .collect();
                assert_exact_cover(assignments, len);
            }
        }
    }

    #[test]
    fn test_block_covers_every_index_once() {
        for workers in 1..=8 {
            for len in [0, 1, 5, 7, 16, 23] {
                let assignments: Vec<Vec<usize>> =
                    (0..workers).map(|w| block(w, workers, len).collect()).collect();

                let sizes: Vec<usize> = assignments.iter().map(Vec::len).collect();
                let spread = sizes.iter().max().unwrap() - sizes.iter().min().unwrap();
                assert!(spread <= 1, "unbalanced blocks {sizes:?}");

                assert_exact_cover(assignments, len);
            }
        }
    }

    #[test]
    fn test_interleave_order() {
        assert_eq!(interleaved(1, 3, 10), vec![1, 4, 7]);
        assert_eq!(interleaved(0, 1, 3), vec![0, 1, 2]);
        assert!(interleaved(5, 3, 10).is_empty());
    }

    #[test]
    fn test_dynamic_claims_are_disjoint_across_threads() {
        for workers in 1..=8 {
            let len = 200;
            let counter = ClaimCounter::new(len);

            let assignments = crossbeam::thread::scope(|s| {
                let handles: Vec<_> = (0..workers)
                    .map(|_| s.spawn(|_| Assignment::claim(&counter).collect::<Vec<_>>()))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap())
                    .collect::<Vec<_>>()
            })
            .unwrap();

            assert_exact_cover(assignments, len);
        }
    }

    #[test]
    fn test_counter_stays_exhausted() {
        let counter = ClaimCounter::new(2);
        assert_eq!(counter.claim(), Some(0));
        assert_eq!(counter.claim(), Some(1));
        assert_eq!(counter.claim(), None);
        assert_eq!(counter.claim(), None);
    }

    #[test]
    fn test_sequential_assignment_is_list_order() {
        let indices: Vec<_> = Assignment::all(4).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);

        let unique: HashSet<_> = Assignment::block(2, 3, 9).collect();
        assert_eq!(unique, HashSet::from([6, 7, 8]));
    }
}
