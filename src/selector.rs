//! Streaming top-k selection.
//!
//! Every search path ends here: a stream of `(id, distance)` candidates goes
//! in, the best `k` come out. Selection direction follows the metric
//! orientation (keep smallest for distances, largest for similarities), and
//! ties on the value always resolve to the smaller id so results are
//! deterministic regardless of candidate order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A candidate held in the heap. Ordered so that the *worst* kept candidate
/// sits at the top of the max-heap: larger sort key first, and on equal keys
/// the larger id (which loses ties) first.
#[derive(Debug, Clone, Copy)]
struct Entry {
    /// Distance mapped so that smaller is always better.
    key: f32,
    id: i64,
    dist: f32,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .total_cmp(&other.key)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Online selector keeping the best `k` of a candidate stream.
///
/// `O(log k)` per accepted candidate, `O(1)` per rejected one.
#[derive(Debug)]
pub struct TopK {
    k: usize,
    keep_max: bool,
    heap: BinaryHeap<Entry>,
}

impl TopK {
    /// Create a selector. `keep_max = false` keeps the smallest values
    /// (distance metrics), `true` keeps the largest (similarities).
    #[must_use]
    pub fn new(k: usize, keep_max: bool) -> Self {
        Self {
            k,
            keep_max,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    #[inline]
    fn key_of(&self, dist: f32) -> f32 {
        if self.keep_max {
            -dist
        } else {
            dist
        }
    }

    /// Offer a candidate.
    #[inline]
    pub fn push(&mut self, id: i64, dist: f32) {
        let entry = Entry {
            key: self.key_of(dist),
            id,
            dist,
        };
        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if let Some(top) = self.heap.peek() {
            if entry.cmp(top) == Ordering::Less {
                self.heap.pop();
                self.heap.push(entry);
            }
        }
    }

    /// Number of candidates currently kept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Extract the kept candidates best-first.
    #[must_use]
    pub fn into_sorted(self) -> Vec<(i64, f32)> {
        let mut entries = self.heap.into_vec();
        entries.sort_unstable();
        entries.into_iter().map(|e| (e.id, e.dist)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_k_smallest() {
        let mut sel = TopK::new(3, false);
        for (id, d) in [(0, 5.0), (1, 1.0), (2, 4.0), (3, 0.5), (4, 9.0)] {
            sel.push(id, d);
        }
        let out = sel.into_sorted();
        assert_eq!(out, vec![(3, 0.5), (1, 1.0), (2, 4.0)]);
    }

    #[test]
    fn keeps_k_largest_for_similarity() {
        let mut sel = TopK::new(2, true);
        for (id, d) in [(0, 0.1), (1, 0.9), (2, 0.5), (3, 0.95)] {
            sel.push(id, d);
        }
        let out = sel.into_sorted();
        assert_eq!(out, vec![(3, 0.95), (1, 0.9)]);
    }

    #[test]
    fn ties_resolve_to_smaller_id() {
        // Insert the tied larger id first so the tie-break has to do work.
        let mut sel = TopK::new(2, false);
        sel.push(7, 1.0);
        sel.push(3, 2.0);
        sel.push(2, 1.0);
        let out = sel.into_sorted();
        assert_eq!(out, vec![(2, 1.0), (7, 1.0)]);

        let mut sel = TopK::new(1, true);
        sel.push(9, 4.0);
        sel.push(1, 4.0);
        assert_eq!(sel.into_sorted(), vec![(1, 4.0)]);
    }

    #[test]
    fn short_streams_return_everything() {
        let mut sel = TopK::new(10, false);
        sel.push(0, 2.0);
        sel.push(1, 1.0);
        let out = sel.into_sorted();
        assert_eq!(out, vec![(1, 1.0), (0, 2.0)]);
    }

    #[test]
    fn result_is_order_invariant() {
        let cands: Vec<(i64, f32)> = (0..50).map(|i| (i, (i * 37 % 50) as f32)).collect();
        let mut forward = TopK::new(5, false);
        for &(id, d) in &cands {
            forward.push(id, d);
        }
        let mut backward = TopK::new(5, false);
        for &(id, d) in cands.iter().rev() {
            backward.push(id, d);
        }
        assert_eq!(forward.into_sorted(), backward.into_sorted());
    }
}
