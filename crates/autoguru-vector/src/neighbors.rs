use std::cmp::Ordering;
use std::collections::BinaryHeap;

use autoguru_core::types::Neighbor;
use autoguru_core::{Error, Metric, Result};
use autoguru_embed::VectorBatch;

/// Query contract shared by every backend.
///
/// Each query returns at most `k` neighbors (fewer when the corpus is
/// smaller), ordered by descending similarity.
pub trait NearestNeighbors: Send + Sync {
    fn backend(&self) -> &'static str;
    fn metric(&self) -> Metric;
    fn dim(&self) -> usize;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn query_batch(&self, queries: &VectorBatch, k: usize) -> Result<Vec<Vec<Neighbor>>>;

    /// Single vector, treated as a batch of one.
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if vector.len() != self.dim() {
            return Err(Error::DimensionMismatch { expected: self.dim(), actual: vector.len() });
        }
        let batch = VectorBatch::from_flat(vector.to_vec(), self.dim())?;
        Ok(self.query_batch(&batch, k)?.pop().unwrap_or_default())
    }

    /// Flat row-major input, reshaped to (len / dim, dim).
    fn query_flat(&self, data: &[f32], k: usize) -> Result<Vec<Vec<Neighbor>>> {
        let batch = VectorBatch::from_flat(data.to_vec(), self.dim())?;
        self.query_batch(&batch, k)
    }
}

pub(crate) fn check_query_dim(expected: usize, queries: &VectorBatch) -> Result<()> {
    if queries.dim() != expected {
        return Err(Error::DimensionMismatch { expected, actual: queries.dim() });
    }
    Ok(())
}

/// A scored corpus row. Ordered by distance, then position, so heaps and
/// sorts are deterministic.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub distance: f32,
    pub position: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.position.cmp(&other.position))
    }
}

/// Bounded max-heap holding the `k` closest candidates seen so far.
pub(crate) struct TopK {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self { k, heap: BinaryHeap::with_capacity(k + 1) }
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Distance of the current k-th candidate, or infinity until full.
    pub fn worst(&self) -> f32 {
        match self.heap.peek() {
            Some(c) if self.is_full() => c.distance,
            _ => f32::INFINITY,
        }
    }

    pub fn offer(&mut self, candidate: Candidate) -> bool {
        if self.k == 0 {
            return false;
        }
        if !self.is_full() {
            self.heap.push(candidate);
            return true;
        }
        match self.heap.peek() {
            Some(top) if candidate < *top => {
                self.heap.pop();
                self.heap.push(candidate);
                true
            }
            _ => false,
        }
    }

    pub fn into_sorted(self) -> Vec<Candidate> {
        self.heap.into_sorted_vec()
    }
}

/// Converts ascending raw distances into neighbors with metric similarity.
pub(crate) fn to_neighbors(metric: Metric, candidates: Vec<Candidate>) -> Vec<Neighbor> {
    let distances: Vec<f32> = candidates.iter().map(|c| c.distance).collect();
    metric
        .similarity(&distances)
        .into_iter()
        .zip(candidates)
        .map(|(similarity, c)| Neighbor { position: c.position, similarity })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_k_keeps_closest_with_position_tiebreak() {
        let mut top = TopK::new(2);
        for (distance, position) in [(0.5, 0), (0.1, 1), (0.5, 2), (0.3, 3), (0.3, 4)] {
            top.offer(Candidate { distance, position });
        }
        let kept: Vec<_> = top.into_sorted().iter().map(|c| c.position).collect();
        assert_eq!(kept, vec![1, 3]);
    }

    #[test]
    fn zero_k_keeps_nothing() {
        let mut top = TopK::new(0);
        assert!(!top.offer(Candidate { distance: 0.0, position: 0 }));
        assert!(top.into_sorted().is_empty());
    }
}
