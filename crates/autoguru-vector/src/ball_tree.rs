//! Exact ball-tree index.
//!
//! Rows are L2-normalised at build time, so Euclidean distance between unit
//! rows is a monotone function of cosine similarity (`|a - b|² = 2 - 2 cos θ`).
//! The tree prunes with Euclidean ball bounds mapped onto the metric; reported
//! distances come from the dot product. Rows that cannot be normalised (all
//! zero) have cosine 0 with everything and are scanned outside the tree.

use serde::{Deserialize, Serialize};

use autoguru_core::types::Neighbor;
use autoguru_core::{Error, Metric, Result};
use autoguru_embed::{dot, l2_normalized, VectorBatch};

use crate::neighbors::{check_query_dim, to_neighbors, Candidate, NearestNeighbors, TopK};

pub const DEFAULT_LEAF_SIZE: usize = 40;

/// Absorbs rounding between the Euclidean bound and dot-product distances.
const BOUND_SLACK: f32 = 1e-5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallTree {
    metric: Metric,
    leaf_size: usize,
    dim: usize,
    /// Normalised rows in build order; row `i` is corpus position `i`.
    data: Vec<f32>,
    /// Permutation of the unit-length positions; every node owns a contiguous
    /// range of it.
    order: Vec<usize>,
    /// Positions of rows without a direction.
    zero_rows: Vec<usize>,
    /// Post-order: children always precede their parent.
    nodes: Vec<Node>,
    root: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    start: usize,
    end: usize,
    centroid: Vec<f32>,
    radius: f32,
    children: Option<(usize, usize)>,
}

impl BallTree {
    pub const NAME: &'static str = "ball_tree";
    pub const SUPPORTED_METRICS: [Metric; 2] = [Metric::AngularDistance, Metric::Cosine];

    pub fn build(vectors: &VectorBatch, metric: Metric, leaf_size: usize) -> Result<Self> {
        if !Self::SUPPORTED_METRICS.contains(&metric) {
            return Err(Error::UnsupportedMetric { backend: Self::NAME, metric });
        }
        if leaf_size == 0 {
            return Err(Error::InvalidConfig("leaf_size must be at least 1".into()));
        }
        if vectors.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        let dim = vectors.dim();
        let mut data = Vec::with_capacity(vectors.as_flat().len());
        let (mut order, mut zero_rows) = (Vec::new(), Vec::new());
        for (position, row) in vectors.rows().enumerate() {
            let row = l2_normalized(row);
            if is_unit(&row) {
                order.push(position);
            } else {
                zero_rows.push(position);
            }
            data.extend(row);
        }
        let n = order.len();
        let mut tree = Self { metric, leaf_size, dim, data, order, zero_rows, nodes: Vec::new(), root: None };
        if n > 0 {
            tree.root = Some(tree.build_node(0, n));
        }
        tracing::debug!(
            rows = vectors.len(),
            zero_rows = tree.zero_rows.len(),
            dim,
            leaf_size,
            nodes = tree.nodes.len(),
            "ball tree built"
        );
        Ok(tree)
    }

    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    fn row(&self, position: usize) -> &[f32] {
        &self.data[position * self.dim..(position + 1) * self.dim]
    }

    fn build_node(&mut self, start: usize, end: usize) -> usize {
        let centroid = self.centroid(start, end);
        let radius = self.order[start..end]
            .iter()
            .map(|&p| euclidean(self.row(p), &centroid))
            .fold(0.0f32, f32::max);

        let children = if end - start <= self.leaf_size {
            None
        } else {
            let axis = self.widest_axis(start, end);
            let mid = start + (end - start) / 2;
            let dim = self.dim;
            let data = &self.data;
            self.order[start..end].select_nth_unstable_by(mid - start, |&a, &b| {
                data[a * dim + axis]
                    .total_cmp(&data[b * dim + axis])
                    .then(a.cmp(&b))
            });
            let left = self.build_node(start, mid);
            let right = self.build_node(mid, end);
            Some((left, right))
        };

        self.nodes.push(Node { start, end, centroid, radius, children });
        self.nodes.len() - 1
    }

    fn centroid(&self, start: usize, end: usize) -> Vec<f32> {
        let mut c = vec![0f32; self.dim];
        for &p in &self.order[start..end] {
            for (acc, x) in c.iter_mut().zip(self.row(p)) {
                *acc += x;
            }
        }
        let count = (end - start) as f32;
        for x in &mut c {
            *x /= count;
        }
        c
    }

    fn widest_axis(&self, start: usize, end: usize) -> usize {
        let mut lo = vec![f32::INFINITY; self.dim];
        let mut hi = vec![f32::NEG_INFINITY; self.dim];
        for &p in &self.order[start..end] {
            for (d, &x) in self.row(p).iter().enumerate() {
                lo[d] = lo[d].min(x);
                hi[d] = hi[d].max(x);
            }
        }
        (0..self.dim)
            .max_by(|&a, &b| (hi[a] - lo[a]).total_cmp(&(hi[b] - lo[b])).then(b.cmp(&a)))
            .unwrap_or(0)
    }

    fn candidate(&self, query: &[f32], position: usize) -> Candidate {
        Candidate { distance: self.metric.distance_from_cosine(dot(query, self.row(position))), position }
    }

    /// `query` must be unit length.
    fn search(&self, node: usize, query: &[f32], top: &mut TopK) {
        let n = &self.nodes[node];
        let nearest = (euclidean(query, &n.centroid) - n.radius - BOUND_SLACK).max(0.0);
        let bound = self.metric.distance_from_cosine(1.0 - nearest * nearest / 2.0);
        if bound > top.worst() {
            return;
        }
        match n.children {
            None => {
                for &p in &self.order[n.start..n.end] {
                    top.offer(self.candidate(query, p));
                }
            }
            Some((left, right)) => {
                let dl = euclidean(query, &self.nodes[left].centroid);
                let dr = euclidean(query, &self.nodes[right].centroid);
                let (first, second) = if dl <= dr { (left, right) } else { (right, left) };
                self.search(first, query, top);
                self.search(second, query, top);
            }
        }
    }

    fn query_one(&self, query: &[f32], k: usize) -> Vec<Candidate> {
        let query = l2_normalized(query);
        let mut top = TopK::new(k.min(self.len()));
        if is_unit(&query) {
            if let Some(root) = self.root {
                self.search(root, &query, &mut top);
            }
            for &p in &self.zero_rows {
                top.offer(self.candidate(&query, p));
            }
        } else {
            // No direction: every row scores cosine 0, ties go by position.
            for p in 0..self.len() {
                top.offer(self.candidate(&query, p));
            }
        }
        top.into_sorted()
    }

    /// Structural checks used after restoring from a blob.
    pub(crate) fn validate(&self) -> Result<()> {
        let corrupt = |what: &str| Err(Error::CorruptIndex(format!("ball tree: {what}")));
        if self.dim == 0 || self.data.is_empty() || self.data.len() % self.dim != 0 {
            return corrupt("row data does not match dimension");
        }
        let n = self.len();
        let mut seen = vec![false; n];
        for &p in self.order.iter().chain(&self.zero_rows) {
            if p >= n || std::mem::replace(&mut seen[p], true) {
                return corrupt("positions are not a permutation");
            }
        }
        if seen.contains(&false) {
            return corrupt("positions are not a permutation");
        }
        match self.root {
            None if self.order.is_empty() && self.nodes.is_empty() => return Ok(()),
            Some(root) if root + 1 == self.nodes.len() => {
                let node = &self.nodes[root];
                if node.start != 0 || node.end != self.order.len() {
                    return corrupt("root does not cover every row");
                }
            }
            _ => return corrupt("root out of range"),
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if node.start >= node.end || node.end > self.order.len() || node.centroid.len() != self.dim {
                return corrupt("node range out of bounds");
            }
            if let Some((l, r)) = node.children {
                if l >= i || r >= i {
                    return corrupt("child does not precede its parent");
                }
                let (left, right) = (&self.nodes[l], &self.nodes[r]);
                if left.start != node.start || left.end != right.start || right.end != node.end {
                    return corrupt("children do not split their parent");
                }
            }
        }
        Ok(())
    }
}

impl NearestNeighbors for BallTree {
    fn backend(&self) -> &'static str {
        Self::NAME
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    fn query_batch(&self, queries: &VectorBatch, k: usize) -> Result<Vec<Vec<Neighbor>>> {
        check_query_dim(self.dim, queries)?;
        Ok(queries
            .rows()
            .map(|q| to_neighbors(self.metric, self.query_one(q, k)))
            .collect())
    }
}

/// Normalised rows are either unit length or left at zero.
fn is_unit(row: &[f32]) -> bool {
    dot(row, row) > 0.5
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
