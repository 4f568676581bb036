//! Approximate index over a nearest-neighbor graph built by NN-descent.
//!
//! Construction runs NN-descent from a seeded random graph. [`Descent::prepare`]
//! then diversifies the graph (drops occluded edges), makes it undirected and
//! caps the degree; only a prepared index answers queries. Queries walk the
//! search graph best-first, exploring candidates within `(1 + epsilon)` of the
//! current k-th distance.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use autoguru_core::types::Neighbor;
use autoguru_core::{Error, Metric, Result};
use autoguru_embed::{dot, l2_normalized, VectorBatch};

use crate::neighbors::{check_query_dim, to_neighbors, Candidate, NearestNeighbors, TopK};

/// Early termination threshold: stop once an iteration changes fewer than
/// `DELTA * k * n` graph entries.
const DELTA: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DescentParams {
    /// Degree of the k-NN graph.
    pub neighbors: usize,
    /// Probability of dropping an occluded edge while diversifying.
    pub diversify_probability: f32,
    /// Search graph degree cap, as a multiple of `neighbors`.
    pub pruning_degree_multiplier: f32,
    /// Query-time search slack.
    pub epsilon: f32,
    /// NN-descent rounds; defaults to `max(5, round(log2 n))`.
    pub max_iterations: Option<usize>,
    pub seed: u64,
}

impl Default for DescentParams {
    fn default() -> Self {
        Self {
            neighbors: 30,
            diversify_probability: 1.0,
            pruning_degree_multiplier: 1.5,
            epsilon: 0.1,
            max_iterations: None,
            seed: 42,
        }
    }
}

impl DescentParams {
    pub fn validate(&self) -> Result<()> {
        if self.neighbors == 0 {
            return Err(Error::InvalidConfig("neighbors must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.diversify_probability) {
            return Err(Error::InvalidConfig("diversify_probability must be within [0, 1]".into()));
        }
        if self.pruning_degree_multiplier.is_nan() || self.pruning_degree_multiplier <= 0.0 {
            return Err(Error::InvalidConfig("pruning_degree_multiplier must be positive".into()));
        }
        if self.epsilon.is_nan() || self.epsilon < 0.0 {
            return Err(Error::InvalidConfig("epsilon must be non-negative".into()));
        }
        Ok(())
    }

    fn max_degree(&self) -> usize {
        ((self.neighbors as f32 * self.pruning_degree_multiplier).round() as usize).max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descent {
    metric: Metric,
    params: DescentParams,
    dim: usize,
    data: Vec<f32>,
    /// k-NN lists from NN-descent, closest first.
    graph: Vec<Vec<usize>>,
    search_graph: Option<SearchGraph>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SearchGraph {
    adjacency: Vec<Vec<usize>>,
    entry_points: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    candidate: Candidate,
    fresh: bool,
}

impl Descent {
    pub const NAME: &'static str = "descent";
    pub const SUPPORTED_METRICS: [Metric; 1] = [Metric::Cosine];

    /// Builds the neighbor graph. The result must be [`prepare`](Self::prepare)d
    /// before it answers queries.
    pub fn build(vectors: &VectorBatch, metric: Metric, params: DescentParams) -> Result<Self> {
        if !Self::SUPPORTED_METRICS.contains(&metric) {
            return Err(Error::UnsupportedMetric { backend: Self::NAME, metric });
        }
        params.validate()?;
        if vectors.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        let dim = vectors.dim();
        let mut data = Vec::with_capacity(vectors.as_flat().len());
        for row in vectors.rows() {
            data.extend(l2_normalized(row));
        }
        let mut index = Self { metric, params, dim, data, graph: Vec::new(), search_graph: None };
        index.graph = index.descend();
        Ok(index)
    }

    pub fn params(&self) -> &DescentParams {
        &self.params
    }

    pub fn is_prepared(&self) -> bool {
        self.search_graph.is_some()
    }

    /// Finalises the search graph. Idempotent.
    pub fn prepare(&mut self) {
        if self.is_prepared() {
            return;
        }
        let n = self.len();
        let mut rng = StdRng::seed_from_u64(self.params.seed.wrapping_add(1));

        let mut adjacency: Vec<Vec<usize>> = (0..n).map(|i| self.diversify(i, &mut rng)).collect();
        let forward = adjacency.clone();
        for (i, edges) in forward.iter().enumerate() {
            for &j in edges {
                if !adjacency[j].contains(&i) {
                    adjacency[j].push(i);
                }
            }
        }
        let max_degree = self.params.max_degree();
        for (i, edges) in adjacency.iter_mut().enumerate() {
            edges.sort_by(|&a, &b| self.candidate(i, a).cmp(&self.candidate(i, b)));
            edges.truncate(max_degree);
        }

        let entry_count = self.params.neighbors.min(n);
        let mut entry_points = sample(&mut rng, n, entry_count).into_vec();
        entry_points.sort_unstable();

        let edges: usize = adjacency.iter().map(Vec::len).sum();
        tracing::debug!(rows = n, edges, max_degree, entry_points = entry_points.len(), "descent index prepared");
        self.search_graph = Some(SearchGraph { adjacency, entry_points });
    }

    /// Queries with an explicit epsilon instead of the one fixed at build time.
    pub fn query_with_epsilon(&self, queries: &VectorBatch, k: usize, epsilon: f32) -> Result<Vec<Vec<Neighbor>>> {
        let graph = self.search_graph.as_ref().ok_or(Error::IndexNotReady)?;
        check_query_dim(self.dim, queries)?;
        Ok(queries
            .rows()
            .map(|q| {
                let q = l2_normalized(q);
                to_neighbors(self.metric, self.search(graph, &q, k.min(self.len()), epsilon))
            })
            .collect())
    }

    fn row(&self, position: usize) -> &[f32] {
        &self.data[position * self.dim..(position + 1) * self.dim]
    }

    fn distance_to(&self, query: &[f32], position: usize) -> f32 {
        self.metric.distance_from_cosine(dot(query, self.row(position)))
    }

    fn candidate(&self, from: usize, to: usize) -> Candidate {
        Candidate { distance: self.distance_to(self.row(from), to), position: to }
    }

    fn descend(&self) -> Vec<Vec<usize>> {
        let n = self.len();
        let k = self.params.neighbors.min(n - 1);
        if k == 0 {
            return vec![Vec::new(); n];
        }
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut lists: Vec<Vec<Entry>> = (0..n)
            .map(|i| {
                let mut list: Vec<Entry> = sample(&mut rng, n, k + 1)
                    .into_iter()
                    .filter(|&j| j != i)
                    .take(k)
                    .map(|j| Entry { candidate: self.candidate(i, j), fresh: true })
                    .collect();
                list.sort_by(|a, b| a.candidate.cmp(&b.candidate));
                list
            })
            .collect();

        let log2 = (n as f32).log2().round() as usize;
        let iterations = self.params.max_iterations.unwrap_or_else(|| log2.max(5));
        for iteration in 0..iterations {
            let (fresh, stale) = Self::split_candidates(&mut lists, k);
            let mut updates = 0usize;
            for i in 0..n {
                for (a_idx, &a) in fresh[i].iter().enumerate() {
                    for &b in &fresh[i][a_idx + 1..] {
                        updates += self.join(&mut lists, a, b, k);
                    }
                    for &b in &stale[i] {
                        if a != b {
                            updates += self.join(&mut lists, a, b, k);
                        }
                    }
                }
            }
            tracing::trace!(iteration, updates, "nn-descent round");
            if (updates as f32) <= DELTA * (k * n) as f32 {
                break;
            }
        }

        lists
            .into_iter()
            .map(|list| list.into_iter().map(|e| e.candidate.position).collect())
            .collect()
    }

    /// Collects forward and reverse candidates per node, split by whether the
    /// edge was added since the last round, and clears the fresh flags.
    fn split_candidates(lists: &mut [Vec<Entry>], k: usize) -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
        let n = lists.len();
        let mut fresh = vec![Vec::new(); n];
        let mut stale = vec![Vec::new(); n];
        for (i, list) in lists.iter_mut().enumerate() {
            for entry in list.iter_mut() {
                let j = entry.candidate.position;
                if entry.fresh {
                    fresh[i].push(j);
                    entry.fresh = false;
                } else {
                    stale[i].push(j);
                }
            }
        }
        let (mut fresh_rev, mut stale_rev) = (vec![Vec::new(); n], vec![Vec::new(); n]);
        for i in 0..n {
            for &j in &fresh[i] {
                if fresh_rev[j].len() < k {
                    fresh_rev[j].push(i);
                }
            }
            for &j in &stale[i] {
                if stale_rev[j].len() < k {
                    stale_rev[j].push(i);
                }
            }
        }
        for i in 0..n {
            merge_unique(&mut fresh[i], &fresh_rev[i]);
            merge_unique(&mut stale[i], &stale_rev[i]);
        }
        (fresh, stale)
    }

    fn join(&self, lists: &mut [Vec<Entry>], a: usize, b: usize, k: usize) -> usize {
        let d = self.distance_to(self.row(a), b);
        usize::from(insert(&mut lists[a], Candidate { distance: d, position: b }, k))
            + usize::from(insert(&mut lists[b], Candidate { distance: d, position: a }, k))
    }

    /// Keeps a neighbor only if no closer kept neighbor occludes it; occluded
    /// ones survive with probability `1 - diversify_probability`.
    fn diversify(&self, i: usize, rng: &mut StdRng) -> Vec<usize> {
        let mut kept: Vec<usize> = Vec::new();
        for &c in &self.graph[i] {
            let d_ic = self.distance_to(self.row(i), c);
            let occluded = kept.iter().any(|&r| self.distance_to(self.row(r), c) < d_ic);
            if occluded && rng.gen::<f32>() < self.params.diversify_probability {
                continue;
            }
            kept.push(c);
        }
        kept
    }

    fn search(&self, graph: &SearchGraph, query: &[f32], k: usize, epsilon: f32) -> Vec<Candidate> {
        if k == 0 {
            return Vec::new();
        }
        let n = self.len();
        let scale = 1.0 + epsilon;
        let mut visited = vec![false; n];
        let mut top = TopK::new(k);
        let mut frontier = BinaryHeap::new();

        for &ep in &graph.entry_points {
            visited[ep] = true;
            let c = Candidate { distance: self.distance_to(query, ep), position: ep };
            top.offer(c);
            frontier.push(Reverse(c));
        }

        while let Some(Reverse(current)) = frontier.pop() {
            let bound = top.worst() * scale;
            if top.is_full() && current.distance > bound {
                break;
            }
            for &j in &graph.adjacency[current.position] {
                if std::mem::replace(&mut visited[j], true) {
                    continue;
                }
                let c = Candidate { distance: self.distance_to(query, j), position: j };
                if !top.is_full() || c.distance < top.worst() * scale {
                    frontier.push(Reverse(c));
                    top.offer(c);
                }
            }
        }

        // A disconnected graph can strand results; top up by exact scan.
        if top.len() < k {
            for j in (0..n).filter(|&j| !visited[j]) {
                top.offer(Candidate { distance: self.distance_to(query, j), position: j });
            }
        }
        top.into_sorted()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let n = self.graph.len();
        let corrupt = |what: &str| Err(Error::CorruptIndex(format!("descent: {what}")));
        if n == 0 || self.dim == 0 || self.data.len() != n * self.dim {
            return corrupt("row data does not match dimension");
        }
        if self.graph.iter().flatten().any(|&j| j >= n) {
            return corrupt("graph edge out of range");
        }
        if let Some(sg) = &self.search_graph {
            if sg.adjacency.len() != n
                || sg.adjacency.iter().flatten().any(|&j| j >= n)
                || sg.entry_points.iter().any(|&j| j >= n)
            {
                return corrupt("search graph out of range");
            }
        }
        self.params
            .validate()
            .map_err(|e| Error::CorruptIndex(format!("descent: {e}")))
    }
}

impl NearestNeighbors for Descent {
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
        self.query_with_epsilon(queries, k, self.params.epsilon)
    }
}

/// Inserts into a list sorted by (distance, position), capped at `k`.
fn insert(list: &mut Vec<Entry>, candidate: Candidate, k: usize) -> bool {
    if list.iter().any(|e| e.candidate.position == candidate.position) {
        return false;
    }
    if list.len() >= k && list.last().is_some_and(|last| candidate >= last.candidate) {
        return false;
    }
    let at = list.partition_point(|e| e.candidate < candidate);
    list.insert(at, Entry { candidate, fresh: true });
    list.truncate(k);
    true
}

fn merge_unique(into: &mut Vec<usize>, extra: &[usize]) {
    for &j in extra {
        if !into.contains(&j) {
            into.push(j);
        }
    }
}
