use serde::{Deserialize, Serialize};

use autoguru_core::{Error, Metric, Result};
use autoguru_embed::VectorBatch;

use crate::ball_tree::{BallTree, DEFAULT_LEAF_SIZE};
use crate::descent::{Descent, DescentParams};
use crate::index::Index;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    BallTree,
    Descent,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::BallTree => BallTree::NAME,
            BackendKind::Descent => Descent::NAME,
        }
    }

    pub fn supported_metrics(self) -> &'static [Metric] {
        match self {
            BackendKind::BallTree => &BallTree::SUPPORTED_METRICS,
            BackendKind::Descent => &Descent::SUPPORTED_METRICS,
        }
    }
}

/// Backend selection plus every tunable, loadable from the `[index]` config
/// section. Parameters that do not apply to the chosen backend are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: BackendKind,
    /// Explicit metric; when unset the embedder's suggestion decides.
    pub metric: Option<Metric>,
    pub leaf_size: usize,
    pub neighbors: usize,
    pub diversify_probability: f32,
    pub pruning_degree_multiplier: f32,
    pub epsilon: f32,
    pub max_iterations: Option<usize>,
    pub seed: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        let descent = DescentParams::default();
        Self {
            backend: BackendKind::default(),
            metric: None,
            leaf_size: DEFAULT_LEAF_SIZE,
            neighbors: descent.neighbors,
            diversify_probability: descent.diversify_probability,
            pruning_degree_multiplier: descent.pruning_degree_multiplier,
            epsilon: descent.epsilon,
            max_iterations: descent.max_iterations,
            seed: descent.seed,
        }
    }
}

impl IndexConfig {
    pub fn ball_tree() -> Self {
        Self::default()
    }

    pub fn descent() -> Self {
        Self { backend: BackendKind::Descent, ..Self::default() }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn supports(&self, metric: Metric) -> bool {
        self.backend.supported_metrics().contains(&metric)
    }

    /// Picks the metric to build with: the explicit one, else the first
    /// suggested metric this backend supports, else cosine.
    pub fn resolve_metric(&self, suggested: &[Metric]) -> Result<Metric> {
        let metric = match self.metric {
            Some(m) => m,
            None => suggested
                .iter()
                .copied()
                .find(|m| self.supports(*m))
                .unwrap_or(Metric::Cosine),
        };
        if !self.supports(metric) {
            return Err(Error::UnsupportedMetric { backend: self.backend.name(), metric });
        }
        Ok(metric)
    }

    pub fn descent_params(&self) -> DescentParams {
        DescentParams {
            neighbors: self.neighbors,
            diversify_probability: self.diversify_probability,
            pruning_degree_multiplier: self.pruning_degree_multiplier,
            epsilon: self.epsilon,
            max_iterations: self.max_iterations,
            seed: self.seed,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.backend {
            BackendKind::BallTree if self.leaf_size == 0 => {
                Err(Error::InvalidConfig("leaf_size must be at least 1".into()))
            }
            BackendKind::BallTree => Ok(()),
            BackendKind::Descent => self.descent_params().validate(),
        }
    }

    /// Builds a ready-to-query index. Descent indexes are prepared here.
    pub fn build(&self, vectors: &VectorBatch, metric: Metric) -> Result<Index> {
        self.validate()?;
        let index = match self.backend {
            BackendKind::BallTree => Index::BallTree(BallTree::build(vectors, metric, self.leaf_size)?),
            BackendKind::Descent => {
                let mut descent = Descent::build(vectors, metric, self.descent_params())?;
                descent.prepare();
                Index::Descent(descent)
            }
        };
        tracing::info!(backend = self.backend.name(), %metric, rows = vectors.len(), "index built");
        Ok(index)
    }
}
