use serde::{Deserialize, Serialize};

use autoguru_core::types::Neighbor;
use autoguru_core::{Metric, Result};
use autoguru_embed::VectorBatch;

use crate::ball_tree::BallTree;
use crate::descent::Descent;
use crate::neighbors::NearestNeighbors;

/// A built index of either backend. Serializes with a `backend` tag so a
/// persisted blob names what it contains.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum Index {
    BallTree(BallTree),
    Descent(Descent),
}

impl Index {
    fn inner(&self) -> &dyn NearestNeighbors {
        match self {
            Index::BallTree(tree) => tree,
            Index::Descent(descent) => descent,
        }
    }

    /// Structural checks run after deserialization.
    pub fn validate(&self) -> Result<()> {
        match self {
            Index::BallTree(tree) => tree.validate(),
            Index::Descent(descent) => descent.validate(),
        }
    }
}

impl NearestNeighbors for Index {
    fn backend(&self) -> &'static str {
        self.inner().backend()
    }

    fn metric(&self) -> Metric {
        self.inner().metric()
    }

    fn dim(&self) -> usize {
        self.inner().dim()
    }

    fn len(&self) -> usize {
        self.inner().len()
    }

    fn query_batch(&self, queries: &VectorBatch, k: usize) -> Result<Vec<Vec<Neighbor>>> {
        self.inner().query_batch(queries, k)
    }
}
