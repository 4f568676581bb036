use anyhow::Result;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use autoguru_core::traits::Embedder;
use autoguru_core::Metric;

use crate::normalize::l2_normalize;

const SUGGESTED: [Metric; 2] = [Metric::AngularDistance, Metric::Cosine];

/// Bag-of-tokens embedder: each lowercased token is hashed into one of `dim`
/// buckets. Deterministic and model-free, for tests and development.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
    seed: u64,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self::with_seed(dim, 0)
    }

    pub fn with_seed(dim: usize, seed: u64) -> Self {
        Self { dim: dim.max(1), seed }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let token = token
                .trim_matches(|c: char| c.is_ascii_punctuation())
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut hasher = XxHash64::with_seed(self.seed);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = usize::try_from(h % self.dim as u64).unwrap_or(0);
            let val = ((h >> 32) as u32) as f32 / u32::MAX as f32;
            v[idx] += 0.5 + val + (i % 3) as f32 * 0.01;
        }
        l2_normalize(&mut v);
        v
    }
}

impl Embedder for HashingEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn suggested_metrics(&self) -> &[Metric] {
        &SUGGESTED
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
