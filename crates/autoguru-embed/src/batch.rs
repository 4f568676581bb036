//! Row-major vector batches and the offset table that maps rows back to the
//! logical inputs they were embedded for.

use std::ops::Range;

use autoguru_core::traits::Embedder;
use autoguru_core::{Error, Result};

/// A dense (rows, dim) matrix stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorBatch {
    data: Vec<f32>,
    dim: usize,
}

impl VectorBatch {
    pub fn from_rows(rows: Vec<Vec<f32>>, dim: usize) -> Result<Self> {
        check_dim(dim)?;
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.len() != dim {
                return Err(Error::DimensionMismatch { expected: dim, actual: row.len() });
            }
            data.extend(row);
        }
        Ok(Self { data, dim })
    }

    /// Reshapes a flat slice to (len / dim, dim). Never transposes: a length
    /// that is not a multiple of `dim` is a mismatch.
    pub fn from_flat(data: Vec<f32>, dim: usize) -> Result<Self> {
        check_dim(dim)?;
        if data.len() % dim != 0 {
            return Err(Error::DimensionMismatch { expected: dim, actual: data.len() });
        }
        Ok(Self { data, dim })
    }

    pub fn single(vector: Vec<f32>) -> Result<Self> {
        let dim = vector.len();
        Self::from_flat(vector, dim)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim)
    }

    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    pub fn into_flat(self) -> Vec<f32> {
        self.data
    }
}

fn check_dim(dim: usize) -> Result<()> {
    if dim == 0 {
        return Err(Error::InvalidConfig("vector dimension must be positive".into()));
    }
    Ok(())
}

/// Boundaries of consecutive row groups: group `g` owns rows
/// `offsets[g]..offsets[g + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOffsets(Vec<usize>);

impl BatchOffsets {
    pub fn from_sizes<I: IntoIterator<Item = usize>>(sizes: I) -> Self {
        let mut offsets = vec![0];
        let mut total = 0;
        for size in sizes {
            total += size;
            offsets.push(total);
        }
        Self(offsets)
    }

    pub fn groups(&self) -> usize {
        self.0.len() - 1
    }

    pub fn total(&self) -> usize {
        self.0[self.0.len() - 1]
    }

    pub fn range(&self, group: usize) -> Range<usize> {
        self.0[group]..self.0[group + 1]
    }

    /// Splits per-row items back into their groups.
    pub fn split<T>(&self, items: Vec<T>) -> Vec<Vec<T>> {
        debug_assert_eq!(items.len(), self.total());
        let mut iter = items.into_iter();
        (0..self.groups())
            .map(|g| iter.by_ref().take(self.range(g).len()).collect())
            .collect()
    }
}

/// Embeds every text of every group in a single embedder call.
///
/// Returns the vectors in input order plus the offset table that maps each
/// group to its rows. Every row is checked against `embedder.dim()`.
pub fn embed_groups(embedder: &dyn Embedder, groups: &[Vec<String>]) -> Result<(VectorBatch, BatchOffsets)> {
    let offsets = BatchOffsets::from_sizes(groups.iter().map(Vec::len));
    let texts: Vec<String> = groups.iter().flatten().cloned().collect();
    let dim = embedder.dim();
    if texts.is_empty() {
        return Ok((VectorBatch::from_rows(Vec::new(), dim)?, offsets));
    }
    let rows = embedder.embed_batch(&texts)?;
    if rows.len() != texts.len() {
        return Err(Error::External(anyhow::anyhow!(
            "embedder returned {} vectors for {} texts",
            rows.len(),
            texts.len()
        )));
    }
    tracing::debug!(texts = texts.len(), groups = offsets.groups(), dim, "embedded batch");
    Ok((VectorBatch::from_rows(rows, dim)?, offsets))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_reshape_is_row_major_only() {
        let batch = VectorBatch::from_flat(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.row(1), &[4.0, 5.0, 6.0]);

        let err = VectorBatch::from_flat(vec![1.0, 2.0, 3.0, 4.0], 3).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 4 }));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = VectorBatch::from_rows(vec![vec![1.0, 2.0], vec![1.0]], 2).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn offsets_split_rows_back_into_groups() {
        let offsets = BatchOffsets::from_sizes([2, 0, 3]);
        assert_eq!(offsets.groups(), 3);
        assert_eq!(offsets.total(), 5);
        assert_eq!(offsets.range(2), 2..5);
        let split = offsets.split(vec!['a', 'b', 'c', 'd', 'e']);
        assert_eq!(split, vec![vec!['a', 'b'], vec![], vec!['c', 'd', 'e']]);
    }
}
