//! Embedding adapters shared by the index and answering crates.
//!
//! Real models live behind `autoguru_core::traits::Embedder` outside this
//! workspace; this crate provides the deterministic [`HashingEmbedder`], L2
//! normalisation, and [`embed_groups`] which batches several logical inputs
//! into one embedder call.

mod batch;
mod hashing;
mod normalize;

pub use batch::{embed_groups, BatchOffsets, VectorBatch};
pub use hashing::HashingEmbedder;
pub use normalize::{dot, l2_normalize, l2_normalized};
