//! Nearest-neighbor indexes over embedding corpora.
//!
//! Two interchangeable backends implement [`NearestNeighbors`]:
//! - [`BallTree`]: exact top-k via a space-partitioning tree
//! - [`Descent`]: approximate top-k over an NN-descent neighbor graph
//!
//! [`IndexConfig`] selects and builds a backend; [`persist`] turns a built
//! [`Index`] into a self-contained blob and back.

mod ball_tree;
mod config;
mod descent;
mod index;
mod neighbors;
pub mod persist;

pub use ball_tree::BallTree;
pub use config::{BackendKind, IndexConfig};
pub use descent::{Descent, DescentParams};
pub use index::Index;
pub use neighbors::NearestNeighbors;
