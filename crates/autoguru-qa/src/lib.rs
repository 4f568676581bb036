//! Question retrieval and answering over a swappable nearest-neighbor index.
//!
//! [`QuestionSearchService`] owns the published index generation and rebuilds
//! it from the repository; [`QuestionAnsweringService`] groups search hits by
//! answer and pools their similarities into one confidence per answer.

mod answer;
mod search;
mod settings;
mod snapshot;

pub use answer::{ConfidencePoolingStrategy, QuestionAnsweringService};
pub use search::{IndexGeneration, QuestionSearchService};
pub use settings::{AnsweringSettings, SnapshotSettings};
