use crate::metric::Metric;
use crate::types::{Answer, AnswerId, Question, QuestionId};

/// Maps text to fixed-size vectors. Implemented outside this workspace for
/// real models; `autoguru-embed` ships a deterministic hashing implementation.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;

    /// Metrics the embedding space is suited for, most preferred first.
    /// Advisory only.
    fn suggested_metrics(&self) -> &[Metric] {
        &[]
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector for a single input"))
    }
}

/// Read side of the question store.
pub trait QuestionRepository: Send + Sync {
    /// Every question with an answer link, in an order that is stable across
    /// repeated calls while the store is unchanged.
    fn answered_questions(&self) -> anyhow::Result<Vec<Question>>;

    fn question(&self, id: &QuestionId) -> anyhow::Result<Option<Question>>;

    fn answer(&self, id: &AnswerId) -> anyhow::Result<Option<Answer>>;
}
