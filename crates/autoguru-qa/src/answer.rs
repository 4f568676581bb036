use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use autoguru_core::types::{AnswerId, Question, QuestionAnswer, SimilarQuestion};
use autoguru_core::{Error, Metric, Result};

use crate::search::QuestionSearchService;
use crate::settings::AnsweringSettings;

/// Reduces the similarities of all hits sharing an answer to one confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidencePoolingStrategy {
    #[default]
    Maximum,
    Minimum,
    ArithmeticMean,
    GeometricMean,
    Median,
}

impl ConfidencePoolingStrategy {
    pub fn name(self) -> &'static str {
        match self {
            Self::Maximum => "maximum",
            Self::Minimum => "minimum",
            Self::ArithmeticMean => "arithmetic_mean",
            Self::GeometricMean => "geometric_mean",
            Self::Median => "median",
        }
    }

    /// Whether the strategy is defined for every similarity `metric` produces.
    pub fn accepts(self, metric: Metric) -> bool {
        !(self == Self::GeometricMean && metric.can_be_negative())
    }

    pub fn pool(self, similarities: &[f32]) -> Result<f32> {
        if similarities.is_empty() {
            return Err(self.invalid("nothing to pool"));
        }
        let n = similarities.len() as f32;
        let pooled = match self {
            Self::Maximum => similarities.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            Self::Minimum => similarities.iter().copied().fold(f32::INFINITY, f32::min),
            Self::ArithmeticMean => similarities.iter().sum::<f32>() / n,
            Self::GeometricMean => {
                if let Some(s) = similarities.iter().find(|s| **s < 0.0) {
                    return Err(self.invalid(format!("negative similarity {s}")));
                }
                (similarities.iter().map(|s| s.ln()).sum::<f32>() / n).exp()
            }
            Self::Median => {
                let mut sorted = similarities.to_vec();
                sorted.sort_by(f32::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
        };
        Ok(pooled)
    }

    fn invalid(self, reason: impl Into<String>) -> Error {
        Error::InvalidPoolingInput { strategy: self.name(), reason: reason.into() }
    }
}

/// Answers a question with the answers of its most similar indexed questions.
pub struct QuestionAnsweringService {
    search: Arc<QuestionSearchService>,
    pooling: ConfidencePoolingStrategy,
    default_k: usize,
}

impl QuestionAnsweringService {
    /// Fails with `InvalidPoolingInput` when the strategy cannot pool what the
    /// search metric produces (geometric mean over possibly negative cosine).
    pub fn new(search: Arc<QuestionSearchService>, pooling: ConfidencePoolingStrategy) -> Result<Self> {
        let metric = search.metric();
        if !pooling.accepts(metric) {
            return Err(pooling.invalid(format!("metric {metric} can produce negative similarities")));
        }
        Ok(Self { search, pooling, default_k: AnsweringSettings::default().default_k })
    }

    pub fn from_settings(search: Arc<QuestionSearchService>, settings: &AnsweringSettings) -> Result<Self> {
        Ok(Self { default_k: settings.default_k, ..Self::new(search, settings.pooling)? })
    }

    /// Number of similar questions consulted by [`answer_default`](Self::answer_default).
    pub fn default_k(&self) -> usize {
        self.default_k
    }

    pub fn pooling(&self) -> ConfidencePoolingStrategy {
        self.pooling
    }

    pub fn search_service(&self) -> &Arc<QuestionSearchService> {
        &self.search
    }

    pub fn answer(&self, question: &Question, k: usize) -> Result<Vec<QuestionAnswer>> {
        let hits = self.search.search(question, k)?;
        self.pool_hits(hits)
    }

    /// [`answer`](Self::answer) with the configured `default_k`.
    pub fn answer_default(&self, question: &Question) -> Result<Vec<QuestionAnswer>> {
        self.answer(question, self.default_k)
    }

    pub fn answer_many(&self, questions: &[Question], k: usize) -> Result<Vec<Vec<QuestionAnswer>>> {
        self.search
            .search_many(questions, k)?
            .into_iter()
            .map(|hits| self.pool_hits(hits))
            .collect()
    }

    /// Groups hits by answer in first-appearance order, pools each group and
    /// sorts by confidence. The sort is stable, so equal confidences keep the
    /// order of their best hit.
    fn pool_hits(&self, hits: Vec<SimilarQuestion>) -> Result<Vec<QuestionAnswer>> {
        let mut order: Vec<(AnswerId, Vec<f32>)> = Vec::new();
        let mut slots: HashMap<AnswerId, usize> = HashMap::new();
        for hit in hits {
            let Some(answer_id) = hit.question.answer else {
                tracing::warn!(question = %hit.question.id, "similar question lost its answer; skipping");
                continue;
            };
            let slot = *slots.entry(answer_id).or_insert_with(|| {
                order.push((answer_id, Vec::new()));
                order.len() - 1
            });
            order[slot].1.push(hit.similarity);
        }

        let mut answers = Vec::with_capacity(order.len());
        for (answer_id, similarities) in order {
            let confidence = self.pooling.pool(&similarities)?;
            match self.search.repository().answer(&answer_id)? {
                Some(answer) => answers.push(QuestionAnswer { answer, confidence }),
                None => tracing::warn!(answer = %answer_id, "answer no longer exists; skipping"),
            }
        }
        answers.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(answers)
    }
}

#[cfg(test)]
mod tests {
    use super::ConfidencePoolingStrategy::*;
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn pools_each_strategy() {
        let s = [0.9, 0.4, 0.7, 0.6];
        assert!(close(Maximum.pool(&s).unwrap(), 0.9));
        assert!(close(Minimum.pool(&s).unwrap(), 0.4));
        assert!(close(ArithmeticMean.pool(&s).unwrap(), 0.65));
        assert!(close(Median.pool(&s).unwrap(), 0.65));
        assert!(close(Median.pool(&[0.3, 0.9, 0.5]).unwrap(), 0.5));
        assert!(close(GeometricMean.pool(&[0.5, 0.8]).unwrap(), 0.4f32.sqrt()));
    }

    #[test]
    fn rejects_empty_and_negative_input() {
        assert!(matches!(Maximum.pool(&[]), Err(Error::InvalidPoolingInput { strategy: "maximum", .. })));
        assert!(matches!(
            GeometricMean.pool(&[0.5, -0.1]),
            Err(Error::InvalidPoolingInput { strategy: "geometric_mean", .. })
        ));
        assert!(close(GeometricMean.pool(&[0.0, 0.5]).unwrap(), 0.0));
    }

    #[test]
    fn geometric_mean_needs_non_negative_metric() {
        assert!(!GeometricMean.accepts(Metric::Cosine));
        assert!(GeometricMean.accepts(Metric::AngularDistance));
        assert!(Median.accepts(Metric::Cosine));
    }

    #[test]
    fn strategy_names_parse_from_config_values() {
        let s: ConfidencePoolingStrategy = serde_json::from_str("\"arithmetic_mean\"").unwrap();
        assert_eq!(s, ArithmeticMean);
        assert_eq!(s.name(), "arithmetic_mean");
    }
}
