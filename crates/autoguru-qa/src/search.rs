use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use autoguru_core::config::Config;
use autoguru_core::traits::{Embedder, QuestionRepository};
use autoguru_core::types::{Neighbor, Question, QuestionId, SimilarQuestion};
use autoguru_core::{Error, Metric, Result};
use autoguru_embed::embed_groups;
use autoguru_vector::{Index, IndexConfig, NearestNeighbors};

use crate::settings::SnapshotSettings;
use crate::snapshot::{fingerprint, Snapshot};

/// An immutable (index, id mapping) pair. Row `i` of `index` was embedded from
/// the question `question_ids[i]`.
#[derive(Debug)]
pub struct IndexGeneration {
    index: Index,
    question_ids: Vec<QuestionId>,
    built_at: DateTime<Utc>,
    fingerprint: String,
    sequence: u64,
}

impl IndexGeneration {
    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn question_ids(&self) -> &[QuestionId] {
        &self.question_ids
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Hex blake3 digest of the indexed corpus.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Publish counter of the owning service, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.question_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.question_ids.is_empty()
    }
}

/// Finds the indexed questions most similar to a query question.
///
/// The service publishes one [`IndexGeneration`] at a time. Readers clone the
/// `Arc` and work against it, so a rebuild never blocks or disturbs in-flight
/// searches and a failed rebuild leaves the previous generation serving.
pub struct QuestionSearchService {
    embedder: Arc<dyn Embedder>,
    repository: Arc<dyn QuestionRepository>,
    config: IndexConfig,
    metric: Metric,
    active: RwLock<Option<Arc<IndexGeneration>>>,
    sequence: AtomicU64,
    snapshot_path: Option<PathBuf>,
}

impl QuestionSearchService {
    /// Validates the index configuration and resolves the metric. No index is
    /// built until [`create_index`](Self::create_index) or
    /// [`load_snapshot`](Self::load_snapshot).
    pub fn new(
        embedder: Arc<dyn Embedder>,
        repository: Arc<dyn QuestionRepository>,
        config: IndexConfig,
    ) -> Result<Self> {
        config.validate()?;
        let metric = config.resolve_metric(embedder.suggested_metrics())?;
        tracing::debug!(backend = config.backend.name(), %metric, dim = embedder.dim(), "search service configured");
        Ok(Self {
            embedder,
            repository,
            config,
            metric,
            active: RwLock::new(None),
            sequence: AtomicU64::new(0),
            snapshot_path: None,
        })
    }

    /// Location used by [`save_configured_snapshot`](Self::save_configured_snapshot).
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Reads the `[index]` and `[snapshot]` sections. A relative snapshot path
    /// is taken from the working directory; when the file already exists its
    /// generation is published right away.
    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        repository: Arc<dyn QuestionRepository>,
    ) -> Result<Self> {
        let service = Self::new(embedder, repository, config.get_or_default("index")?)?;
        let snapshot = SnapshotSettings::from_config(config)?;
        let Some(path) = snapshot.resolved_path(&std::env::current_dir()?) else {
            return Ok(service);
        };
        if path.is_file() {
            service.load_snapshot(&path)?;
        } else {
            tracing::info!(path = %path.display(), "no snapshot yet; build with create_index");
        }
        Ok(service.with_snapshot_path(path))
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn index_config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn QuestionRepository> {
        &self.repository
    }

    pub fn current(&self) -> Option<Arc<IndexGeneration>> {
        self.active.read().clone()
    }

    /// Rebuilds from every answered question and publishes the result.
    pub fn create_index(&self) -> Result<Arc<IndexGeneration>> {
        let questions = self.repository.answered_questions()?;
        let questions: Vec<Question> = questions.into_iter().filter(Question::is_answered).collect();
        if questions.is_empty() {
            tracing::warn!("no answered questions to index");
            return Err(Error::EmptyCorpus);
        }

        let started = Instant::now();
        tracing::info!(questions = questions.len(), backend = self.config.backend.name(), "rebuilding index");
        let texts = vec![questions.iter().map(|q| q.text.clone()).collect::<Vec<_>>()];
        let (vectors, _) = embed_groups(self.embedder.as_ref(), &texts)?;
        let index = self.config.build(&vectors, self.metric)?;
        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "index rebuilt");

        let generation = IndexGeneration {
            index,
            question_ids: questions.iter().map(|q| q.id).collect(),
            built_at: Utc::now(),
            fingerprint: fingerprint(&questions),
            sequence: 0,
        };
        Ok(self.publish(generation))
    }

    pub fn search(&self, question: &Question, k: usize) -> Result<Vec<SimilarQuestion>> {
        self.search_text(&question.text, k)
    }

    pub fn search_text(&self, text: &str, k: usize) -> Result<Vec<SimilarQuestion>> {
        let generation = self.active_generation()?;
        let vector = self.embedder.embed(text)?;
        if vector.len() != self.embedder.dim() {
            return Err(Error::DimensionMismatch { expected: self.embedder.dim(), actual: vector.len() });
        }
        let neighbors = generation.index.query(&vector, k)?;
        self.resolve(&generation, neighbors)
    }

    /// Embeds all questions in one call and queries the index with one batch.
    pub fn search_many(&self, questions: &[Question], k: usize) -> Result<Vec<Vec<SimilarQuestion>>> {
        if questions.is_empty() {
            return Ok(Vec::new());
        }
        let generation = self.active_generation()?;
        let groups: Vec<Vec<String>> = questions.iter().map(|q| vec![q.text.clone()]).collect();
        let (vectors, offsets) = embed_groups(self.embedder.as_ref(), &groups)?;
        let results = generation.index.query_batch(&vectors, k)?;
        offsets
            .split(results)
            .into_iter()
            .map(|rows| {
                let neighbors = rows.into_iter().flatten().collect();
                self.resolve(&generation, neighbors)
            })
            .collect()
    }

    /// Writes the published generation to `path`.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let generation = self.active_generation()?;
        Snapshot {
            index: generation.index.clone(),
            question_ids: generation.question_ids.clone(),
            built_at: generation.built_at,
            fingerprint: generation.fingerprint.clone(),
        }
        .save(path)
    }

    /// Saves the published generation to the configured snapshot path.
    pub fn save_configured_snapshot(&self) -> Result<PathBuf> {
        let path = self
            .snapshot_path
            .clone()
            .ok_or_else(|| Error::InvalidConfig("no snapshot path configured".into()))?;
        self.save_snapshot(&path)?;
        Ok(path)
    }

    /// Publishes a previously saved generation without rebuilding.
    pub fn load_snapshot(&self, path: &Path) -> Result<Arc<IndexGeneration>> {
        let snapshot = Snapshot::load(path)?;
        if snapshot.index.backend() != self.config.backend.name() {
            return Err(Error::InvalidConfig(format!(
                "snapshot holds a {} index, service is configured for {}",
                snapshot.index.backend(),
                self.config.backend.name()
            )));
        }
        if snapshot.index.dim() != self.embedder.dim() {
            return Err(Error::DimensionMismatch { expected: self.embedder.dim(), actual: snapshot.index.dim() });
        }
        if snapshot.index.metric() != self.metric {
            return Err(Error::InvalidConfig(format!(
                "snapshot uses metric {}, service is configured for {}",
                snapshot.index.metric(),
                self.metric
            )));
        }
        Ok(self.publish(IndexGeneration {
            index: snapshot.index,
            question_ids: snapshot.question_ids,
            built_at: snapshot.built_at,
            fingerprint: snapshot.fingerprint,
            sequence: 0,
        }))
    }

    fn publish(&self, mut generation: IndexGeneration) -> Arc<IndexGeneration> {
        generation.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = Arc::new(generation);
        *self.active.write() = Some(Arc::clone(&generation));
        tracing::info!(
            sequence = generation.sequence,
            rows = generation.len(),
            backend = generation.index.backend(),
            fingerprint = %generation.fingerprint,
            "index generation published"
        );
        generation
    }

    fn active_generation(&self) -> Result<Arc<IndexGeneration>> {
        self.current().ok_or(Error::IndexNotReady)
    }

    fn resolve(&self, generation: &IndexGeneration, neighbors: Vec<Neighbor>) -> Result<Vec<SimilarQuestion>> {
        let mut similar = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let id = generation.question_ids.get(neighbor.position).ok_or_else(|| {
                Error::CorruptIndex(format!("neighbor position {} outside id mapping", neighbor.position))
            })?;
            match self.repository.question(id)? {
                Some(question) => similar.push(SimilarQuestion { question, similarity: neighbor.similarity }),
                None => tracing::warn!(question = %id, "indexed question no longer exists; skipping"),
            }
        }
        Ok(similar)
    }
}
