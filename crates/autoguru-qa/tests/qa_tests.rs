use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use autoguru_core::config::Config;
use autoguru_core::memory::InMemoryRepository;
use autoguru_core::traits::Embedder;
use autoguru_core::types::{Answer, AnswerId, Question, QuestionId};
use autoguru_core::{Error, Metric};
use autoguru_embed::HashingEmbedder;
use autoguru_qa::{
    AnsweringSettings, ConfidencePoolingStrategy, QuestionAnsweringService, QuestionSearchService,
    SnapshotSettings,
};
use autoguru_vector::{BackendKind, IndexConfig};
use figment::providers::{Format, Toml};
use figment::Figment;
use proptest::prelude::*;

/// Looks texts up in a fixed table; unknown texts embed to the first axis.
struct TableEmbedder {
    dim: usize,
    table: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl TableEmbedder {
    fn new(dim: usize, entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            dim,
            table: entries.iter().map(|(t, v)| (t.to_string(), v.clone())).collect(),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }
}

impl Embedder for TableEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("embedding backend unavailable");
        }
        Ok(texts
            .iter()
            .map(|t| {
                self.table.get(t).cloned().unwrap_or_else(|| {
                    let mut v = vec![0.0; self.dim];
                    v[0] = 1.0;
                    v
                })
            })
            .collect())
    }
}

struct Fixture {
    repo: Arc<InMemoryRepository>,
    embedder: Arc<TableEmbedder>,
    a1: AnswerId,
    a2: AnswerId,
    q1: QuestionId,
}

/// Q1 and Q2 share A1, Q3 points at A2; against the query their cosine
/// similarities are 0.9, 0.7 and 0.5.
fn fixture() -> Fixture {
    autoguru_core::logging::init("autoguru_qa=debug,autoguru_vector=debug");
    let embedder = Arc::new(TableEmbedder::new(
        4,
        &[
            ("query", vec![1.0, 0.0, 0.0, 0.0]),
            ("q1", vec![0.9, 0.19f32.sqrt(), 0.0, 0.0]),
            ("q2", vec![0.7, 0.0, 0.51f32.sqrt(), 0.0]),
            ("q3", vec![0.5, 0.0, 0.0, 0.75f32.sqrt()]),
        ],
    ));
    let repo = Arc::new(InMemoryRepository::new());
    let a1 = repo.insert_answer(Answer::new("reset it from the settings page"));
    let a2 = repo.insert_answer(Answer::new("contact support"));
    let q1 = repo.insert_question(Question::new("q1").with_answer(a1));
    repo.insert_question(Question::new("q2").with_answer(a1));
    repo.insert_question(Question::new("q3").with_answer(a2));
    repo.insert_question(Question::new("unanswered"));
    Fixture { repo, embedder, a1, a2, q1 }
}

fn service(f: &Fixture, config: IndexConfig) -> Arc<QuestionSearchService> {
    let search = QuestionSearchService::new(f.embedder.clone(), f.repo.clone(), config).unwrap();
    search.create_index().unwrap();
    Arc::new(search)
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}

fn backends() -> Vec<IndexConfig> {
    vec![IndexConfig::ball_tree(), IndexConfig::descent()]
}

#[test]
fn pooled_answers_follow_strategy() {
    let f = fixture();
    for config in backends() {
        let search = service(&f, config);
        let query = Question::new("query");

        let max = QuestionAnsweringService::new(search.clone(), ConfidencePoolingStrategy::Maximum).unwrap();
        let answers = max.answer(&query, 3).unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers[0].answer.id, f.a1);
        assert!(close(answers[0].confidence, 0.9));
        assert_eq!(answers[1].answer.id, f.a2);
        assert!(close(answers[1].confidence, 0.5));

        let mean = QuestionAnsweringService::new(search.clone(), ConfidencePoolingStrategy::ArithmeticMean).unwrap();
        let answers = mean.answer(&query, 3).unwrap();
        assert_eq!(answers[0].answer.id, f.a1);
        assert!(close(answers[0].confidence, 0.8));
        assert!(close(answers[1].confidence, 0.5));

        let min = QuestionAnsweringService::new(search, ConfidencePoolingStrategy::Minimum).unwrap();
        let answers = min.answer(&query, 3).unwrap();
        assert!(close(answers[0].confidence, 0.7));
        assert!(close(answers[1].confidence, 0.5));
    }
}

#[test]
fn search_orders_by_similarity_and_tolerates_large_k() {
    let f = fixture();
    let search = service(&f, IndexConfig::ball_tree());
    let hits = search.search(&Question::new("query"), 10).unwrap();
    let texts: Vec<_> = hits.iter().map(|h| h.question.text.as_str()).collect();
    assert_eq!(texts, vec!["q1", "q2", "q3"]);
    assert!(close(hits[0].similarity, 0.9));
    assert_eq!(hits[0].question.id, f.q1);

    assert!(search.search(&Question::new("query"), 0).unwrap().is_empty());
    let answering = QuestionAnsweringService::new(search, ConfidencePoolingStrategy::Maximum).unwrap();
    assert_eq!(answering.answer(&Question::new("query"), 1).unwrap().len(), 1);
}

#[test]
fn geometric_mean_is_rejected_for_cosine() {
    let f = fixture();
    let search = service(&f, IndexConfig::ball_tree());
    assert_eq!(search.metric(), Metric::Cosine);
    let err = QuestionAnsweringService::new(search, ConfidencePoolingStrategy::GeometricMean).err();
    assert!(matches!(err, Some(Error::InvalidPoolingInput { strategy: "geometric_mean", .. })));

    let angular = service(&f, IndexConfig::ball_tree().with_metric(Metric::AngularDistance));
    let answering = QuestionAnsweringService::new(angular, ConfidencePoolingStrategy::GeometricMean).unwrap();
    let answers = answering.answer(&Question::new("query"), 3).unwrap();
    assert_eq!(answers.len(), 2);
    assert!(answers.iter().all(|a| a.confidence > 0.0 && a.confidence <= 1.0));
}

#[test]
fn empty_corpus_is_an_error() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.insert_question(Question::new("nobody answered me"));
    let search = QuestionSearchService::new(Arc::new(HashingEmbedder::new(16)), repo, IndexConfig::ball_tree()).unwrap();
    assert!(matches!(search.search(&Question::new("anything"), 3), Err(Error::IndexNotReady)));
    assert!(matches!(search.create_index(), Err(Error::EmptyCorpus)));
    assert!(search.current().is_none());
}

#[test]
fn rebuilding_an_unchanged_corpus_is_idempotent() {
    let f = fixture();
    for config in backends() {
        let search = service(&f, config);
        let first = search.current().unwrap();
        let before = search.search(&Question::new("query"), 3).unwrap();
        let second = search.create_index().unwrap();
        assert_eq!(second.sequence(), first.sequence() + 1);
        assert_eq!(second.fingerprint(), first.fingerprint());
        assert_eq!(second.question_ids(), first.question_ids());
        assert_eq!(search.search(&Question::new("query"), 3).unwrap(), before);
    }
}

#[test]
fn failed_rebuild_keeps_serving_previous_generation() {
    let f = fixture();
    let search = service(&f, IndexConfig::ball_tree());
    let published = search.current().unwrap();

    f.embedder.fail.store(true, Ordering::SeqCst);
    assert!(matches!(search.create_index(), Err(Error::External(_))));
    f.embedder.fail.store(false, Ordering::SeqCst);

    for id in published.question_ids().to_vec() {
        f.repo.link(&id, None);
    }
    assert!(matches!(search.create_index(), Err(Error::EmptyCorpus)));

    let current = search.current().unwrap();
    assert!(Arc::ptr_eq(&current, &published));
    assert_eq!(search.search(&Question::new("query"), 3).unwrap().len(), 3);
}

#[test]
fn stale_questions_and_answers_are_skipped() {
    let f = fixture();
    let search = service(&f, IndexConfig::ball_tree());
    f.repo.remove_question(&f.q1);
    let hits = search.search(&Question::new("query"), 3).unwrap();
    assert_eq!(hits.len(), 2);

    f.repo.remove_answer(&f.a2);
    let answering = QuestionAnsweringService::new(search, ConfidencePoolingStrategy::Maximum).unwrap();
    let answers = answering.answer(&Question::new("query"), 3).unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].answer.id, f.a1);
    assert!(close(answers[0].confidence, 0.7));
}

#[test]
fn batched_search_uses_one_embedding_call() {
    let f = fixture();
    let search = service(&f, IndexConfig::ball_tree());
    let queries = vec![Question::new("query"), Question::new("q3")];
    let calls = f.embedder.calls.load(Ordering::SeqCst);
    let batched = search.search_many(&queries, 2).unwrap();
    assert_eq!(f.embedder.calls.load(Ordering::SeqCst), calls + 1);
    assert_eq!(batched.len(), 2);
    for (query, hits) in queries.iter().zip(&batched) {
        assert_eq!(hits, &search.search(query, 2).unwrap());
    }
    assert_eq!(batched[1][0].question.text, "q3");

    let answering = QuestionAnsweringService::new(search, ConfidencePoolingStrategy::Median).unwrap();
    let answers = answering.answer_many(&queries, 3).unwrap();
    assert_eq!(answers[0], answering.answer(&queries[0], 3).unwrap());
    assert!(answering.answer_many(&[], 3).unwrap().is_empty());
}

#[test]
fn snapshots_restore_the_same_generation() {
    let f = fixture();
    let dir = tempfile::tempdir().unwrap();
    for config in backends() {
        let path = dir.path().join(format!("{}.snapshot", config.backend.name()));
        let built = service(&f, config.clone());
        built.save_snapshot(&path).unwrap();

        let restored = QuestionSearchService::new(f.embedder.clone(), f.repo.clone(), config).unwrap();
        let generation = restored.load_snapshot(&path).unwrap();
        let original = built.current().unwrap();
        assert_eq!(generation.fingerprint(), original.fingerprint());
        assert_eq!(generation.built_at(), original.built_at());
        assert_eq!(generation.question_ids(), original.question_ids());
        let query = Question::new("query");
        assert_eq!(restored.search(&query, 3).unwrap(), built.search(&query, 3).unwrap());
    }
}

#[test]
fn snapshot_with_other_metric_is_refused() {
    let f = fixture();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cosine.snapshot");
    service(&f, IndexConfig::ball_tree()).save_snapshot(&path).unwrap();

    let angular = IndexConfig::ball_tree().with_metric(Metric::AngularDistance);
    let other = QuestionSearchService::new(f.embedder.clone(), f.repo.clone(), angular).unwrap();
    assert!(matches!(other.load_snapshot(&path), Err(Error::InvalidConfig(_))));
    assert!(other.current().is_none());
}

#[test]
fn services_are_built_from_config_sections() {
    let f = fixture();
    let config = Config::from_figment(Figment::from(Toml::string(
        r#"
        [index]
        backend = "descent"
        neighbors = 4

        [answering]
        pooling = "arithmetic_mean"
        default_k = 3

        [snapshot]
        path = "snapshots/current.json"
        "#,
    )));
    let search = QuestionSearchService::from_config(&config, f.embedder.clone(), f.repo.clone()).unwrap();
    assert_eq!(search.index_config().backend, BackendKind::Descent);
    assert_eq!(search.index_config().neighbors, 4);
    search.create_index().unwrap();

    let settings = AnsweringSettings::from_config(&config).unwrap();
    assert_eq!(settings.default_k, 3);
    let answering = QuestionAnsweringService::from_settings(Arc::new(search), &settings).unwrap();
    let answers = answering.answer(&Question::new("query"), settings.default_k).unwrap();
    assert!(close(answers[0].confidence, 0.8));

    let snapshot = SnapshotSettings::from_config(&config).unwrap();
    let base = std::path::Path::new("/srv/autoguru");
    assert_eq!(snapshot.resolved_path(base), Some(base.join("snapshots/current.json")));
    assert_eq!(SnapshotSettings::default().resolved_path(base), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn searches_run_while_rebuilding() {
    let f = fixture();
    let search = service(&f, IndexConfig::descent());

    let rebuilder = {
        let search = search.clone();
        tokio::task::spawn_blocking(move || {
            for _ in 0..20 {
                search.create_index().unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let search = search.clone();
            tokio::task::spawn_blocking(move || {
                for _ in 0..50 {
                    let hits = search.search(&Question::new("query"), 3).unwrap();
                    assert_eq!(hits.len(), 3);
                    assert_eq!(hits[0].question.text, "q1");
                }
            })
        })
        .collect();

    rebuilder.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(search.current().unwrap().sequence(), 21);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn search_returns_min_k_n_sorted(
        texts in prop::collection::vec("[a-z]{1,6}( [a-z]{1,6}){0,3}", 1..24),
        k in 0usize..30,
        descent in any::<bool>(),
    ) {
        let repo = Arc::new(InMemoryRepository::new());
        let answer = repo.insert_answer(Answer::new("shared"));
        for text in &texts {
            repo.insert_question(Question::new(text.as_str()).with_answer(answer));
        }
        let config = if descent { IndexConfig::descent() } else { IndexConfig::ball_tree() };
        let search = QuestionSearchService::new(Arc::new(HashingEmbedder::new(32)), repo, config).unwrap();
        search.create_index().unwrap();
        let hits = search.search(&Question::new(texts[0].as_str()), k).unwrap();
        prop_assert_eq!(hits.len(), k.min(texts.len()));
        prop_assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }
}

#[test]
fn default_k_comes_from_settings() {
    let f = fixture();
    let search = service(&f, IndexConfig::ball_tree());
    let query = Question::new("query");

    let plain = QuestionAnsweringService::new(search.clone(), ConfidencePoolingStrategy::ArithmeticMean).unwrap();
    assert_eq!(plain.default_k(), 1);
    let answers = plain.answer_default(&query).unwrap();
    assert_eq!(answers.len(), 1);
    assert!(close(answers[0].confidence, 0.9));

    let settings = AnsweringSettings { pooling: ConfidencePoolingStrategy::ArithmeticMean, default_k: 3 };
    let configured = QuestionAnsweringService::from_settings(search, &settings).unwrap();
    assert_eq!(configured.default_k(), 3);
    let answers = configured.answer_default(&query).unwrap();
    assert_eq!(answers.len(), 2);
    assert!(close(answers[0].confidence, 0.8));
}

#[test]
fn configured_snapshot_path_is_saved_and_restored() {
    let f = fixture();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("current.snapshot");
    let config = Config::from_figment(Figment::from(Toml::string(&format!(
        "[snapshot]\npath = \"{}\"\n",
        path.display()
    ))));

    let first = QuestionSearchService::from_config(&config, f.embedder.clone(), f.repo.clone()).unwrap();
    assert_eq!(first.snapshot_path(), Some(path.as_path()));
    assert!(first.current().is_none());
    first.create_index().unwrap();
    assert_eq!(first.save_configured_snapshot().unwrap(), path);

    let second = QuestionSearchService::from_config(&config, f.embedder.clone(), f.repo.clone()).unwrap();
    let restored = second.current().expect("snapshot published at startup");
    assert_eq!(restored.fingerprint(), first.current().unwrap().fingerprint());
    let query = Question::new("query");
    assert_eq!(second.search(&query, 3).unwrap(), first.search(&query, 3).unwrap());

    let unconfigured = service(&f, IndexConfig::ball_tree());
    assert!(matches!(unconfigured.save_configured_snapshot(), Err(Error::InvalidConfig(_))));
}

#[test]
fn snapshot_from_other_backend_is_refused() {
    let f = fixture();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.snapshot");
    service(&f, IndexConfig::ball_tree()).save_snapshot(&path).unwrap();

    let graph = QuestionSearchService::new(f.embedder.clone(), f.repo.clone(), IndexConfig::descent()).unwrap();
    assert!(matches!(graph.load_snapshot(&path), Err(Error::InvalidConfig(_))));
    assert!(graph.current().is_none());
}
