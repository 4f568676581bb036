//! In-process `QuestionRepository` keeping insertion order.
//!
//! Reads of answered questions follow insertion order, which keeps the index
//! id-mapping stable across rebuilds of an unchanged corpus.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::traits::QuestionRepository;
use crate::types::{Answer, AnswerId, Question, QuestionId};

#[derive(Default)]
pub struct InMemoryRepository {
    inner: RwLock<Store>,
}

#[derive(Default)]
struct Store {
    questions: Vec<Question>,
    positions: HashMap<QuestionId, usize>,
    answers: HashMap<AnswerId, Answer>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_answer(&self, answer: Answer) -> AnswerId {
        let id = answer.id;
        self.inner.write().answers.insert(id, answer);
        id
    }

    /// Inserts or replaces a question; replacement keeps its original position.
    pub fn insert_question(&self, question: Question) -> QuestionId {
        let id = question.id;
        let mut store = self.inner.write();
        if let Some(&pos) = store.positions.get(&id) {
            store.questions[pos] = question;
        } else {
            let pos = store.questions.len();
            store.questions.push(question);
            store.positions.insert(id, pos);
        }
        id
    }

    /// Points a question at an answer (or clears the link). Returns false if
    /// the question does not exist.
    pub fn link(&self, question: &QuestionId, answer: Option<AnswerId>) -> bool {
        let mut store = self.inner.write();
        match store.positions.get(question).copied() {
            Some(pos) => {
                store.questions[pos].answer = answer;
                true
            }
            None => false,
        }
    }

    pub fn remove_question(&self, id: &QuestionId) -> Option<Question> {
        let mut guard = self.inner.write();
        let store = &mut *guard;
        let pos = store.positions.remove(id)?;
        let removed = store.questions.remove(pos);
        for (i, q) in store.questions.iter().enumerate().skip(pos) {
            store.positions.insert(q.id, i);
        }
        Some(removed)
    }

    pub fn remove_answer(&self, id: &AnswerId) -> Option<Answer> {
        self.inner.write().answers.remove(id)
    }

    pub fn question_count(&self) -> usize {
        self.inner.read().questions.len()
    }
}

impl QuestionRepository for InMemoryRepository {
    fn answered_questions(&self) -> anyhow::Result<Vec<Question>> {
        let store = self.inner.read();
        Ok(store
            .questions
            .iter()
            .filter(|q| q.is_answered())
            .cloned()
            .collect())
    }

    fn question(&self, id: &QuestionId) -> anyhow::Result<Option<Question>> {
        let store = self.inner.read();
        Ok(store.positions.get(id).map(|&pos| store.questions[pos].clone()))
    }

    fn answer(&self, id: &AnswerId) -> anyhow::Result<Option<Answer>> {
        Ok(self.inner.read().answers.get(id).cloned())
    }
}
