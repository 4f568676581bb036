//! Domain types shared by the embedding, index and answering crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionId(Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerId(Uuid);

macro_rules! uuid_id {
    ($name:ident) => {
        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

uuid_id!(QuestionId);
uuid_id!(AnswerId);

/// A previously asked question.
///
/// Only questions whose `answer` is set take part in retrieval; the rest are
/// persisted but never indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    pub formatted_text: String,
    pub answer: Option<AnswerId>,
}

impl Question {
    /// Creates an unanswered question, deriving `formatted_text` from `text`.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: QuestionId::new(),
            formatted_text: format_text(&text),
            text,
            answer: None,
        }
    }

    pub fn with_id(mut self, id: QuestionId) -> Self {
        self.id = id;
        self
    }

    pub fn with_answer(mut self, answer: AnswerId) -> Self {
        self.answer = Some(answer);
        self
    }

    pub fn with_formatted_text(mut self, formatted: impl Into<String>) -> Self {
        self.formatted_text = formatted.into();
        self
    }

    pub fn is_answered(&self) -> bool {
        self.answer.is_some()
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, preview(&self.formatted_text))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub text: String,
    pub formatted_text: String,
}

impl Answer {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: AnswerId::new(),
            formatted_text: format_text(&text),
            text,
        }
    }

    pub fn with_id(mut self, id: AnswerId) -> Self {
        self.id = id;
        self
    }

    pub fn with_formatted_text(mut self, formatted: impl Into<String>) -> Self {
        self.formatted_text = formatted.into();
        self
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, preview(&self.formatted_text))
    }
}

/// One index hit: `position` is the row of the vector at build time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub position: usize,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarQuestion {
    pub question: Question,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionAnswer {
    pub answer: Answer,
    pub confidence: f32,
}

/// Normalized form stored next to the raw text: whitespace runs collapsed, trimmed.
pub fn format_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
