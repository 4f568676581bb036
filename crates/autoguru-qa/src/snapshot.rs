//! On-disk form of a published generation: the index and its id mapping
//! travel in one blob so they can only be restored together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use autoguru_core::types::{Question, QuestionId};
use autoguru_core::{Error, Result};
use autoguru_vector::{persist, Index, NearestNeighbors};

const SNAPSHOT_KIND: &str = "generation";

#[derive(Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub index: Index,
    pub question_ids: Vec<QuestionId>,
    pub built_at: DateTime<Utc>,
    pub fingerprint: String,
}

impl Snapshot {
    pub fn save(&self, path: &Path) -> Result<()> {
        persist::write_atomic(path, &persist::encode(SNAPSHOT_KIND, self)?)?;
        tracing::info!(path = %path.display(), rows = self.question_ids.len(), "snapshot saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let snapshot: Snapshot = persist::decode(SNAPSHOT_KIND, &bytes)?;
        snapshot.index.validate()?;
        if snapshot.question_ids.len() != snapshot.index.len() {
            return Err(Error::CorruptIndex(format!(
                "snapshot maps {} ids onto {} index rows",
                snapshot.question_ids.len(),
                snapshot.index.len()
            )));
        }
        tracing::info!(path = %path.display(), rows = snapshot.question_ids.len(), "snapshot loaded");
        Ok(snapshot)
    }
}

/// blake3 over ids and texts in index order.
pub(crate) fn fingerprint(questions: &[Question]) -> String {
    let mut hasher = blake3::Hasher::new();
    for q in questions {
        hasher.update(q.id.as_uuid().as_bytes());
        hasher.update(&(q.text.len() as u64).to_le_bytes());
        hasher.update(q.text.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}
