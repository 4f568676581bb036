//! Self-contained index blobs.
//!
//! Every blob is a JSON envelope carrying a format tag, a version, the kind of
//! payload and a creation timestamp. Loading never touches the original corpus
//! or embedder; the payload is structurally validated before it is returned.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use autoguru_core::{Error, Result};

use crate::index::Index;

pub const FORMAT: &str = "autoguru-index";
pub const VERSION: u32 = 1;
const INDEX_KIND: &str = "index";

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    format: &'a str,
    version: u32,
    kind: &'a str,
    created_at: i64,
    payload: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    format: String,
    version: u32,
    kind: String,
    payload: T,
}

/// Wraps any serializable payload in the versioned envelope.
pub fn encode<T: Serialize>(kind: &str, payload: &T) -> Result<Vec<u8>> {
    let envelope = EnvelopeRef {
        format: FORMAT,
        version: VERSION,
        kind,
        created_at: Utc::now().timestamp_millis(),
        payload,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

pub fn decode<T: DeserializeOwned>(kind: &str, bytes: &[u8]) -> Result<T> {
    let envelope: Envelope<T> =
        serde_json::from_slice(bytes).map_err(|e| Error::CorruptIndex(format!("unreadable blob: {e}")))?;
    if envelope.format != FORMAT {
        return Err(Error::CorruptIndex(format!("unexpected format {:?}", envelope.format)));
    }
    if envelope.version != VERSION {
        return Err(Error::CorruptIndex(format!("unsupported version {}", envelope.version)));
    }
    if envelope.kind != kind {
        return Err(Error::CorruptIndex(format!("expected {kind} blob, found {}", envelope.kind)));
    }
    Ok(envelope.payload)
}

pub fn to_bytes(index: &Index) -> Result<Vec<u8>> {
    encode(INDEX_KIND, index)
}

pub fn from_bytes(bytes: &[u8]) -> Result<Index> {
    let index: Index = decode(INDEX_KIND, bytes)?;
    index.validate()?;
    Ok(index)
}

pub fn save(index: &Index, path: &Path) -> Result<()> {
    write_atomic(path, &to_bytes(index)?)?;
    tracing::info!(path = %path.display(), "index saved");
    Ok(())
}

pub fn load(path: &Path) -> Result<Index> {
    let bytes = std::fs::read(path)?;
    let index = from_bytes(&bytes)?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "index loaded");
    Ok(index)
}

/// Writes through a temp file in the target directory, then renames over
/// `path`; readers never observe a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
