//! Join of the acquisition subsystem's line-delimited metadata onto records.
//!
//! Each line of the metadata file is one JSON object. The join key is the
//! object's `file_name` field when present, otherwise the downloader's naming
//! rule `<id>_<name with spaces replaced by underscores>.mp3`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::analysis::features::FeatureRecord;

/// Errors raised while reading a metadata file.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Failed to read metadata {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Metadata objects keyed by the audio file name they describe.
#[derive(Debug, Clone, Default)]
pub struct MetadataIndex {
    entries: HashMap<String, Map<String, Value>>,
}

impl MetadataIndex {
    /// Read a JSONL file. Malformed or unkeyed lines are skipped; later lines win.
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let text = std::fs::read_to_string(path).map_err(|source| MetadataError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let index = Self::parse(&text);
        info!("Loaded metadata for {} files from {}", index.len(), path.display());
        Ok(index)
    }

    /// Parse JSONL text with the same rules as [`load`](Self::load).
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let object = match serde_json::from_str::<Value>(line) {
                Ok(Value::Object(object)) => object,
                Ok(_) => {
                    warn!("Skipping metadata line {}: not a JSON object", idx + 1);
                    continue;
                }
                Err(err) => {
                    warn!("Skipping metadata line {}: {err}", idx + 1);
                    continue;
                }
            };
            let Some(key) = join_key(&object) else {
                warn!("Skipping metadata line {}: no file_name or id/name", idx + 1);
                continue;
            };
            entries.insert(key, object);
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, file_name: &str) -> Option<&Map<String, Value>> {
        self.entries.get(file_name)
    }

    /// Metadata for `record`, matched on its file name.
    pub fn lookup(&self, record: &FeatureRecord) -> Option<&Map<String, Value>> {
        self.get(&record.file_name)
    }
}

/// File name an object describes, if it can be determined.
pub fn join_key(object: &Map<String, Value>) -> Option<String> {
    if let Some(Value::String(name)) = object.get("file_name") {
        return Some(name.clone());
    }
    let id = match object.get("id")? {
        Value::String(id) => id.clone(),
        Value::Number(id) => id.to_string(),
        _ => return None,
    };
    let name = object.get("name")?.as_str()?;
    Some(format!("{id}_{}.mp3", name.replace(' ', "_")))
}
