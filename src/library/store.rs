//! Feature store: the ordered, self-describing set of records for one pipeline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::batch::{FileFailure, extract_batch};
use super::scan::{ScanError, discover_audio_files};
use super::tabular::{self, TabularError};
use crate::analysis::features::{FeatureExtractor, FeatureRecord, SCALAR_DESCRIPTOR_COUNT};
use crate::analysis::key::PitchClass;
use crate::config::{ConfigError, PipelineConfig};

const FIXED_COLUMNS: [&str; 8] = [
    "file_name",
    "file_path",
    "duration_sec",
    "tempo_bpm",
    "estimated_key",
    "spectral_centroid",
    "spectral_bandwidth",
    "spectral_rolloff",
];

/// Errors raised while building, persisting or reading a [`FeatureStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A build produced no usable record.
    #[error("No usable records ({failed} files failed)")]
    EmptyStore { failed: usize },
    /// No record has the requested name.
    #[error("No record named {0:?}")]
    NotFound(String),
    /// A record's vector length differs from the store's schema.
    #[error("Record {file_name:?} has {found} values, store expects {expected}")]
    DimensionMismatch {
        file_name: String,
        expected: usize,
        found: usize,
    },
    /// A record carries NaN or infinite values.
    #[error("Record {file_name:?} has non-finite {field}")]
    NonFinite { file_name: String, field: String },
    /// Reading or writing the table failed.
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The table text is malformed.
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: TabularError,
    },
    /// The table does not match the schema described by its sidecar.
    #[error("Schema mismatch in {path}: {message}")]
    Schema { path: PathBuf, message: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// Configuration persisted next to a feature table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoreSidecar {
    fingerprint: String,
    key_estimator: String,
    pipeline: PipelineConfig,
}

/// A finished build: the store plus every file that was skipped.
#[derive(Debug)]
pub struct StoreBuild {
    pub store: FeatureStore,
    pub failures: Vec<FileFailure>,
}

/// Ordered records sharing one vector schema, unique by `file_name`.
///
/// Inserting a name that already exists replaces the earlier record in
/// place; positions of other records never change.
#[derive(Debug, Clone)]
pub struct FeatureStore {
    config: PipelineConfig,
    key_estimator: String,
    fingerprint: String,
    records: Vec<FeatureRecord>,
    positions: HashMap<String, usize>,
}

impl FeatureStore {
    /// Empty store for records produced under `config` with the given key strategy.
    ///
    /// Rejects configs that [`load`](Self::load) would refuse to read back.
    pub fn new(config: PipelineConfig, key_estimator_id: &str) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Self::with_validated(config, key_estimator_id))
    }

    fn with_validated(config: PipelineConfig, key_estimator_id: &str) -> Self {
        let fingerprint = config.fingerprint(key_estimator_id);
        Self {
            config,
            key_estimator: key_estimator_id.to_string(),
            fingerprint,
            records: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Empty store matching `extractor`'s output schema.
    pub fn for_extractor(extractor: &FeatureExtractor) -> Self {
        Self::with_validated(extractor.config().clone(), extractor.key_estimator_id())
    }

    /// Extract `files` in parallel and collect every successful record.
    ///
    /// Fails only when no file yields a record.
    pub fn build(
        extractor: Arc<FeatureExtractor>,
        files: Vec<PathBuf>,
    ) -> Result<StoreBuild, StoreError> {
        let mut store = Self::for_extractor(&extractor);
        let report = extract_batch(extractor, files);
        for record in report.records {
            store.insert(record)?;
        }
        if store.is_empty() {
            return Err(StoreError::EmptyStore {
                failed: report.failures.len(),
            });
        }
        info!(
            "Built feature store with {} records ({} skipped)",
            store.len(),
            report.failures.len()
        );
        Ok(StoreBuild {
            store,
            failures: report.failures,
        })
    }

    /// Discover audio files directly in `dir` and [`build`](Self::build) from them.
    pub fn build_from_dir(
        extractor: Arc<FeatureExtractor>,
        dir: &Path,
        limit: Option<usize>,
    ) -> Result<StoreBuild, StoreError> {
        let files = discover_audio_files(dir, limit)?;
        Self::build(extractor, files)
    }

    /// Add `record`, replacing any record with the same name.
    pub fn insert(&mut self, record: FeatureRecord) -> Result<(), StoreError> {
        if let Some(field) = record.first_non_finite() {
            return Err(StoreError::NonFinite {
                file_name: record.file_name,
                field,
            });
        }
        let expected = self.dimension();
        let found = SCALAR_DESCRIPTOR_COUNT + record.mfcc.len();
        if found != expected {
            return Err(StoreError::DimensionMismatch {
                file_name: record.file_name,
                expected,
                found,
            });
        }
        match self.positions.get(&record.file_name) {
            Some(&pos) => {
                debug!("Replacing record {}", record.file_name);
                self.records[pos] = record;
            }
            None => {
                self.positions.insert(record.file_name.clone(), self.records.len());
                self.records.push(record);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in store order; row `i` of an index built from this store is `records()[i]`.
    pub fn records(&self) -> &[FeatureRecord] {
        &self.records
    }

    pub fn record_at(&self, position: usize) -> Option<&FeatureRecord> {
        self.records.get(position)
    }

    pub fn get(&self, file_name: &str) -> Option<&FeatureRecord> {
        self.position_of(file_name).map(|pos| &self.records[pos])
    }

    pub fn position_of(&self, file_name: &str) -> Option<usize> {
        self.positions.get(file_name).copied()
    }

    /// Index vector of the named record.
    pub fn vector_of(&self, file_name: &str) -> Result<Vec<f32>, StoreError> {
        self.get(file_name)
            .map(FeatureRecord::numeric_vector)
            .ok_or_else(|| StoreError::NotFound(file_name.to_string()))
    }

    /// Length of every index vector in this store.
    pub fn dimension(&self) -> usize {
        self.config.vector_len()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Schema fingerprint; stores are comparable iff their fingerprints match.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Hash of the fingerprint plus every record name and vector, in order.
    ///
    /// Identifies this exact store content; an index built from it records the
    /// hash so it cannot be paired with a different store later.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.fingerprint.as_bytes());
        for record in &self.records {
            hasher.update(&(record.file_name.len() as u64).to_le_bytes());
            hasher.update(record.file_name.as_bytes());
            for value in record.numeric_vector() {
                hasher.update(&value.to_le_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Column names in persisted order.
    pub fn header(&self) -> Vec<String> {
        header_for(self.config.n_mfcc)
    }

    /// Write the table to `path` and the configuration to its sidecar.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let header = self.header();
        let header_refs: Vec<&str> = header.iter().map(String::as_str).collect();
        let text = tabular::encode(&header_refs, self.records.iter().map(record_to_row));
        std::fs::write(path, text).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let sidecar = StoreSidecar {
            fingerprint: self.fingerprint.clone(),
            key_estimator: self.key_estimator.clone(),
            pipeline: self.config.clone(),
        };
        let sidecar_path = sidecar_path(path);
        let data = toml::to_string_pretty(&sidecar).map_err(|source| ConfigError::SerializeToml {
            path: sidecar_path.clone(),
            source,
        })?;
        std::fs::write(&sidecar_path, data).map_err(|source| ConfigError::Write {
            path: sidecar_path.clone(),
            source,
        })?;
        info!("Saved {} records to {}", self.len(), path.display());
        Ok(())
    }

    /// Read a table written by [`save`](Self::save), validating it against its sidecar.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let sidecar = read_sidecar(&sidecar_path(path))?;
        sidecar.pipeline.validate()?;
        let expected_fingerprint = sidecar.pipeline.fingerprint(&sidecar.key_estimator);
        if expected_fingerprint != sidecar.fingerprint {
            return Err(StoreError::Schema {
                path: path.to_path_buf(),
                message: format!(
                    "sidecar fingerprint {} does not match its configuration ({expected_fingerprint})",
                    sidecar.fingerprint
                ),
            });
        }

        let text = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = tabular::decode(&text).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let mut store = Self::with_validated(sidecar.pipeline, &sidecar.key_estimator);
        let header = store.header();
        if table.header != header {
            return Err(StoreError::Schema {
                path: path.to_path_buf(),
                message: format!(
                    "header has {} columns, expected {} ({}..)",
                    table.header.len(),
                    header.len(),
                    header.first().map(String::as_str).unwrap_or_default()
                ),
            });
        }
        for (line, row) in table.rows {
            let record =
                row_to_record(&row, store.config.n_mfcc).map_err(|message| StoreError::Parse {
                    path: path.to_path_buf(),
                    source: TabularError { line, message },
                })?;
            store.insert(record)?;
        }
        info!("Loaded {} records from {}", store.len(), path.display());
        Ok(store)
    }
}

/// Sidecar configuration path for a table: `<table file name>.config.toml`.
pub fn sidecar_path(table_path: &Path) -> PathBuf {
    let mut name = table_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".config.toml");
    table_path.with_file_name(name)
}

fn read_sidecar(path: &Path) -> Result<StoreSidecar, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

fn header_for(n_mfcc: usize) -> Vec<String> {
    FIXED_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain((1..=n_mfcc).map(|i| format!("mfcc_{i}")))
        .collect()
}

fn record_to_row(record: &FeatureRecord) -> Vec<String> {
    let mut row = vec![
        record.file_name.clone(),
        record.file_path.clone(),
        record.duration_sec.to_string(),
        record.tempo_bpm.to_string(),
        record.estimated_key.label().to_string(),
        record.spectral_centroid.to_string(),
        record.spectral_bandwidth.to_string(),
        record.spectral_rolloff.to_string(),
    ];
    row.extend(record.mfcc.iter().map(f32::to_string));
    row
}

fn row_to_record(row: &[String], n_mfcc: usize) -> Result<FeatureRecord, String> {
    if row.len() != FIXED_COLUMNS.len() + n_mfcc {
        return Err(format!(
            "expected {} fields, found {}",
            FIXED_COLUMNS.len() + n_mfcc,
            row.len()
        ));
    }
    let number = |idx: usize| -> Result<f32, String> {
        row[idx]
            .trim()
            .parse::<f32>()
            .map_err(|err| format!("{}: {err} ({:?})", column_name(idx), row[idx]))
    };
    let estimated_key: PitchClass = row[4].parse().map_err(|err| format!("estimated_key: {err}"))?;
    let mfcc = (FIXED_COLUMNS.len()..row.len())
        .map(&number)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FeatureRecord {
        file_name: row[0].clone(),
        file_path: row[1].clone(),
        duration_sec: number(2)?,
        tempo_bpm: number(3)?,
        estimated_key,
        spectral_centroid: number(5)?,
        spectral_bandwidth: number(6)?,
        spectral_rolloff: number(7)?,
        mfcc,
    })
}

fn column_name(idx: usize) -> String {
    FIXED_COLUMNS
        .get(idx)
        .map(|c| c.to_string())
        .unwrap_or_else(|| format!("mfcc_{}", idx + 1 - FIXED_COLUMNS.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(n_mfcc: usize) -> PipelineConfig {
        PipelineConfig {
            n_mfcc,
            ..PipelineConfig::default()
        }
    }

    fn record(name: &str, tempo: f32, n_mfcc: usize) -> FeatureRecord {
        FeatureRecord {
            file_name: name.to_string(),
            file_path: format!("/audio/{name}"),
            duration_sec: 1.25,
            tempo_bpm: tempo,
            estimated_key: PitchClass::FSharp,
            spectral_centroid: 1_234.567,
            spectral_bandwidth: 0.1 + 0.2,
            spectral_rolloff: 4_000.0,
            mfcc: (0..n_mfcc).map(|i| -(i as f32) / 3.0).collect(),
        }
    }

    #[test]
    fn invalid_config_never_produces_a_store() {
        let config = PipelineConfig {
            n_mels: 10,
            n_mfcc: 20,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            FeatureStore::new(config.clone(), "k"),
            Err(StoreError::Config(_))
        ));
        assert!(FeatureExtractor::new(config).is_err());
    }

    #[test]
    fn insert_is_last_write_wins_in_place() {
        let mut store = FeatureStore::new(config(3), "k").unwrap();
        store.insert(record("a", 100.0, 3)).unwrap();
        store.insert(record("b", 110.0, 3)).unwrap();
        store.insert(record("a", 140.0, 3)).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.position_of("a"), Some(0));
        assert_eq!(store.records()[0].tempo_bpm, 140.0);
    }

    #[test]
    fn insert_rejects_schema_drift_and_non_finite_values() {
        let mut store = FeatureStore::new(config(3), "k").unwrap();
        let err = store.insert(record("a", 100.0, 4)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch { expected: 7, found: 8, .. }
        ));
        let mut bad = record("b", 100.0, 3);
        bad.spectral_rolloff = f32::NAN;
        assert!(matches!(store.insert(bad).unwrap_err(), StoreError::NonFinite { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn vector_of_reports_missing_names() {
        let mut store = FeatureStore::new(config(2), "k").unwrap();
        store.insert(record("a", 99.0, 2)).unwrap();
        assert_eq!(store.vector_of("a").unwrap()[0], 99.0);
        assert!(matches!(store.vector_of("zzz"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn save_load_round_trip_is_exact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.csv");
        let mut store = FeatureStore::new(config(5), "chroma_argmax_v1").unwrap();
        store.insert(record("kick, hard.wav", 120.0, 5)).unwrap();
        store.insert(record("snare \"tight\".wav", 93.371_25, 5)).unwrap();
        store.save(&path).unwrap();
        assert!(sidecar_path(&path).ends_with("features.csv.config.toml"));

        let loaded = FeatureStore::load(&path).unwrap();
        assert_eq!(loaded.records(), store.records());
        assert_eq!(loaded.fingerprint(), store.fingerprint());
        assert_eq!(loaded.config(), store.config());
        assert_eq!(loaded.content_hash(), store.content_hash());
    }

    #[test]
    fn load_rejects_header_that_disagrees_with_sidecar() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.csv");
        let mut store = FeatureStore::new(config(3), "k").unwrap();
        store.insert(record("a", 120.0, 3)).unwrap();
        store.save(&path).unwrap();

        let mut sidecar = read_sidecar(&sidecar_path(&path)).unwrap();
        sidecar.pipeline.n_mfcc = 4;
        sidecar.fingerprint = sidecar.pipeline.fingerprint("k");
        std::fs::write(sidecar_path(&path), toml::to_string(&sidecar).unwrap()).unwrap();

        assert!(matches!(
            FeatureStore::load(&path).unwrap_err(),
            StoreError::Schema { .. }
        ));
    }

    #[test]
    fn load_reports_bad_numbers_with_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.csv");
        let mut store = FeatureStore::new(config(1), "k").unwrap();
        store.insert(record("a", 120.0, 1)).unwrap();
        store.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap().replace("120", "fast");
        std::fs::write(&path, text).unwrap();

        match FeatureStore::load(&path).unwrap_err() {
            StoreError::Parse { source, .. } => {
                assert_eq!(source.line, 2);
                assert!(source.message.contains("tempo_bpm"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_sidecar_is_a_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("orphan.csv");
        std::fs::write(&path, "file_name\n").unwrap();
        assert!(matches!(
            FeatureStore::load(&path).unwrap_err(),
            StoreError::Config(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn content_hash_tracks_records() {
        let mut a = FeatureStore::new(config(2), "k").unwrap();
        a.insert(record("a", 120.0, 2)).unwrap();
        let mut b = a.clone();
        assert_eq!(a.content_hash(), b.content_hash());
        b.insert(record("b", 60.0, 2)).unwrap();
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
