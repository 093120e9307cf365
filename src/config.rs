//! Pipeline configuration shared by extraction, storage and indexing.
//!
//! Every parameter that changes the numeric meaning of a feature vector lives
//! here and is passed explicitly into each component. The configuration is
//! persisted next to a feature table so stores stay self-describing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment override for the batch worker count.
pub const WORKER_COUNT_ENV: &str = "SAMPLEDEX_WORKERS";
/// Upper bound applied to explicit worker counts.
pub const MAX_WORKER_COUNT: u32 = 64;
/// Longest per-file extraction budget accepted by [`PipelineConfig::validate`].
pub const MAX_FILE_TIMEOUT_SECONDS: f32 = 86_400.0;

/// Errors raised while validating, loading or saving a [`PipelineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A parameter is outside its allowed range.
    #[error("Invalid pipeline config: {0}")]
    Invalid(String),
    /// Reading the TOML file failed.
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Writing the TOML file failed.
    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The TOML file could not be parsed.
    #[error("Failed to parse config {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// The configuration could not be serialized.
    #[error("Failed to serialize config for {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
}

/// Distance used by the vector index.
///
/// Only squared Euclidean distance is supported. Vectors are compared as
/// stored; callers wanting cosine similarity must L2-normalize before
/// building an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    #[serde(rename = "squared_l2")]
    SquaredEuclidean,
}

impl DistanceMetric {
    /// Stable identifier written into fingerprints and index blobs.
    pub fn id(self) -> &'static str {
        match self {
            Self::SquaredEuclidean => "squared_l2",
        }
    }
}

/// Extraction, framing and indexing parameters for one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Target sample rate every file is resampled to.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// STFT frame length in samples.
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    /// STFT hop length in samples.
    #[serde(default = "default_hop_size")]
    pub hop_size: usize,
    /// Number of mel bands feeding the MFCC and onset stages.
    #[serde(default = "default_n_mels")]
    pub n_mels: usize,
    /// Number of cepstral coefficients kept per frame.
    #[serde(default = "default_n_mfcc")]
    pub n_mfcc: usize,
    /// Fraction of spectral energy below the rolloff frequency.
    #[serde(default = "default_rolloff_fraction")]
    pub rolloff_fraction: f32,
    /// Dynamic range (dB) kept below the loudest mel cell.
    #[serde(default = "default_top_db")]
    pub top_db: f32,
    /// Slowest tempo the estimator may report.
    #[serde(default = "default_min_tempo_bpm")]
    pub min_tempo_bpm: f32,
    /// Fastest tempo the estimator may report.
    #[serde(default = "default_max_tempo_bpm")]
    pub max_tempo_bpm: f32,
    /// Centre of the log-normal tempo prior.
    #[serde(default = "default_start_bpm")]
    pub start_bpm: f32,
    /// Batch worker count override (0 = auto).
    #[serde(default)]
    pub worker_count: u32,
    /// Per-file extraction budget; expired files are skipped.
    #[serde(default = "default_file_timeout_seconds")]
    pub file_timeout_seconds: f32,
    /// Distance metric used by the index.
    #[serde(default)]
    pub metric: DistanceMetric,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frame_size: default_frame_size(),
            hop_size: default_hop_size(),
            n_mels: default_n_mels(),
            n_mfcc: default_n_mfcc(),
            rolloff_fraction: default_rolloff_fraction(),
            top_db: default_top_db(),
            min_tempo_bpm: default_min_tempo_bpm(),
            max_tempo_bpm: default_max_tempo_bpm(),
            start_bpm: default_start_bpm(),
            worker_count: 0,
            file_timeout_seconds: default_file_timeout_seconds(),
            metric: DistanceMetric::default(),
        }
    }
}

impl PipelineConfig {
    /// Reject parameter combinations the extractors cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be > 0".into()));
        }
        if self.frame_size < 2 {
            return Err(ConfigError::Invalid("frame_size must be >= 2".into()));
        }
        if self.hop_size == 0 {
            return Err(ConfigError::Invalid("hop_size must be > 0".into()));
        }
        if self.n_mels == 0 {
            return Err(ConfigError::Invalid("n_mels must be > 0".into()));
        }
        if self.n_mfcc == 0 || self.n_mfcc > self.n_mels {
            return Err(ConfigError::Invalid(format!(
                "n_mfcc must be in 1..={}, got {}",
                self.n_mels, self.n_mfcc
            )));
        }
        if !(self.rolloff_fraction > 0.0 && self.rolloff_fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "rolloff_fraction must be in (0, 1], got {}",
                self.rolloff_fraction
            )));
        }
        if !(self.top_db.is_finite() && self.top_db > 0.0) {
            return Err(ConfigError::Invalid("top_db must be positive".into()));
        }
        if !(self.min_tempo_bpm > 0.0 && self.min_tempo_bpm < self.max_tempo_bpm) {
            return Err(ConfigError::Invalid(format!(
                "tempo range {}..{} is empty",
                self.min_tempo_bpm, self.max_tempo_bpm
            )));
        }
        if !(self.start_bpm.is_finite() && self.start_bpm > 0.0) {
            return Err(ConfigError::Invalid("start_bpm must be positive".into()));
        }
        if !(self.file_timeout_seconds > 0.0
            && self.file_timeout_seconds <= MAX_FILE_TIMEOUT_SECONDS)
        {
            return Err(ConfigError::Invalid(format!(
                "file_timeout_seconds must be in (0, {MAX_FILE_TIMEOUT_SECONDS}], got {}",
                self.file_timeout_seconds
            )));
        }
        Ok(())
    }

    /// Length of the index vector produced under this configuration.
    pub fn vector_len(&self) -> usize {
        crate::analysis::features::SCALAR_DESCRIPTOR_COUNT + self.n_mfcc
    }

    /// Per-file extraction budget, clamped to the accepted range.
    pub fn file_timeout(&self) -> Duration {
        let seconds = self.file_timeout_seconds.max(0.001);
        Duration::try_from_secs_f32(seconds.min(MAX_FILE_TIMEOUT_SECONDS))
            .unwrap_or(Duration::from_secs(MAX_FILE_TIMEOUT_SECONDS as u64))
    }

    /// Resolve the batch worker count: explicit value, then env, then CPU count.
    pub fn resolved_worker_count(&self) -> usize {
        worker_count_with_override(self.worker_count)
    }

    /// Hash of every parameter that affects vector comparability.
    pub fn fingerprint(&self, key_estimator_id: &str) -> String {
        let payload = format!(
            "sr={}|frame={}|hop={}|mels={}|mfcc={}|rolloff={}|top_db={}|tempo={}..{}@{}|key={}|metric={}",
            self.sample_rate,
            self.frame_size,
            self.hop_size,
            self.n_mels,
            self.n_mfcc,
            self.rolloff_fraction,
            self.top_db,
            self.min_tempo_bpm,
            self.max_tempo_bpm,
            self.start_bpm,
            key_estimator_id,
            self.metric.id(),
        );
        let hash = blake3::hash(payload.as_bytes());
        format!("features_v1_{}", hash.to_hex())
    }

    /// Load a configuration from a TOML file; missing fields take defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty TOML, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let data = toml::to_string_pretty(self).map_err(|source| ConfigError::SerializeToml {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, data).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub(crate) fn worker_count_with_override(override_count: u32) -> usize {
    if override_count >= 1 {
        return override_count.min(MAX_WORKER_COUNT) as usize;
    }
    if let Ok(value) = std::env::var(WORKER_COUNT_ENV) {
        if let Ok(parsed) = value.trim().parse::<usize>() {
            if parsed >= 1 {
                return parsed.min(MAX_WORKER_COUNT as usize);
            }
        }
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(2)
        .max(1)
}

fn default_sample_rate() -> u32 {
    22_050
}

fn default_frame_size() -> usize {
    2048
}

fn default_hop_size() -> usize {
    512
}

fn default_n_mels() -> usize {
    128
}

fn default_n_mfcc() -> usize {
    13
}

fn default_rolloff_fraction() -> f32 {
    0.85
}

fn default_top_db() -> f32 {
    80.0
}

fn default_min_tempo_bpm() -> f32 {
    30.0
}

fn default_max_tempo_bpm() -> f32 {
    320.0
}

fn default_start_bpm() -> f32 {
    120.0
}

fn default_file_timeout_seconds() -> f32 {
    120.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.vector_len(), 4 + 13);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: PipelineConfig = toml::from_str("n_mfcc = 20\n").unwrap();
        assert_eq!(config.n_mfcc, 20);
        assert_eq!(config.sample_rate, 22_050);
        assert_eq!(config.metric, DistanceMetric::SquaredEuclidean);
    }

    #[test]
    fn metric_serializes_as_squared_l2() {
        let text = toml::to_string(&PipelineConfig::default()).unwrap();
        assert!(text.contains("metric = \"squared_l2\""));
    }

    #[test]
    fn validate_rejects_more_mfcc_than_mel_bands() {
        let config = PipelineConfig {
            n_mels: 10,
            n_mfcc: 11,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("n_mfcc"));
    }

    #[test]
    fn oversized_timeout_is_rejected_and_never_panics() {
        let config = PipelineConfig {
            file_timeout_seconds: 1e20,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(
            config.file_timeout(),
            Duration::from_secs(MAX_FILE_TIMEOUT_SECONDS as u64)
        );
        let nan = PipelineConfig {
            file_timeout_seconds: f32::NAN,
            ..PipelineConfig::default()
        };
        assert!(nan.validate().is_err());
        assert!(nan.file_timeout() > Duration::ZERO);
    }

    #[test]
    fn fingerprint_changes_with_framing() {
        let a = PipelineConfig::default();
        let b = PipelineConfig {
            hop_size: 256,
            ..PipelineConfig::default()
        };
        assert_ne!(a.fingerprint("k"), b.fingerprint("k"));
        assert_eq!(a.fingerprint("k"), a.clone().fingerprint("k"));
        assert!(a.fingerprint("k").starts_with("features_v1_"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("pipeline.toml");
        let config = PipelineConfig {
            n_mfcc: 20,
            worker_count: 3,
            ..PipelineConfig::default()
        };
        config.save_to_path(&path).unwrap();
        let loaded = PipelineConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn explicit_worker_count_wins() {
        assert_eq!(worker_count_with_override(3), 3);
        assert_eq!(worker_count_with_override(1000), MAX_WORKER_COUNT as usize);
        assert!(worker_count_with_override(0) >= 1);
    }
}
