//! Feature assembly: one file in, one [`FeatureRecord`] out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::audio::{self, DecodeError};
use super::key::{ChromaArgmaxKey, KeyEstimator, PitchClass};
use super::mel::MelBank;
use super::spectral::spectral_shape;
use super::spectrogram::StftPlan;
use super::tempo::{TempoParams, estimate_tempo, onset_strength};
use crate::config::{ConfigError, PipelineConfig};

/// Scalars ahead of the MFCCs in the index vector: tempo, centroid, bandwidth, rolloff.
pub const SCALAR_DESCRIPTOR_COUNT: usize = 4;

/// Failure to turn one file into a record.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The file exceeded its extraction budget.
    #[error("Extraction of {path} timed out after {seconds:.1}s")]
    Timeout { path: PathBuf, seconds: f32 },
    /// A descriptor came out as NaN or infinite.
    #[error("Non-finite {field} for {path}")]
    NonFinite { path: PathBuf, field: String },
    /// The extraction thread died before reporting a result.
    #[error("Extraction of {path} panicked")]
    Panicked { path: PathBuf },
}

/// Descriptors and identity of one analysed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub file_name: String,
    pub file_path: String,
    pub duration_sec: f32,
    pub tempo_bpm: f32,
    /// Advisory label; not part of the index vector.
    #[serde(with = "pitch_label")]
    pub estimated_key: PitchClass,
    pub spectral_centroid: f32,
    pub spectral_bandwidth: f32,
    pub spectral_rolloff: f32,
    pub mfcc: Vec<f32>,
}

impl FeatureRecord {
    /// Index vector: tempo, centroid, bandwidth, rolloff, then the MFCCs.
    pub fn numeric_vector(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(SCALAR_DESCRIPTOR_COUNT + self.mfcc.len());
        out.push(self.tempo_bpm);
        out.push(self.spectral_centroid);
        out.push(self.spectral_bandwidth);
        out.push(self.spectral_rolloff);
        out.extend_from_slice(&self.mfcc);
        out
    }

    /// Name of the first numeric field that is NaN or infinite.
    pub fn first_non_finite(&self) -> Option<String> {
        let scalars = [
            ("duration_sec", self.duration_sec),
            ("tempo_bpm", self.tempo_bpm),
            ("spectral_centroid", self.spectral_centroid),
            ("spectral_bandwidth", self.spectral_bandwidth),
            ("spectral_rolloff", self.spectral_rolloff),
        ];
        if let Some((name, _)) = scalars.iter().find(|(_, v)| !v.is_finite()) {
            return Some((*name).to_string());
        }
        self.mfcc
            .iter()
            .position(|v| !v.is_finite())
            .map(|idx| format!("mfcc_{}", idx + 1))
    }
}

mod pitch_label {
    use super::PitchClass;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(key: &PitchClass, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(key.label())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<PitchClass, D::Error> {
        let label = String::deserialize(d)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}

/// Runs the signal frontend and every descriptor extractor with one configuration.
///
/// Cheap to share across threads; all planning happens in [`FeatureExtractor::new`].
pub struct FeatureExtractor {
    config: PipelineConfig,
    key_estimator: Arc<dyn KeyEstimator>,
    stft: StftPlan,
    mel_bank: MelBank,
}

impl FeatureExtractor {
    /// Extractor with the default chroma-argmax key strategy.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        Self::with_key_estimator(config, Arc::new(ChromaArgmaxKey))
    }

    /// Extractor with a custom key strategy. Rejects configs that fail
    /// [`PipelineConfig::validate`].
    pub fn with_key_estimator(
        config: PipelineConfig,
        key_estimator: Arc<dyn KeyEstimator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let stft = StftPlan::new(config.frame_size, config.hop_size);
        let mel_bank = MelBank::new(config.sample_rate, config.frame_size, config.n_mels);
        Ok(Self {
            config,
            key_estimator,
            stft,
            mel_bank,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Identifier of the key strategy in use.
    pub fn key_estimator_id(&self) -> &'static str {
        self.key_estimator.id()
    }

    /// Fingerprint of this extractor's numeric output.
    pub fn fingerprint(&self) -> String {
        self.config.fingerprint(self.key_estimator.id())
    }

    /// Decode `path` and extract its record; the record is keyed by the file name.
    pub fn extract_file(&self, path: &Path) -> Result<FeatureRecord, ExtractError> {
        let mono = audio::load_mono(path, self.config.sample_rate)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let record = self.extract_samples(&file_name, &path.to_string_lossy(), &mono.samples);
        match record.first_non_finite() {
            Some(field) => Err(ExtractError::NonFinite {
                path: path.to_path_buf(),
                field,
            }),
            None => Ok(record),
        }
    }

    /// Extract a record from mono samples already at the configured rate.
    pub fn extract_samples(
        &self,
        file_name: &str,
        file_path: &str,
        samples: &[f32],
    ) -> FeatureRecord {
        let sr = self.config.sample_rate;
        let spec = self.stft.compute(samples, sr);
        let shape = spectral_shape(&spec, self.config.rolloff_fraction);
        let log_mel = self.mel_bank.log_mel(&spec, self.config.top_db);
        let mfcc = log_mel.mfcc_means(self.config.n_mfcc);
        let tempo_bpm = estimate_tempo(
            &onset_strength(&log_mel),
            &TempoParams {
                sample_rate: sr,
                hop_size: self.config.hop_size,
                min_bpm: self.config.min_tempo_bpm,
                max_bpm: self.config.max_tempo_bpm,
                start_bpm: self.config.start_bpm,
            },
        );
        FeatureRecord {
            file_name: file_name.to_string(),
            file_path: file_path.to_string(),
            duration_sec: audio::duration_seconds(samples.len(), sr),
            tempo_bpm,
            estimated_key: self.key_estimator.estimate(&spec),
            spectral_centroid: shape.centroid_hz,
            spectral_bandwidth: shape.bandwidth_hz,
            spectral_rolloff: shape.rolloff_hz,
            mfcc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::spectrogram::Spectrogram;
    use std::f32::consts::PI;

    fn click_train(sr: u32, period_samples: usize, seconds: f32) -> Vec<f32> {
        let len = (sr as f32 * seconds) as usize;
        (0..len)
            .map(|i| {
                let phase = i % period_samples;
                if phase < 200 {
                    (2.0 * PI * 1_500.0 * i as f32 / sr as f32).sin() * (1.0 - phase as f32 / 200.0)
                } else {
                    0.0
                }
            })
            .collect()
    }

    struct AlwaysD;

    impl KeyEstimator for AlwaysD {
        fn id(&self) -> &'static str {
            "always_d"
        }

        fn estimate(&self, _spectrogram: &Spectrogram) -> PitchClass {
            PitchClass::D
        }
    }

    #[test]
    fn record_json_uses_key_labels() {
        let json = serde_json::json!({
            "file_name": "pad.wav",
            "file_path": "/audio/pad.wav",
            "duration_sec": 2.0,
            "tempo_bpm": 0.0,
            "estimated_key": "Bb",
            "spectral_centroid": 800.0,
            "spectral_bandwidth": 300.0,
            "spectral_rolloff": 1_500.0,
            "mfcc": [-300.0, 12.5],
        });
        let record: FeatureRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.estimated_key, PitchClass::ASharp);
        assert_eq!(serde_json::to_value(&record).unwrap()["estimated_key"], "A#");

        let bad = serde_json::json!({
            "file_name": "x", "file_path": "", "duration_sec": 1.0, "tempo_bpm": 0.0,
            "estimated_key": "H", "spectral_centroid": 0.0, "spectral_bandwidth": 0.0,
            "spectral_rolloff": 0.0, "mfcc": [],
        });
        assert!(serde_json::from_value::<FeatureRecord>(bad).is_err());
    }

    #[test]
    fn numeric_vector_has_fixed_layout() {
        let extractor = FeatureExtractor::new(PipelineConfig::default()).unwrap();
        let samples = click_train(22_050, 11_025, 3.0);
        let record = extractor.extract_samples("a.wav", "/tmp/a.wav", &samples);
        let vector = record.numeric_vector();
        assert_eq!(vector.len(), extractor.config().vector_len());
        assert_eq!(vector[0], record.tempo_bpm);
        assert_eq!(vector[3], record.spectral_rolloff);
        assert_eq!(&vector[4..], record.mfcc.as_slice());
        assert!(record.first_non_finite().is_none());
    }

    #[test]
    fn click_train_tempo_is_near_pulse_rate() {
        let extractor = FeatureExtractor::new(PipelineConfig::default()).unwrap();
        // One click every 22 hops, about 117.5 BPM.
        let record = extractor.extract_samples("clicks", "", &click_train(22_050, 22 * 512, 8.0));
        let expected = 60.0 * 22_050.0 / (22.0 * 512.0);
        assert!((record.tempo_bpm - expected).abs() < 3.0, "tempo={}", record.tempo_bpm);
        assert!((record.duration_sec - 8.0).abs() < 1e-3);
    }

    #[test]
    fn silence_yields_zero_tempo_and_finite_vector() {
        let extractor = FeatureExtractor::new(PipelineConfig::default()).unwrap();
        let record = extractor.extract_samples("quiet", "", &vec![0.0; 22_050]);
        assert_eq!(record.tempo_bpm, 0.0);
        assert_eq!(record.spectral_centroid, 0.0);
        assert!(record.first_non_finite().is_none());
    }

    #[test]
    fn extraction_is_deterministic() {
        let extractor = FeatureExtractor::new(PipelineConfig::default()).unwrap();
        let samples = click_train(22_050, 9_000, 2.0);
        let a = extractor.extract_samples("x", "", &samples);
        let b = extractor.extract_samples("x", "", &samples);
        assert_eq!(a, b);
    }

    #[test]
    fn key_strategy_is_pluggable_and_fingerprinted() {
        let config = PipelineConfig::default();
        let custom =
            FeatureExtractor::with_key_estimator(config.clone(), Arc::new(AlwaysD)).unwrap();
        let default = FeatureExtractor::new(config).unwrap();
        let record = custom.extract_samples("x", "", &click_train(22_050, 9_000, 1.0));
        assert_eq!(record.estimated_key, PitchClass::D);
        assert_ne!(custom.fingerprint(), default.fingerprint());
    }

    #[test]
    fn first_non_finite_names_the_field() {
        let extractor = FeatureExtractor::new(PipelineConfig::default()).unwrap();
        let mut record = extractor.extract_samples("x", "", &vec![0.0; 4_096]);
        record.mfcc[2] = f32::NAN;
        assert_eq!(record.first_non_finite().as_deref(), Some("mfcc_3"));
        record.tempo_bpm = f32::INFINITY;
        assert_eq!(record.first_non_finite().as_deref(), Some("tempo_bpm"));
    }

    #[test]
    fn missing_file_is_a_decode_error() {
        let extractor = FeatureExtractor::new(PipelineConfig::default()).unwrap();
        let err = extractor
            .extract_file(Path::new("/nonexistent/sampledex/missing.wav"))
            .unwrap_err();
        assert!(matches!(err, ExtractError::Decode(DecodeError::Open { .. })));
    }
}
