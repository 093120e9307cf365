//! Signal frontend: decode a file to mono samples at the pipeline rate.

mod decode;
mod resample;

use std::path::Path;

pub use decode::DecodeError;
pub(crate) use decode::decode_interleaved;
pub(crate) use resample::resample_linear;

/// Mono samples at a known sample rate.
#[derive(Debug, Clone)]
pub struct MonoAudio {
    /// Time-domain samples, one per frame.
    pub samples: Vec<f32>,
    /// Rate the samples are expressed at.
    pub sample_rate: u32,
}

impl MonoAudio {
    /// Length of the signal in seconds.
    pub fn duration_seconds(&self) -> f32 {
        duration_seconds(self.samples.len(), self.sample_rate)
    }
}

/// Decode `path`, downmix to mono and resample to `sample_rate`.
///
/// The result depends only on the file bytes and `sample_rate`.
pub fn load_mono(path: &Path, sample_rate: u32) -> Result<MonoAudio, DecodeError> {
    let decoded = decode_interleaved(path)?;
    let mono = downmix_to_mono(&decoded.samples, decoded.channels);
    let samples = resample_linear(&mono, decoded.sample_rate, sample_rate);
    Ok(MonoAudio {
        samples,
        sample_rate: sample_rate.max(1),
    })
}

pub(crate) fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return samples.iter().copied().map(sanitize_sample).collect();
    }
    let frames = samples.len() / channels;
    let mut mono = Vec::with_capacity(frames);
    for frame in samples.chunks_exact(channels) {
        let sum: f32 = frame.iter().copied().map(sanitize_sample).sum();
        mono.push(sum / channels as f32);
    }
    mono
}

pub(crate) fn duration_seconds(sample_count: usize, sample_rate: u32) -> f32 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f32 / sample_rate as f32
}

fn sanitize_sample(sample: f32) -> f32 {
    if sample.is_finite() {
        sample.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::TempDir;

    #[test]
    fn downmix_averages_channels_and_drops_partial_frames() {
        let mono = downmix_to_mono(&[1.0, 0.0, 0.5, 0.5, 0.25], 2);
        assert_eq!(mono, vec![0.5, 0.5]);
    }

    #[test]
    fn downmix_replaces_non_finite_samples() {
        let mono = downmix_to_mono(&[f32::NAN, 2.0, -0.5], 1);
        assert_eq!(mono, vec![0.0, 1.0, -0.5]);
    }

    #[test]
    fn load_mono_decodes_stereo_wav_to_target_rate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..(44_100 / 10) {
            writer.write_sample::<f32>(0.5).unwrap();
            writer.write_sample::<f32>(0.0).unwrap();
        }
        writer.finalize().unwrap();

        let audio = load_mono(&path, 22_050).unwrap();
        assert_eq!(audio.sample_rate, 22_050);
        assert!((audio.duration_seconds() - 0.1).abs() < 0.01);
        assert!(audio.samples.iter().all(|s| (s - 0.25).abs() < 1e-4));
    }

    #[test]
    fn load_mono_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for i in 0..4_000 {
            let v = (i as f32 * 0.05).sin() * 12_000.0;
            writer.write_sample::<i16>(v as i16).unwrap();
        }
        writer.finalize().unwrap();

        let a = load_mono(&path, 22_050).unwrap();
        let b = load_mono(&path, 22_050).unwrap();
        assert_eq!(a.samples, b.samples);
    }

    #[test]
    fn load_mono_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"definitely not a riff header").unwrap();
        assert!(load_mono(&path, 22_050).is_err());
    }

    #[test]
    fn load_mono_reports_missing_file() {
        let err = load_mono(Path::new("/nonexistent/sampledex.wav"), 22_050).unwrap_err();
        assert!(matches!(err, DecodeError::Open { .. }));
    }
}
