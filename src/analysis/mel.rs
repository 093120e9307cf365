//! Mel filter bank, log-mel spectrogram and cepstral coefficients.

use super::spectrogram::Spectrogram;

const POWER_FLOOR: f32 = 1e-10;

/// Triangular mel filter bank over the bins of one STFT size.
pub(crate) struct MelBank {
    filters: Vec<Vec<(usize, f32)>>,
}

impl MelBank {
    pub(crate) fn new(sample_rate: u32, frame_size: usize, mel_bands: usize) -> Self {
        let bins = frame_size / 2 + 1;
        let sr = sample_rate.max(1) as f32;
        let bin_hz = sr / frame_size.max(1) as f32;
        let mel_max = hz_to_mel(sr * 0.5);
        let edges: Vec<f32> = (0..mel_bands + 2)
            .map(|i| mel_to_hz(mel_max * i as f32 / (mel_bands + 1) as f32))
            .collect();
        let filters = edges
            .windows(3)
            .map(|w| triangle(w[0], w[1], w[2], bins, bin_hz))
            .collect();
        Self { filters }
    }

    fn apply(&self, power: &[f32]) -> Vec<f32> {
        self.filters
            .iter()
            .map(|filter| {
                filter
                    .iter()
                    .map(|&(bin, weight)| {
                        power.get(bin).copied().unwrap_or(0.0) as f64 * weight as f64
                    })
                    .sum::<f64>() as f32
            })
            .collect()
    }

    /// Log-mel spectrogram in dB, clipped to `top_db` below its loudest cell.
    pub(crate) fn log_mel(&self, spec: &Spectrogram, top_db: f32) -> LogMel {
        let mut frames: Vec<Vec<f32>> = (0..spec.frame_count())
            .map(|frame| {
                self.apply(&spec.power_frame(frame))
                    .into_iter()
                    .map(power_to_db)
                    .collect()
            })
            .collect();
        let peak = frames
            .iter()
            .flatten()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        if peak.is_finite() {
            let floor = peak - top_db;
            for value in frames.iter_mut().flatten() {
                *value = value.max(floor);
            }
        }
        LogMel { frames }
    }
}

/// Log-mel energies (dB), one row of mel bands per STFT frame.
pub(crate) struct LogMel {
    pub(crate) frames: Vec<Vec<f32>>,
}

impl LogMel {
    /// Frame-averaged MFCCs: orthonormal DCT-II of each frame, first `count` kept.
    pub(crate) fn mfcc_means(&self, count: usize) -> Vec<f32> {
        let bands = self.frames.first().map(Vec::len).unwrap_or(0);
        let basis = dct_basis(bands, count);
        let mut sums = vec![0.0_f64; count];
        for frame in &self.frames {
            for (sum, row) in sums.iter_mut().zip(&basis) {
                *sum += row
                    .iter()
                    .zip(frame)
                    .map(|(&b, &v)| b * v as f64)
                    .sum::<f64>();
            }
        }
        let n = self.frames.len().max(1) as f64;
        sums.into_iter().map(|s| (s / n) as f32).collect()
    }
}

fn triangle(left: f32, center: f32, right: f32, bins: usize, bin_hz: f32) -> Vec<(usize, f32)> {
    let mut weights = Vec::new();
    for bin in 0..bins {
        let freq = bin as f32 * bin_hz;
        if freq <= left || freq >= right {
            continue;
        }
        let w = if freq <= center {
            (freq - left) / (center - left).max(f32::EPSILON)
        } else {
            (right - freq) / (right - center).max(f32::EPSILON)
        };
        if w > 0.0 {
            weights.push((bin, w));
        }
    }
    weights
}

fn dct_basis(inputs: usize, outputs: usize) -> Vec<Vec<f64>> {
    let n = inputs.max(1) as f64;
    (0..outputs)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..inputs)
                .map(|m| {
                    let angle = std::f64::consts::PI * k as f64 * (m as f64 + 0.5) / n;
                    scale * angle.cos()
                })
                .collect()
        })
        .collect()
}

fn power_to_db(power: f32) -> f32 {
    10.0 * power.max(POWER_FLOOR).log10()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0_f32 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0_f32 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}
