//! Spectral-shape descriptors: centroid, bandwidth and rolloff.

use super::spectrogram::Spectrogram;

/// Frame-averaged spectral shape of one signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralShape {
    /// Magnitude-weighted mean frequency (Hz).
    pub centroid_hz: f32,
    /// Magnitude-weighted spread around the centroid (Hz).
    pub bandwidth_hz: f32,
    /// Frequency below which `rolloff_fraction` of the magnitude lies (Hz).
    pub rolloff_hz: f32,
}

#[derive(Clone, Copy)]
struct ShapeFrame {
    centroid_hz: f64,
    bandwidth_hz: f64,
    rolloff_hz: f64,
}

/// Compute per-frame shape descriptors and average them across frames.
///
/// Silent frames contribute zero to every average.
pub(crate) fn spectral_shape(spec: &Spectrogram, rolloff_fraction: f32) -> SpectralShape {
    let freqs: Vec<f64> = (0..spec.bin_count())
        .map(|bin| spec.bin_frequency(bin) as f64)
        .collect();
    let frames: Vec<ShapeFrame> = spec
        .frames()
        .iter()
        .map(|mag| shape_frame(mag, &freqs, rolloff_fraction as f64))
        .collect();
    let count = frames.len().max(1) as f64;
    let mean = |f: fn(&ShapeFrame) -> f64| (frames.iter().map(f).sum::<f64>() / count) as f32;
    SpectralShape {
        centroid_hz: mean(|f| f.centroid_hz),
        bandwidth_hz: mean(|f| f.bandwidth_hz),
        rolloff_hz: mean(|f| f.rolloff_hz),
    }
}

fn shape_frame(magnitude: &[f32], freqs: &[f64], rolloff_fraction: f64) -> ShapeFrame {
    let total: f64 = magnitude.iter().map(|&m| m.max(0.0) as f64).sum();
    if total <= 0.0 {
        return ShapeFrame {
            centroid_hz: 0.0,
            bandwidth_hz: 0.0,
            rolloff_hz: 0.0,
        };
    }
    let centroid = centroid(magnitude, freqs, total);
    ShapeFrame {
        centroid_hz: centroid,
        bandwidth_hz: bandwidth(magnitude, freqs, total, centroid),
        rolloff_hz: rolloff(magnitude, freqs, total, rolloff_fraction),
    }
}

fn centroid(magnitude: &[f32], freqs: &[f64], total: f64) -> f64 {
    let weighted: f64 = magnitude
        .iter()
        .zip(freqs)
        .map(|(&m, &f)| m.max(0.0) as f64 * f)
        .sum();
    weighted / total
}

fn bandwidth(magnitude: &[f32], freqs: &[f64], total: f64, centroid: f64) -> f64 {
    let spread: f64 = magnitude
        .iter()
        .zip(freqs)
        .map(|(&m, &f)| {
            let diff = f - centroid;
            m.max(0.0) as f64 * diff * diff
        })
        .sum();
    (spread / total).max(0.0).sqrt()
}

fn rolloff(magnitude: &[f32], freqs: &[f64], total: f64, fraction: f64) -> f64 {
    let target = total * fraction;
    let mut cumulative = 0.0_f64;
    for (&m, &f) in magnitude.iter().zip(freqs) {
        cumulative += m.max(0.0) as f64;
        if cumulative >= target {
            return f;
        }
    }
    freqs.last().copied().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::spectrogram::StftPlan;
    use std::f32::consts::PI;

    // Raised-cosine fades keep the zero-padded edge frames free of clicks.
    fn sine(freq: f32, sr: u32, seconds: f32) -> Vec<f32> {
        let len = (sr as f32 * seconds) as usize;
        let fade = 4096.min(len / 2);
        (0..len)
            .map(|i| {
                let edge = i.min(len - 1 - i);
                let gain = if edge < fade {
                    0.5 * (1.0 - (PI * edge as f32 / fade as f32).cos())
                } else {
                    1.0
                };
                gain * (2.0 * PI * freq * i as f32 / sr as f32).sin()
            })
            .collect()
    }

    #[test]
    fn sine_centroid_tracks_frequency() {
        let sr = 22_050;
        let spec = StftPlan::new(2048, 512).compute(&sine(1_000.0, sr, 1.0), sr);
        let shape = spectral_shape(&spec, 0.85);
        assert!((shape.centroid_hz - 1_000.0).abs() < 60.0, "{shape:?}");
        assert!(shape.bandwidth_hz < 500.0, "{shape:?}");
        assert!((shape.rolloff_hz - 1_000.0).abs() < 120.0, "{shape:?}");
    }

    #[test]
    fn brighter_signal_has_higher_centroid() {
        let sr = 22_050;
        let plan = StftPlan::new(2048, 512);
        let low = spectral_shape(&plan.compute(&sine(300.0, sr, 0.5), sr), 0.85);
        let high = spectral_shape(&plan.compute(&sine(4_000.0, sr, 0.5), sr), 0.85);
        assert!(high.centroid_hz > low.centroid_hz);
        assert!(high.rolloff_hz > low.rolloff_hz);
    }

    #[test]
    fn silence_has_zero_shape() {
        let spec = StftPlan::new(1024, 256).compute(&vec![0.0; 4_096], 22_050);
        let shape = spectral_shape(&spec, 0.85);
        assert_eq!(shape.centroid_hz, 0.0);
        assert_eq!(shape.bandwidth_hz, 0.0);
        assert_eq!(shape.rolloff_hz, 0.0);
    }
}
