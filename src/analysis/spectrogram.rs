//! Short-time magnitude spectrogram shared by every frame-wise extractor.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex32};

/// Reusable STFT plan for one frame size.
pub(crate) struct StftPlan {
    frame_size: usize,
    hop_size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl StftPlan {
    pub(crate) fn new(frame_size: usize, hop_size: usize) -> Self {
        let frame_size = frame_size.max(2);
        let mut planner = FftPlanner::<f32>::new();
        Self {
            frame_size,
            hop_size: hop_size.max(1),
            window: hann_window(frame_size),
            fft: planner.plan_fft_forward(frame_size),
        }
    }

    /// Compute centred, zero-padded STFT frames of `samples`.
    ///
    /// Frame `t` is centred on sample `t * hop_size`, so any non-empty
    /// signal yields `1 + len / hop_size` frames and an empty one yields a
    /// single silent frame.
    pub(crate) fn compute(&self, samples: &[f32], sample_rate: u32) -> Spectrogram {
        let bins = self.frame_size / 2 + 1;
        let pad = self.frame_size / 2;
        let frame_count = 1 + samples.len() / self.hop_size;
        let mut buffer = vec![Complex32::default(); self.frame_size];
        let mut scratch = vec![Complex32::default(); self.fft.get_inplace_scratch_len()];
        let mut magnitude = Vec::with_capacity(frame_count);
        for frame in 0..frame_count {
            let center = frame * self.hop_size;
            for (i, cell) in buffer.iter_mut().enumerate() {
                let src = (center + i)
                    .checked_sub(pad)
                    .and_then(|idx| samples.get(idx))
                    .copied()
                    .unwrap_or(0.0);
                let src = if src.is_finite() { src } else { 0.0 };
                *cell = Complex32::new(src * self.window[i], 0.0);
            }
            self.fft.process_with_scratch(&mut buffer, &mut scratch);
            magnitude.push(buffer[..bins].iter().map(|c| c.norm()).collect());
        }
        Spectrogram {
            magnitude,
            sample_rate: sample_rate.max(1),
            frame_size: self.frame_size,
        }
    }
}

/// Magnitude spectrogram, one row of `frame_size / 2 + 1` bins per frame.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub(crate) magnitude: Vec<Vec<f32>>,
    pub(crate) sample_rate: u32,
    pub(crate) frame_size: usize,
}

impl Spectrogram {
    /// Number of analysis frames.
    pub fn frame_count(&self) -> usize {
        self.magnitude.len()
    }

    /// Number of frequency bins per frame.
    pub fn bin_count(&self) -> usize {
        self.frame_size / 2 + 1
    }

    /// Magnitude rows in frame order.
    pub fn frames(&self) -> &[Vec<f32>] {
        &self.magnitude
    }

    /// Centre frequency of `bin` in Hz.
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.frame_size as f32
    }

    /// Power (squared magnitude) of one frame.
    pub(crate) fn power_frame(&self, frame: usize) -> Vec<f32> {
        self.magnitude[frame].iter().map(|m| m * m).collect()
    }
}

/// Periodic Hann window.
pub(crate) fn hann_window(length: usize) -> Vec<f32> {
    if length <= 1 {
        return vec![1.0_f32; length.max(1)];
    }
    let n = length as f32;
    (0..length)
        .map(|i| 0.5_f32 * (1.0 - (2.0 * PI * i as f32 / n).cos()))
        .collect()
}
