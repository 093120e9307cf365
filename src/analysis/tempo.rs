//! Global tempo estimate from an onset-strength envelope.
//!
//! The envelope is the mean positive first difference of the log-mel
//! spectrogram. Its autocorrelation is scored against a log-normal prior
//! centred on `start_bpm`, and the best lag is refined by parabolic
//! interpolation before conversion to beats per minute.

use super::mel::LogMel;

/// Width of the tempo prior, in octaves.
const PRIOR_STD_OCTAVES: f64 = 1.0;
const SCORE_EPSILON: f64 = 1e-6;

/// Tempo search bounds and prior.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TempoParams {
    pub(crate) sample_rate: u32,
    pub(crate) hop_size: usize,
    pub(crate) min_bpm: f32,
    pub(crate) max_bpm: f32,
    pub(crate) start_bpm: f32,
}

impl TempoParams {
    fn frames_per_minute(&self) -> f64 {
        60.0 * self.sample_rate.max(1) as f64 / self.hop_size.max(1) as f64
    }
}

/// Onset strength per frame; the first frame is always zero.
pub(crate) fn onset_strength(log_mel: &LogMel) -> Vec<f32> {
    let mut envelope = Vec::with_capacity(log_mel.frames.len());
    let mut prev: Option<&Vec<f32>> = None;
    for frame in &log_mel.frames {
        let value = match prev {
            Some(prev) if !frame.is_empty() => {
                let rise: f64 = frame
                    .iter()
                    .zip(prev)
                    .map(|(&cur, &old)| (cur - old).max(0.0) as f64)
                    .sum();
                (rise / frame.len() as f64) as f32
            }
            _ => 0.0,
        };
        envelope.push(value);
        prev = Some(frame);
    }
    envelope
}

/// Estimate tempo in BPM; returns 0.0 when the envelope has no periodicity to measure.
pub(crate) fn estimate_tempo(envelope: &[f32], params: &TempoParams) -> f32 {
    let fpm = params.frames_per_minute();
    let lag_min = (fpm / params.max_bpm as f64).ceil().max(1.0) as usize;
    let lag_max =
        ((fpm / params.min_bpm as f64).floor() as usize).min(envelope.len().saturating_sub(2));
    if lag_min > lag_max {
        return 0.0;
    }
    let peak = envelope.iter().copied().fold(0.0_f32, f32::max);
    if !(peak > 0.0) {
        return 0.0;
    }

    let ac: Vec<f64> = (0..=lag_max + 1)
        .map(|lag| autocorrelation(envelope, lag))
        .collect();
    let energy = ac[0];
    if energy <= 0.0 {
        return 0.0;
    }

    let log_start = (params.start_bpm as f64).log2();
    let mut best: Option<(usize, f64)> = None;
    for lag in lag_min..=lag_max {
        let bpm = fpm / lag as f64;
        let prior = (bpm.log2() - log_start) / PRIOR_STD_OCTAVES;
        let score = (SCORE_EPSILON + ac[lag] / energy).ln() - 0.5 * prior * prior;
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((lag, score));
        }
    }
    let Some((lag, _)) = best else {
        return 0.0;
    };
    if ac[lag] <= 0.0 {
        return 0.0;
    }
    let refined = refine_lag(&ac, lag);
    (fpm / refined) as f32
}

fn autocorrelation(envelope: &[f32], lag: usize) -> f64 {
    if lag >= envelope.len() {
        return 0.0;
    }
    envelope
        .iter()
        .zip(&envelope[lag..])
        .map(|(&a, &b)| a as f64 * b as f64)
        .sum()
}

fn refine_lag(ac: &[f64], lag: usize) -> f64 {
    if lag == 0 || lag + 1 >= ac.len() {
        return lag as f64;
    }
    let (left, center, right) = (ac[lag - 1], ac[lag], ac[lag + 1]);
    let denom = left - 2.0 * center + right;
    if denom >= 0.0 {
        return lag as f64;
    }
    let offset = (0.5 * (left - right) / denom).clamp(-0.5, 0.5);
    lag as f64 + offset
}
