//! Coarse key labelling from a frame-averaged chroma profile.
//!
//! The label is advisory metadata: it is the pitch class with the most
//! energy, not the result of harmonic analysis, and it is never part of the
//! index vector.

use std::fmt;
use std::str::FromStr;

use super::spectrogram::Spectrogram;

/// Lowest frequency folded into the chroma profile (A0).
const CHROMA_MIN_HZ: f32 = 27.5;

/// Twelve-tone pitch classes, ordered from C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

/// Sharp-spelled labels, indexed by chroma bin.
pub const PITCH_CLASS_LABELS: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

const PITCH_CLASSES: [PitchClass; 12] = [
    PitchClass::C,
    PitchClass::CSharp,
    PitchClass::D,
    PitchClass::DSharp,
    PitchClass::E,
    PitchClass::F,
    PitchClass::FSharp,
    PitchClass::G,
    PitchClass::GSharp,
    PitchClass::A,
    PitchClass::ASharp,
    PitchClass::B,
];

impl PitchClass {
    /// Pitch class for a chroma bin (wraps modulo 12).
    pub fn from_index(index: usize) -> Self {
        PITCH_CLASSES[index % 12]
    }

    /// Chroma bin of this pitch class.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Short label such as `C#`.
    pub fn label(self) -> &'static str {
        PITCH_CLASS_LABELS[self.index()]
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error for labels outside the pitch-class table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown pitch class label: {0:?}")]
pub struct UnknownPitchClass(pub String);

impl FromStr for PitchClass {
    type Err = UnknownPitchClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(idx) = PITCH_CLASS_LABELS.iter().position(|label| *label == trimmed) {
            return Ok(Self::from_index(idx));
        }
        // Flat spellings map onto the sharp table.
        let flat = match trimmed {
            "Db" => Some(1),
            "Eb" => Some(3),
            "Gb" => Some(6),
            "Ab" => Some(8),
            "Bb" => Some(10),
            _ => None,
        };
        flat.map(Self::from_index)
            .ok_or_else(|| UnknownPitchClass(trimmed.to_string()))
    }
}

/// Strategy that labels a signal with a pitch class.
///
/// Implementations must be deterministic; their [`id`](KeyEstimator::id)
/// is folded into the store fingerprint so swapping strategies marks old
/// stores as incomparable.
pub trait KeyEstimator: Send + Sync {
    /// Stable identifier of the strategy.
    fn id(&self) -> &'static str;
    /// Estimate the pitch class of the analysed signal.
    fn estimate(&self, spectrogram: &Spectrogram) -> PitchClass;
}

/// Argmax of the frame-averaged, per-frame max-normalised chroma profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromaArgmaxKey;

impl KeyEstimator for ChromaArgmaxKey {
    fn id(&self) -> &'static str {
        "chroma_argmax_v1"
    }

    fn estimate(&self, spectrogram: &Spectrogram) -> PitchClass {
        let profile = chroma_profile(spectrogram);
        let mut best = 0usize;
        for (idx, &value) in profile.iter().enumerate() {
            if value > profile[best] {
                best = idx;
            }
        }
        PitchClass::from_index(best)
    }
}

/// Mean chroma energy over all frames; each frame is scaled to a max of 1.
pub fn chroma_profile(spectrogram: &Spectrogram) -> [f32; 12] {
    let classes: Vec<Option<usize>> = (0..spectrogram.bin_count())
        .map(|bin| pitch_class_of(spectrogram.bin_frequency(bin)))
        .collect();
    let mut sums = [0.0_f64; 12];
    for frame in spectrogram.frames() {
        let mut chroma = [0.0_f64; 12];
        for (&mag, class) in frame.iter().zip(&classes) {
            if let Some(class) = class {
                chroma[*class] += mag as f64 * mag as f64;
            }
        }
        let peak = chroma.iter().copied().fold(0.0_f64, f64::max);
        if peak > 0.0 {
            for (sum, value) in sums.iter_mut().zip(chroma) {
                *sum += value / peak;
            }
        }
    }
    let n = spectrogram.frame_count().max(1) as f64;
    sums.map(|s| (s / n) as f32)
}

fn pitch_class_of(freq_hz: f32) -> Option<usize> {
    if freq_hz < CHROMA_MIN_HZ {
        return None;
    }
    let midi = 69.0 + 12.0 * (freq_hz / 440.0).log2();
    Some((midi.round() as i64).rem_euclid(12) as usize)
}
