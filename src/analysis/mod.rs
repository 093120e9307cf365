//! Signal analysis: decoding, framing and descriptor extraction.

pub mod audio;
pub mod features;
pub mod key;
pub(crate) mod mel;
pub mod spectral;
pub mod spectrogram;
pub(crate) mod tempo;

pub use audio::{DecodeError, MonoAudio, load_mono};
pub use features::{ExtractError, FeatureExtractor, FeatureRecord, SCALAR_DESCRIPTOR_COUNT};
pub use key::{ChromaArgmaxKey, KeyEstimator, PitchClass};
