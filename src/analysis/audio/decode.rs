use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use thiserror::Error;

/// Reasons a file could not be turned into samples.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The file could not be opened.
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    /// No demuxer recognised the container.
    #[error("Unsupported or corrupt container {path}: {source}")]
    Probe {
        path: PathBuf,
        source: SymphoniaError,
    },
    /// The container holds no decodable track.
    #[error("No default track in {path}")]
    NoTrack { path: PathBuf },
    /// The track does not declare a sample rate.
    #[error("Missing sample rate for {path}")]
    MissingSampleRate { path: PathBuf },
    /// The track does not declare a channel layout.
    #[error("Missing channel count for {path}")]
    MissingChannels { path: PathBuf },
    /// No decoder is available for the codec.
    #[error("Unsupported codec in {path}: {source}")]
    Codec {
        path: PathBuf,
        source: SymphoniaError,
    },
    /// Reading or decoding a packet failed.
    #[error("Packet decode failed for {path}: {source}")]
    Packet {
        path: PathBuf,
        source: SymphoniaError,
    },
    /// Decoding finished without producing any samples.
    #[error("Decoded 0 samples from {path}")]
    Empty { path: PathBuf },
}

/// Raw decoded audio in interleaved `f32` samples.
pub(crate) struct DecodedAudio {
    pub(crate) samples: Vec<f32>,
    pub(crate) sample_rate: u32,
    pub(crate) channels: u16,
}

/// Decode every packet of the default track into interleaved samples.
pub(crate) fn decode_interleaved(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let file = File::open(path).map_err(|source| DecodeError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|source| DecodeError::Probe {
            path: path.to_path_buf(),
            source,
        })?;
    let mut format = probed.format;
    let track = format.default_track().ok_or_else(|| DecodeError::NoTrack {
        path: path.to_path_buf(),
    })?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::MissingSampleRate {
            path: path.to_path_buf(),
        })?;
    let channels = codec_params
        .channels
        .ok_or_else(|| DecodeError::MissingChannels {
            path: path.to_path_buf(),
        })?
        .count() as u16;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|source| DecodeError::Codec {
            path: path.to_path_buf(),
            source,
        })?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(source) => {
                return Err(DecodeError::Packet {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        if packet.track_id() != track_id {
            continue;
        }
        let audio_buf = match decoder.decode(&packet) {
            Ok(audio_buf) => audio_buf,
            // Recoverable: a single damaged frame.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(source) => {
                return Err(DecodeError::Packet {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let spec = *audio_buf.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(audio_buf);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() {
        return Err(DecodeError::Empty {
            path: path.to_path_buf(),
        });
    }

    Ok(DecodedAudio {
        samples,
        sample_rate: sample_rate.max(1),
        channels: channels.max(1),
    })
}
