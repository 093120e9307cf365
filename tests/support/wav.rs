use std::f32::consts::PI;
use std::path::Path;

pub const SAMPLE_RATE: u32 = 22_050;

pub fn write_test_wav(path: &Path, samples: &[f32], sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create wav parent dirs");
    }
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav writer");
    for &sample in samples {
        writer.write_sample(sample).expect("write wav sample");
    }
    writer.finalize().expect("finalize wav");
}

/// Steady sine at `freq` Hz.
pub fn tone(freq: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
    let len = (seconds * sample_rate as f32) as usize;
    (0..len)
        .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// Short decaying bursts of `freq` Hz every `period` samples.
pub fn click_train(freq: f32, period: usize, seconds: f32, sample_rate: u32) -> Vec<f32> {
    let len = (seconds * sample_rate as f32) as usize;
    (0..len)
        .map(|i| {
            let phase = i % period;
            if phase < 256 {
                let env = 1.0 - phase as f32 / 256.0;
                0.8 * env * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin()
            } else {
                0.0
            }
        })
        .collect()
}
