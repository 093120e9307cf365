//! Tiny MPEG-1 Layer III writer for decoder fixtures.
//!
//! Each granule holds a single non-zero spectral line coded with Huffman
//! table 1 and no scalefactors, which decodes to a steady low tone. Mono,
//! 44.1 kHz, 32 kbit/s, no CRC and no bit reservoir.

use std::path::Path;

pub const MP3_SAMPLE_RATE: u32 = 44_100;
pub const SAMPLES_PER_FRAME: usize = 1152;

// 144 * 32_000 / 44_100, unpadded.
const FRAME_BYTES: usize = 104;
const HEADER: [u8; 4] = [0xFF, 0xFB, 0x10, 0xC0];
// Index of the (x, y) pair whose x value is 1; earlier pairs are (0, 0).
const TONE_PAIR: u32 = 5;
const GLOBAL_GAIN: u32 = 200;

#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    fn put(&mut self, value: u32, width: u32) {
        for shift in (0..width).rev() {
            if self.bits % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> shift) & 1 == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 0x80 >> (self.bits % 8);
            }
            self.bits += 1;
        }
    }
}

fn granule_side_info(out: &mut BitWriter, part2_3_length: u32) {
    out.put(part2_3_length, 12);
    out.put(TONE_PAIR + 1, 9); // big_values
    out.put(GLOBAL_GAIN, 8);
    out.put(0, 4); // scalefac_compress: no scalefactor bits
    out.put(0, 1); // window_switching_flag
    for _ in 0..3 {
        out.put(1, 5); // table_select
    }
    out.put(0, 4); // region0_count
    out.put(0, 3); // region1_count
    out.put(0, 1); // preflag
    out.put(0, 1); // scalefac_scale
    out.put(0, 1); // count1table_select
}

fn granule_main_data(out: &mut BitWriter) -> u32 {
    let start = out.bits;
    for _ in 0..TONE_PAIR {
        out.put(0b1, 1); // (0, 0)
    }
    out.put(0b01, 2); // (1, 0)
    out.put(0, 1); // positive sign
    (out.bits - start) as u32
}

fn frame() -> Vec<u8> {
    let mut main = BitWriter::default();
    let part2_3_length = granule_main_data(&mut main);
    granule_main_data(&mut main);

    let mut side = BitWriter::default();
    side.put(0, 9); // main_data_begin
    side.put(0, 5); // private_bits
    side.put(0, 4); // scfsi
    granule_side_info(&mut side, part2_3_length);
    granule_side_info(&mut side, part2_3_length);
    assert_eq!(side.bytes.len(), 17);

    let mut frame = HEADER.to_vec();
    frame.extend_from_slice(&side.bytes);
    frame.extend_from_slice(&main.bytes);
    frame.resize(FRAME_BYTES, 0);
    frame
}

/// Write roughly `seconds` of a synthetic mono tone as an MP3 file.
pub fn write_test_mp3(path: &Path, seconds: f32) {
    let frames = ((seconds * MP3_SAMPLE_RATE as f32) as usize).div_ceil(SAMPLES_PER_FRAME);
    let one = frame();
    let mut bytes = Vec::with_capacity(frames * FRAME_BYTES);
    for _ in 0..frames.max(1) {
        bytes.extend_from_slice(&one);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create mp3 parent dirs");
    }
    std::fs::write(path, bytes).expect("write mp3");
}
