//! Big-endian PCM extraction
//!
//! Converts the fixed-point blocks the guest hands to the virtual audio
//! hardware into normalized f32 frames.

use crate::memory::{GuestMemory, MemoryResult};

/// 1 / 2^15
pub const S16_SCALE: f32 = 1.0 / 32768.0;
/// 1 / 2^31
pub const S32_SCALE: f32 = 1.0 / 2_147_483_648.0;

/// Sample word of a virtual hardware stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleWidth {
    #[default]
    Bits16,
    /// 24-bit audio in the upper bits of a 32-bit word
    Bits32,
}

impl SampleWidth {
    pub const fn bytes(self) -> usize {
        match self {
            SampleWidth::Bits16 => 2,
            SampleWidth::Bits32 => 4,
        }
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            16 => Some(SampleWidth::Bits16),
            32 => Some(SampleWidth::Bits32),
            _ => None,
        }
    }
}

/// Convert big-endian samples in `src` into `out`
///
/// Returns the number of samples written, the smaller of both capacities.
pub fn convert_be(src: &[u8], width: SampleWidth, out: &mut [f32]) -> usize {
    match width {
        SampleWidth::Bits16 => {
            let mut n = 0;
            for (word, sample) in src.chunks_exact(2).zip(out.iter_mut()) {
                *sample = i16::from_be_bytes([word[0], word[1]]) as f32 * S16_SCALE;
                n += 1;
            }
            n
        }
        SampleWidth::Bits32 => {
            let mut n = 0;
            for (word, sample) in src.chunks_exact(4).zip(out.iter_mut()) {
                *sample = i32::from_be_bytes([word[0], word[1], word[2], word[3]]) as f32 * S32_SCALE;
                n += 1;
            }
            n
        }
    }
}

/// Frames in one stereo stream region of `stream_bytes`
pub const fn stream_frames(stream_bytes: usize, width: SampleWidth) -> usize {
    stream_bytes / (2 * width.bytes())
}

/// Interleave `streams` consecutive stereo regions into one frame stream
///
/// Region `s` supplies channels `2s` and `2s + 1` of every output frame.
/// `out` is resized to `frames * streams * 2`.
pub fn deinterleave_streams(
    src: &[u8],
    width: SampleWidth,
    streams: usize,
    stream_bytes: usize,
    out: &mut Vec<f32>,
) {
    let frames = stream_frames(stream_bytes, width);
    let channels = streams * 2;
    out.clear();
    out.resize(frames * channels, 0.0);

    let frame_bytes = 2 * width.bytes();
    for (s, region) in src.chunks(stream_bytes).take(streams).enumerate() {
        for (frame, words) in out.chunks_exact_mut(channels).zip(region.chunks_exact(frame_bytes)) {
            convert_be(words, width, &mut frame[2 * s..2 * s + 2]);
        }
    }
}

/// Read and convert one block of `streams` stereo regions
///
/// `addr == None` yields a block of silence.
pub fn extract_block(
    mem: &GuestMemory,
    addr: Option<u32>,
    width: SampleWidth,
    streams: usize,
    stream_bytes: usize,
    out: &mut Vec<f32>,
) -> MemoryResult<()> {
    match addr {
        Some(addr) => mem.with_slice(addr, streams * stream_bytes, |bytes| {
            deinterleave_streams(bytes, width, streams, stream_bytes, out)
        }),
        None => {
            out.clear();
            out.resize(stream_frames(stream_bytes, width) * streams * 2, 0.0);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s16_scale() {
        let src = [0x80, 0x00, 0x40, 0x00, 0x7f, 0xff, 0x00, 0x00];
        let mut out = [9.0f32; 4];
        assert_eq!(convert_be(&src, SampleWidth::Bits16, &mut out), 4);
        assert_eq!(out[0], -1.0);
        assert_eq!(out[1], 0.5);
        assert!((out[2] - 32767.0 / 32768.0).abs() < 1e-7);
        assert_eq!(out[3], 0.0);
    }

    #[test]
    fn test_s32_scale() {
        let src = [0x80, 0, 0, 0, 0xc0, 0, 0, 0];
        let mut out = [0.0f32; 2];
        assert_eq!(convert_be(&src, SampleWidth::Bits32, &mut out), 2);
        assert_eq!(out, [-1.0, -0.5]);
    }

    #[test]
    fn test_four_streams_interleave_into_eight_channels() {
        // 2 frames per stream, stream s carries (s, -s) / 8
        let stream_bytes = 8;
        let mut src = Vec::new();
        for s in 0..4i16 {
            for _ in 0..2 {
                src.extend_from_slice(&(s * 4096).to_be_bytes());
                src.extend_from_slice(&(-s * 4096).to_be_bytes());
            }
        }

        let mut out = Vec::new();
        deinterleave_streams(&src, SampleWidth::Bits16, 4, stream_bytes, &mut out);
        assert_eq!(out.len(), 16);
        let frame: Vec<f32> = out[..8].to_vec();
        assert_eq!(frame, vec![0.0, 0.0, 0.125, -0.125, 0.25, -0.25, 0.375, -0.375]);
        assert_eq!(&out[8..], &frame[..]);
    }

    #[test]
    fn test_missing_block_is_silence() {
        let mem = GuestMemory::new(0x1000, 0x100);
        let mut out = vec![1.0; 3];
        extract_block(&mem, None, SampleWidth::Bits32, 1, 0x400, &mut out).unwrap();
        assert_eq!(out.len(), 256);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_width_from_bits() {
        assert_eq!(SampleWidth::from_bits(16), Some(SampleWidth::Bits16));
        assert_eq!(SampleWidth::from_bits(32), Some(SampleWidth::Bits32));
        assert_eq!(SampleWidth::from_bits(24), None);
    }
}
