//! Port mixing and channel folding
//!
//! Two kinds of channel conversion happen in the pipeline:
//!
//! - **Port mix** ([`mix_ports`]): once per period, every started port's
//!   current block is scaled by its (ramping) level and accumulated into the
//!   output period according to a static channel map.
//! - **Device fold** ([`downmix`]): at the device boundary the queued stream
//!   is folded to whatever channel count the device actually opened.
//!
//! 8-channel frames are ordered L, R, C, LFE, RL, RR, SL, SR throughout.
//! Neither path clips; that is left to the device.

use crate::memory::GuestMemory;
use crate::port::PortRegistry;
use crate::types::BLOCK_SAMPLES;

/// -3dB attenuation used when folding center and sides into stereo
pub const MINUS_3DB: f32 = 0.707;

/// Center gain when folding at the device boundary
pub const DEVICE_CENTER_GAIN: f32 = 0.5;

/// Channel routing of one port into the output period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixRoute {
    /// Stereo port into front left/right of any layout
    StereoToFront,
    /// 7.1 port folded to stereo
    SurroundToStereo,
    /// 7.1 port folded to 5.1 (sides into rears)
    SurroundTo51,
    /// 7.1 port into a 7.1 output
    SurroundDirect,
}

impl MixRoute {
    /// Static route table keyed by (port channels, output channels)
    pub fn select(in_channels: u32, out_channels: usize) -> Option<Self> {
        match (in_channels, out_channels) {
            (2, 2 | 6 | 8) => Some(MixRoute::StereoToFront),
            (8, 2) => Some(MixRoute::SurroundToStereo),
            (8, 6) => Some(MixRoute::SurroundTo51),
            (8, 8) => Some(MixRoute::SurroundDirect),
            _ => None,
        }
    }

    /// Accumulate one scaled input frame into one output frame
    #[inline]
    fn accumulate(self, input: &[f32], out: &mut [f32], m: f32) {
        match self {
            MixRoute::StereoToFront => {
                out[0] += input[0] * m;
                out[1] += input[1] * m;
            }
            MixRoute::SurroundToStereo => {
                // LFE is dropped when folding to stereo
                let mid = input[2] * m * MINUS_3DB;
                out[0] += input[0] * m + input[4] * m + input[6] * m * MINUS_3DB + mid;
                out[1] += input[1] * m + input[5] * m + input[7] * m * MINUS_3DB + mid;
            }
            MixRoute::SurroundTo51 => {
                out[0] += input[0] * m;
                out[1] += input[1] * m;
                out[2] += input[2] * m;
                out[3] += input[3] * m;
                out[4] += (input[4] + input[6]) * m;
                out[5] += (input[5] + input[7]) * m;
            }
            MixRoute::SurroundDirect => {
                for (o, i) in out.iter_mut().zip(input) {
                    *o += i * m;
                }
            }
        }
    }
}

/// Mix the block `offset` periods ahead of every started port into `out`
///
/// `out` must hold `BLOCK_SAMPLES * out_channels` samples and is overwritten.
/// `scratch` is reused between calls to hold one decoded port block. A port
/// whose block cannot be read is skipped for this period. Returns whether any
/// port contributed; when none did, `out` is all zeros.
pub fn mix_ports(
    ports: &PortRegistry,
    mem: &GuestMemory,
    offset: i32,
    out: &mut [f32],
    out_channels: usize,
    scratch: &mut Vec<f32>,
) -> bool {
    debug_assert_eq!(out.len(), BLOCK_SAMPLES * out_channels);
    out.fill(0.0);

    let mut mixed = false;
    for port in ports.started() {
        let mut data = port.data();
        let in_channels = data.channels;
        let Some(route) = MixRoute::select(in_channels, out_channels) else {
            log::warn!(
                "Port {} has no mix route ({} -> {} channels)",
                port.number(),
                in_channels,
                out_channels
            );
            continue;
        };

        scratch.resize(data.block_size() as usize, 0.0);
        if let Err(e) = mem.read_f32_slice(data.block_addr(offset), scratch) {
            log::warn!("Port {} skipped in mix: {}", port.number(), e);
            continue;
        }

        for (frame_in, frame_out) in scratch
            .chunks_exact(in_channels as usize)
            .zip(out.chunks_exact_mut(out_channels))
        {
            data.step_volume();
            route.accumulate(frame_in, frame_out, data.level);
        }
        mixed = true;
    }

    mixed
}

/// Fold interleaved frames from `in_channels` to `out_channels`
///
/// Processes `min(input frames, output frames)` frames and returns that count.
/// Unsupported combinations copy the common leading channels and silence the rest.
pub fn downmix(input: &[f32], in_channels: usize, out: &mut [f32], out_channels: usize) -> usize {
    if in_channels == 0 || out_channels == 0 {
        return 0;
    }
    let frames = (input.len() / in_channels).min(out.len() / out_channels);
    let input = &input[..frames * in_channels];
    let out = &mut out[..frames * out_channels];

    if in_channels == out_channels {
        out.copy_from_slice(input);
        return frames;
    }

    for (i, o) in input
        .chunks_exact(in_channels)
        .zip(out.chunks_exact_mut(out_channels))
    {
        match (in_channels, out_channels) {
            (8, 2) => {
                let mid = i[2] * DEVICE_CENTER_GAIN;
                o[0] = i[0] + mid + i[4] + i[6];
                o[1] = i[1] + mid + i[5] + i[7];
            }
            (6, 2) => {
                let mid = i[2] * DEVICE_CENTER_GAIN;
                o[0] = i[0] + mid + i[4];
                o[1] = i[1] + mid + i[5];
            }
            (8, 6) => {
                o[..4].copy_from_slice(&i[..4]);
                o[4] = i[4] + i[6];
                o[5] = i[5] + i[7];
            }
            _ => {
                let common = in_channels.min(out_channels);
                o[..common].copy_from_slice(&i[..common]);
                o[common..].fill(0.0);
            }
        }
    }

    frames
}

/// Convert float samples to signed 16-bit with saturation
pub fn convert_to_s16(input: &[f32], out: &mut [i16]) {
    for (o, &s) in out.iter_mut().zip(input) {
        *o = (s * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PORT_STRIDE;

    fn setup(ports: &[(u32, f32)]) -> (PortRegistry, GuestMemory) {
        let mem = GuestMemory::new(0, PORT_STRIDE as usize * 8 + 64);
        let reg = PortRegistry::new();
        reg.reset(0, PORT_STRIDE, PORT_STRIDE * 8);
        for &(channels, value) in ports {
            let port = reg.open_port().unwrap();
            {
                let mut data = port.data();
                data.channels = channels;
                data.blocks = 4;
                data.level = 1.0;
                data.ramp.target = 1.0;
                let block = vec![value; data.block_size() as usize];
                mem.write_f32_slice(data.block_addr(0), &block).unwrap();
            }
            port.state().start().unwrap();
        }
        (reg, mem)
    }

    #[test]
    fn test_two_stereo_ports_accumulate() {
        let (reg, mem) = setup(&[(2, 1.0), (2, 0.5)]);
        let mut out = vec![9.0f32; BLOCK_SAMPLES * 2];
        let mut scratch = Vec::new();
        let mixed = mix_ports(&reg, &mem, 0, &mut out, 2, &mut scratch);
        assert!(mixed);
        assert!(out.iter().all(|&s| s == 1.5));
    }

    #[test]
    fn test_nothing_started_yields_silence() {
        let (reg, mem) = setup(&[]);
        let mut out = vec![3.0f32; BLOCK_SAMPLES * 8];
        let mut scratch = Vec::new();
        assert!(!mix_ports(&reg, &mem, 0, &mut out, 8, &mut scratch));
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_stereo_port_into_surround_leaves_rear_silent() {
        let (reg, mem) = setup(&[(2, 0.25)]);
        let mut out = vec![0.0f32; BLOCK_SAMPLES * 8];
        let mut scratch = Vec::new();
        mix_ports(&reg, &mem, 0, &mut out, 8, &mut scratch);
        for frame in out.chunks_exact(8) {
            assert_eq!(&frame[..2], &[0.25, 0.25]);
            assert!(frame[2..].iter().all(|&s| s == 0.0));
        }
    }

    #[test]
    fn test_surround_port_folds_to_stereo() {
        let (reg, mem) = setup(&[(8, 1.0)]);
        let mut out = vec![0.0f32; BLOCK_SAMPLES * 2];
        let mut scratch = Vec::new();
        mix_ports(&reg, &mem, 0, &mut out, 2, &mut scratch);
        // L + RL + SL * 0.707 + C * 0.707, LFE dropped
        let expected = 1.0 + 1.0 + MINUS_3DB + MINUS_3DB;
        assert!((out[0] - expected).abs() < 1e-6);
        assert!((out[1] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_level_applied_per_frame() {
        let (reg, mem) = setup(&[(2, 1.0)]);
        {
            let port = reg.get(0).unwrap();
            let mut data = port.data();
            data.set_level(0.0);
        }
        let mut out = vec![0.0f32; BLOCK_SAMPLES * 2];
        let mut scratch = Vec::new();
        mix_ports(&reg, &mem, 0, &mut out, 2, &mut scratch);
        for pair in out.chunks_exact(2).collect::<Vec<_>>().windows(2) {
            assert!(pair[1][0] < pair[0][0]);
        }
    }

    #[test]
    fn test_unreadable_port_is_skipped() {
        let (reg, mem) = setup(&[(2, 0.5), (2, 1.0)]);
        reg.get(0).unwrap().data().set_level(0.0);
        reg.get(1).unwrap().data().addr = 0x4000_0000;

        let mut out = vec![9.0f32; BLOCK_SAMPLES * 2];
        let mut scratch = Vec::new();
        assert!(mix_ports(&reg, &mem, 0, &mut out, 2, &mut scratch));

        // only the readable port contributes, ramping down as usual
        assert!(out[0] < 0.5 && out[0] > 0.0);
        assert!(out[out.len() - 1] < out[0]);
        assert!(reg.get(0).unwrap().data().level < 1.0);
        assert_eq!(reg.get(1).unwrap().data().level, 1.0);
    }

    #[test]
    fn test_downmix_surround_to_stereo() {
        let input = [1.0, 2.0, 4.0, 100.0, 0.5, 0.25, 0.125, 0.0625];
        let mut out = [0.0f32; 2];
        assert_eq!(downmix(&input, 8, &mut out, 2), 1);
        assert!((out[0] - (1.0 + 2.0 + 0.5 + 0.125)).abs() < 1e-6);
        assert!((out[1] - (2.0 + 2.0 + 0.25 + 0.0625)).abs() < 1e-6);
    }

    #[test]
    fn test_downmix_upmix_zero_fills() {
        let input = [0.5, -0.5, 0.25, -0.25];
        let mut out = [9.0f32; 16];
        assert_eq!(downmix(&input, 2, &mut out, 8), 2);
        assert_eq!(&out[..8], &[0.5, -0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(&out[8..10], &[0.25, -0.25]);
    }

    #[test]
    fn test_s16_conversion_saturates() {
        let mut out = [0i16; 4];
        convert_to_s16(&[0.5, -1.0, 1.5, -2.0], &mut out);
        assert_eq!(out, [16384, -32768, 32767, -32768]);
    }
}
