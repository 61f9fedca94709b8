//! Common types for Cadence
//!
//! Fundamental constants and small value types shared by the mixing path,
//! the LLE extraction path and the backend feeder.

use serde::{Deserialize, Serialize};

/// Sample rate of the guest mixing path (Hz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Frames per mixing period
pub const BLOCK_SAMPLES: usize = 256;

/// Number of guest audio ports
pub const PORT_COUNT: usize = 8;

/// Maximum period depth of a port
pub const MAX_PORT_BLOCKS: usize = 32;

/// Maximum channel count of a port (7.1)
pub const MAX_PORT_CHANNELS: usize = 8;

/// Byte stride between two port regions in guest memory
pub const PORT_STRIDE: u32 = (BLOCK_SAMPLES * MAX_PORT_BLOCKS * MAX_PORT_CHANNELS * 4) as u32;

/// Nominal mixing period at 48kHz in microseconds (5.333ms)
pub const BLOCK_PERIOD_US: u64 = BLOCK_SAMPLES as u64 * 1_000_000 / DEFAULT_SAMPLE_RATE as u64;

/// Maximum number of channels any output stage handles
pub const MAX_OUTPUT_CHANNELS: usize = 8;

/// Audio sample type used for all host-side processing
pub type Sample = f32;

/// Sample word written to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed 16-bit little endian
    S16,
    /// 32-bit float
    #[default]
    F32,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub const fn size(self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Channel layout of an output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelLayout {
    #[default]
    Stereo,
    Surround51,
    Surround71,
}

impl ChannelLayout {
    /// Number of interleaved channels
    pub const fn channels(self) -> usize {
        match self {
            ChannelLayout::Stereo => 2,
            ChannelLayout::Surround51 => 6,
            ChannelLayout::Surround71 => 8,
        }
    }

    /// Layout for a channel count, rounding unknown counts down
    pub fn from_channels(channels: usize) -> Self {
        match channels {
            0..=5 => ChannelLayout::Stereo,
            6 | 7 => ChannelLayout::Surround51,
            _ => ChannelLayout::Surround71,
        }
    }
}

/// Physical or logical output route of the console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum AvPort {
    #[default]
    Hdmi0 = 0,
    Hdmi1 = 1,
    AvMulti = 2,
    Spdif0 = 3,
    Spdif1 = 4,
}

impl AvPort {
    /// All AV ports in index order
    pub const ALL: [AvPort; 5] = [
        AvPort::Hdmi0,
        AvPort::Hdmi1,
        AvPort::AvMulti,
        AvPort::Spdif0,
        AvPort::Spdif1,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Bit of this port in a mute mask
    pub const fn mask(self) -> u8 {
        1 << (self as u8)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AvPort::Hdmi0 => "HDMI 0",
            AvPort::Hdmi1 => "HDMI 1",
            AvPort::AvMulti => "AV multi",
            AvPort::Spdif0 => "S/PDIF 0",
            AvPort::Spdif1 => "S/PDIF 1",
        }
    }
}

/// Negotiated or requested parameters of a device stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub layout: ChannelLayout,
}

impl StreamParams {
    pub fn new(sample_rate: u32, format: SampleFormat, layout: ChannelLayout) -> Self {
        Self {
            sample_rate,
            format,
            layout,
        }
    }

    /// Bytes of one interleaved frame
    pub fn frame_bytes(&self) -> usize {
        self.layout.channels() * self.format.size()
    }
}

impl Default for StreamParams {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, SampleFormat::F32, ChannelLayout::Stereo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_period_matches_48k() {
        assert_eq!(BLOCK_PERIOD_US, 5333);
    }

    #[test]
    fn test_port_stride() {
        assert_eq!(PORT_STRIDE, 0x40000);
    }

    #[test]
    fn test_layout_from_channels() {
        assert_eq!(ChannelLayout::from_channels(2), ChannelLayout::Stereo);
        assert_eq!(ChannelLayout::from_channels(6), ChannelLayout::Surround51);
        assert_eq!(ChannelLayout::from_channels(8), ChannelLayout::Surround71);
        assert_eq!(ChannelLayout::from_channels(1), ChannelLayout::Stereo);
    }

    #[test]
    fn test_avport_masks_are_distinct() {
        let all = AvPort::ALL.iter().fold(0u8, |acc, p| {
            assert_eq!(acc & p.mask(), 0);
            acc | p.mask()
        });
        assert_eq!(all, 0b1_1111);
    }
}
