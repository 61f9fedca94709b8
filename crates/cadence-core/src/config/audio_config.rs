//! Derived runtime configuration of the mixing path
//!
//! Rebuilt from [`AudioSettings`] whenever the device or the settings change
//! and read-only for the scheduler in between.

use crate::config::AudioSettings;
use crate::types::{SampleFormat, BLOCK_SAMPLES, DEFAULT_SAMPLE_RATE};

/// Rolling-average smoothing factor for the enqueued playtime
pub const PERIOD_AVERAGE_ALPHA: f32 = 0.02;
/// Below this many microseconds of remaining wait the scheduler stops sleeping
pub const PERIOD_COMPARISON_MARGIN_US: u64 = 250;
/// Scale applied to the normalized fill level when requesting a stretch ratio
pub const TIME_STRETCHING_SCALE: f32 = 1.0;
/// Smallest ratio change worth applying
pub const TIME_STRETCHING_STEP: f32 = 0.1;
/// Extra periods of ring capacity on top of the prebuffer
pub const EXTRA_RING_PERIODS: u32 = 4;

/// Runtime configuration of the mixing scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct AudioConfig {
    pub sampling_rate: u32,
    /// Channels mixed per frame (2, 6 or 8)
    pub channels: usize,
    pub format: SampleFormat,
    /// Nominal period in microseconds
    pub block_period: u64,
    pub minimum_block_period: u64,
    pub maximum_block_period: u64,
    pub buffering_enabled: bool,
    pub desired_buffer_duration: u64,
    /// Periods of silence queued when playback (re)starts
    pub desired_full_buffers: u32,
    pub period_average_alpha: f32,
    pub period_comparison_margin: u64,
    pub fully_untouched_timeout: u64,
    pub partially_untouched_timeout: u64,
    pub time_stretching_enabled: bool,
    pub time_stretching_threshold: f32,
    pub time_stretching_scale: f32,
    pub time_stretching_step: f32,
    /// Linear master volume folded into every port level
    pub master_volume: f32,
}

impl AudioConfig {
    pub fn from_settings(settings: &AudioSettings) -> Self {
        Self::for_device(settings, DEFAULT_SAMPLE_RATE)
    }

    /// Configuration for a device running at `sampling_rate`
    pub fn for_device(settings: &AudioSettings, sampling_rate: u32) -> Self {
        let sampling_rate = sampling_rate.max(1);
        let block_period = BLOCK_SAMPLES as u64 * 1_000_000 / sampling_rate as u64;
        let buffering_enabled = settings.enable_buffering;
        let desired_buffer_duration = settings.desired_buffer_duration_us();

        let desired_full_buffers = if buffering_enabled {
            desired_buffer_duration.div_ceil(block_period) as u32 + 1
        } else {
            1
        };

        Self {
            sampling_rate,
            channels: settings.channel_layout.channels(),
            format: if settings.convert_to_s16 {
                SampleFormat::S16
            } else {
                SampleFormat::F32
            },
            block_period,
            minimum_block_period: block_period / 2,
            maximum_block_period: (6 * block_period) / 5,
            buffering_enabled,
            desired_buffer_duration,
            desired_full_buffers,
            period_average_alpha: PERIOD_AVERAGE_ALPHA,
            period_comparison_margin: PERIOD_COMPARISON_MARGIN_US,
            fully_untouched_timeout: 2 * block_period,
            partially_untouched_timeout: 4 * block_period,
            time_stretching_enabled: buffering_enabled
                && settings.enable_time_stretching
                && !settings.feeder_time_stretching(),
            time_stretching_threshold: settings.time_stretching_threshold_ratio(),
            time_stretching_scale: TIME_STRETCHING_SCALE,
            time_stretching_step: TIME_STRETCHING_STEP,
            master_volume: settings.volume_scale(),
        }
    }

    /// Samples (not frames) in one mixed period
    pub fn period_samples(&self) -> usize {
        BLOCK_SAMPLES * self.channels
    }

    /// Bytes of one mixed period as queued to the host ring
    pub fn period_bytes(&self) -> usize {
        self.period_samples() * std::mem::size_of::<f32>()
    }

    /// Bytes of one interleaved f32 frame
    pub fn frame_bytes(&self) -> usize {
        self.channels * std::mem::size_of::<f32>()
    }

    /// Ring capacity that holds the prebuffer plus headroom
    pub fn ring_capacity(&self) -> usize {
        let periods = self.desired_full_buffers + EXTRA_RING_PERIODS;
        let periods = if self.time_stretching_enabled {
            periods * 2
        } else {
            periods
        };
        periods as usize * self.period_bytes()
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self::from_settings(&AudioSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelLayout;

    #[test]
    fn test_default_periods() {
        let cfg = AudioConfig::default();
        assert_eq!(cfg.block_period, 5333);
        assert_eq!(cfg.minimum_block_period, 2666);
        assert_eq!(cfg.maximum_block_period, 6399);
        assert_eq!(cfg.fully_untouched_timeout, 2 * 5333);
        assert_eq!(cfg.partially_untouched_timeout, 4 * 5333);
        // ceil(100000 / 5333) + 1
        assert_eq!(cfg.desired_full_buffers, 20);
    }

    #[test]
    fn test_unbuffered_prebuffers_single_period() {
        let cfg = AudioConfig::from_settings(&AudioSettings::default().with_buffering(false));
        assert_eq!(cfg.desired_full_buffers, 1);
        assert!(!cfg.time_stretching_enabled);
    }

    #[test]
    fn test_surround_layout_sets_mix_channels() {
        let cfg = AudioConfig::from_settings(
            &AudioSettings::default().with_layout(ChannelLayout::Surround51),
        );
        assert_eq!(cfg.channels, 6);
        assert_eq!(cfg.period_bytes(), 256 * 6 * 4);
    }

    #[test]
    fn test_device_rate_scales_block_period() {
        let cfg = AudioConfig::for_device(&AudioSettings::default(), 96000);
        assert_eq!(cfg.block_period, 2666);
        assert_eq!(cfg.sampling_rate, 96000);
    }

    #[test]
    fn test_lle_stretching_moves_to_feeder() {
        let settings = AudioSettings::default().with_time_stretching(true);
        assert!(settings.enable_lle);
        assert!(!AudioConfig::from_settings(&settings).time_stretching_enabled);

        let settings = AudioSettings {
            enable_lle: false,
            ..settings
        };
        assert!(AudioConfig::from_settings(&settings).time_stretching_enabled);
    }

    #[test]
    fn test_ring_capacity_covers_prebuffer() {
        let cfg = AudioConfig::default();
        assert!(cfg.ring_capacity() >= cfg.desired_full_buffers as usize * cfg.period_bytes());
    }
}
