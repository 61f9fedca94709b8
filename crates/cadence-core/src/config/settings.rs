//! Persisted audio settings
//!
//! These are the user-facing knobs. The mixing scheduler never reads them
//! directly; it works from an [`AudioConfig`](super::AudioConfig) derived from
//! them on every (re)configuration.

use serde::{Deserialize, Serialize};

use crate::types::{AvPort, ChannelLayout};

/// Shortest buffer the user may ask for (ms)
pub const MIN_BUFFER_DURATION_MS: u32 = 20;
/// Longest buffer the user may ask for (ms)
pub const MAX_BUFFER_DURATION_MS: u32 = 250;
/// Upper bound of the master volume setting (percent)
pub const MAX_VOLUME_PERCENT: u32 = 200;

/// Which device backend the feeder constructs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendKind {
    /// Discards audio; used headless and in tests
    Null,
    /// System audio through CPAL
    #[default]
    Cpal,
}

/// User audio settings, stored as YAML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub backend: BackendKind,
    /// Output device name (None = system default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub channel_layout: ChannelLayout,
    /// Deliver 16-bit integer samples to the device instead of floats
    pub convert_to_s16: bool,
    /// Master volume in percent
    pub volume: u32,
    /// Adaptive buffering on the mixing path
    pub enable_buffering: bool,
    pub desired_buffer_duration_ms: u32,
    pub enable_time_stretching: bool,
    /// Buffer fill level (percent of desired) below which time-stretching kicks in
    pub time_stretching_threshold: u32,
    /// AV port whose stream is sent to the device by the LLE path
    pub avport: AvPort,
    /// Run the virtual timer / extraction thread
    pub enable_lle: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            device: None,
            channel_layout: ChannelLayout::Stereo,
            convert_to_s16: false,
            volume: 100,
            enable_buffering: true,
            desired_buffer_duration_ms: 100,
            enable_time_stretching: false,
            time_stretching_threshold: 75,
            avport: AvPort::default(),
            enable_lle: true,
        }
    }
}

impl AudioSettings {
    /// Master volume as a linear factor
    pub fn volume_scale(&self) -> f32 {
        self.volume.min(MAX_VOLUME_PERCENT) as f32 / 100.0
    }

    /// Desired buffer duration in microseconds, clamped to the supported range
    pub fn desired_buffer_duration_us(&self) -> u64 {
        self.desired_buffer_duration_ms
            .clamp(MIN_BUFFER_DURATION_MS, MAX_BUFFER_DURATION_MS) as u64
            * 1000
    }

    /// Time-stretch threshold as a fraction of the desired fill level
    pub fn time_stretching_threshold_ratio(&self) -> f32 {
        self.time_stretching_threshold.clamp(1, 100) as f32 / 100.0
    }

    /// Whether time-stretching runs in the feeder's auxiliary stage
    ///
    /// The LLE path writes at the virtual hardware cadence, so its stream is
    /// stretched after the ring instead of before it.
    pub fn feeder_time_stretching(&self) -> bool {
        self.enable_buffering && self.enable_time_stretching && self.enable_lle
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_layout(mut self, layout: ChannelLayout) -> Self {
        self.channel_layout = layout;
        self
    }

    pub fn with_buffering(mut self, enabled: bool) -> Self {
        self.enable_buffering = enabled;
        self
    }

    pub fn with_time_stretching(mut self, enabled: bool) -> Self {
        self.enable_time_stretching = enabled;
        self
    }

    pub fn with_lle(mut self, enabled: bool) -> Self {
        self.enable_lle = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = AudioSettings::default();
        assert_eq!(settings.volume_scale(), 1.0);
        assert_eq!(settings.desired_buffer_duration_us(), 100_000);
        assert!((settings.time_stretching_threshold_ratio() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let settings = AudioSettings {
            volume: 1000,
            desired_buffer_duration_ms: 5,
            time_stretching_threshold: 0,
            ..Default::default()
        };
        assert_eq!(settings.volume_scale(), 2.0);
        assert_eq!(settings.desired_buffer_duration_us(), 20_000);
        assert!((settings.time_stretching_threshold_ratio() - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_yaml_uses_readable_names() {
        let yaml = serde_yaml::to_string(&AudioSettings::default().with_layout(ChannelLayout::Surround71))
            .unwrap();
        assert!(yaml.contains("channel_layout: Surround71"));
        assert!(!yaml.contains("device"));
    }
}
