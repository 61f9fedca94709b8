//! Configuration for the audio pipeline
//!
//! - Persisted user settings ([`AudioSettings`]) with YAML load/save
//! - The derived runtime [`AudioConfig`] consumed by the mixing scheduler
//! - Standard settings paths
//!
//! # Usage
//!
//! ```ignore
//! use cadence_core::config::{default_config_path, load_config, AudioConfig, AudioSettings};
//!
//! let settings: AudioSettings = load_config(&default_config_path("audio.yaml"));
//! let cfg = AudioConfig::from_settings(&settings);
//! ```

mod audio_config;
mod io;
mod paths;
mod settings;

pub use audio_config::{
    AudioConfig, EXTRA_RING_PERIODS, PERIOD_AVERAGE_ALPHA, PERIOD_COMPARISON_MARGIN_US,
    TIME_STRETCHING_SCALE, TIME_STRETCHING_STEP,
};
pub use io::{load_config, save_config};
pub use paths::{config_dir, default_config_path};
pub use settings::{
    AudioSettings, BackendKind, MAX_BUFFER_DURATION_MS, MAX_VOLUME_PERCENT, MIN_BUFFER_DURATION_MS,
};
