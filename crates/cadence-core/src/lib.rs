//! Cadence Core - Real-time audio pipeline for console emulation

pub mod backend;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod feeder;
pub mod guest;
pub mod memory;
pub mod mixer;
pub mod notify;
pub mod port;
pub mod resampler;
pub mod ring;
pub mod rsx;
pub mod scheduler;
pub mod timer;
pub mod types;

pub use engine::AudioEngine;
pub use error::{AudioError, AudioResult, GuestError, GuestResult};
pub use types::*;
