//! Error types
//!
//! Two families live here: `AudioError` for host-side failures (devices,
//! allocation) and `GuestError` for the status codes handed back to emulated
//! code through the port control surface.

use thiserror::Error;

use crate::memory::MemoryError;

/// Errors that can occur during host audio operations
#[derive(Error, Debug)]
pub enum AudioError {
    /// No audio devices available
    #[error("No audio output devices found")]
    NoDevices,

    /// Failed to get default device
    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    /// Device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to get device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start/play stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Unsupported sample format
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Backend has not been opened or lost its device
    #[error("Audio backend is not operational")]
    NotOperational,

    /// Ring buffer storage could not be grown
    #[error("Failed to allocate {0} bytes of ring buffer storage")]
    RingAllocation(usize),

    /// Failed to spawn a worker thread
    #[error("Failed to spawn thread {name}: {reason}")]
    ThreadSpawn { name: &'static str, reason: String },

    /// Guest memory access outside of the arena
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Result type for host audio operations
pub type AudioResult<T> = Result<T, AudioError>;

/// Status codes returned to guest code by the port control surface
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuestError {
    #[error("audio already initialized")]
    AlreadyInit,
    #[error("audio system error")]
    AudioSystem,
    #[error("audio not initialized")]
    NotInit,
    #[error("invalid parameter")]
    Param,
    #[error("no free audio port")]
    PortFull,
    #[error("port already running")]
    PortAlreadyRun,
    #[error("port not open")]
    PortNotOpen,
    #[error("port not running")]
    PortNotRun,
    #[error("event queue transfer error")]
    TransEvent,
    #[error("port open error")]
    PortOpen,
    #[error("shared memory error")]
    SharedMemory,
    #[error("mutex error")]
    Mutex,
    #[error("event queue error")]
    EventQueue,
    #[error("audio system not found")]
    AudioSystemNotFound,
    #[error("tag not found")]
    TagNotFound,
}

impl GuestError {
    /// Raw status code as seen by the guest
    pub const fn code(self) -> u32 {
        match self {
            GuestError::AlreadyInit => 0x8031_0701,
            GuestError::AudioSystem => 0x8031_0702,
            GuestError::NotInit => 0x8031_0703,
            GuestError::Param => 0x8031_0704,
            GuestError::PortFull => 0x8031_0705,
            GuestError::PortAlreadyRun => 0x8031_0706,
            GuestError::PortNotOpen => 0x8031_0707,
            GuestError::PortNotRun => 0x8031_0708,
            GuestError::TransEvent => 0x8031_0709,
            GuestError::PortOpen => 0x8031_070a,
            GuestError::SharedMemory => 0x8031_070b,
            GuestError::Mutex => 0x8031_070c,
            GuestError::EventQueue => 0x8031_070d,
            GuestError::AudioSystemNotFound => 0x8031_070e,
            GuestError::TagNotFound => 0x8031_070f,
        }
    }
}

impl From<MemoryError> for GuestError {
    fn from(_: MemoryError) -> Self {
        GuestError::Param
    }
}

/// Result type for the guest control surface
pub type GuestResult<T> = Result<T, GuestError>;
