//! Audio backend abstraction
//!
//! A backend owns one platform output stream. It pulls audio through
//! [`BackendCallbacks::on_write`] on the platform's real-time thread and
//! reports device trouble through [`BackendCallbacks::on_state`].
//!
//! Backends are created by a [`BackendFactory`] on the feeder thread and
//! never leave it: platform streams are generally not `Send`.

mod cpal_backend;
mod null;

use std::sync::Arc;

pub use cpal_backend::CpalBackend;
pub use null::{NullBackend, NullHandle};

use crate::config::{AudioSettings, BackendKind};
use crate::error::AudioResult;
use crate::types::{ChannelLayout, SampleFormat, StreamParams};

/// Asynchronous device notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// The stream failed; the device may be gone
    UnspecifiedError,
    /// The system default output may have changed
    DefaultDeviceMaybeChanged,
}

/// Receiver of backend callbacks
pub trait BackendCallbacks: Send + Sync {
    /// Fill `buf` with interleaved samples in the negotiated format
    ///
    /// Runs on the platform's real-time thread. Returns the number of bytes
    /// produced; the backend silences anything beyond that.
    fn on_write(&self, buf: &mut [u8]) -> usize;

    /// Device state changed
    fn on_state(&self, event: StateEvent);
}

/// Platform audio output
pub trait AudioBackend {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Open `device` (or the default device) for `params`
    ///
    /// The backend may negotiate different parameters; query them with the
    /// accessors afterwards. The stream starts paused.
    fn open(&mut self, device: Option<&str>, params: StreamParams) -> AudioResult<()>;

    /// Close the stream, if any
    fn close(&mut self);

    fn play(&mut self);

    fn pause(&mut self);

    fn is_playing(&self) -> bool;

    /// Whether the stream is open and has not failed
    fn operational(&self) -> bool;

    /// Whether the system default device differs from the one opened
    fn default_device_changed(&mut self) -> bool;

    /// Install the callbacks; must be called before [`AudioBackend::open`]
    fn set_callbacks(&mut self, callbacks: Arc<dyn BackendCallbacks>);

    /// Negotiated sample rate
    fn sample_rate(&self) -> u32;

    /// Negotiated sample format
    fn format(&self) -> SampleFormat;

    /// Negotiated channel layout
    fn layout(&self) -> ChannelLayout;

    /// Frames requested per write callback
    fn callback_frame_len(&self) -> usize;

    /// Negotiated stream parameters
    fn params(&self) -> StreamParams {
        StreamParams::new(self.sample_rate(), self.format(), self.layout())
    }
}

/// Creates a backend for the current settings
pub type BackendFactory = Box<dyn Fn(&AudioSettings) -> Box<dyn AudioBackend> + Send>;

/// Factory picking the backend named in the settings
pub fn default_backend_factory() -> BackendFactory {
    Box::new(|settings: &AudioSettings| -> Box<dyn AudioBackend> {
        match settings.backend {
            BackendKind::Null => Box::new(NullBackend::new()),
            BackendKind::Cpal => Box::new(CpalBackend::new()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_factory_honours_kind() {
        let factory = default_backend_factory();
        let backend = factory(&AudioSettings::default().with_backend(BackendKind::Null));
        assert_eq!(backend.name(), "null");
    }
}
