//! Backend without a device
//!
//! Accepts whatever parameters it is opened with. Nothing pulls audio on
//! its own; a [`NullHandle`] lets tests and headless hosts pull frames
//! synchronously, as a device callback would.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{AudioBackend, BackendCallbacks, StateEvent};
use crate::error::{AudioError, AudioResult};
use crate::types::{ChannelLayout, SampleFormat, StreamParams};

/// Frames reported per write callback
pub const NULL_CALLBACK_FRAMES: usize = 256;

#[derive(Default)]
struct NullShared {
    callbacks: Mutex<Option<Arc<dyn BackendCallbacks>>>,
    params: Mutex<StreamParams>,
    open: AtomicBool,
    playing: AtomicBool,
    failed: AtomicBool,
    default_changed: AtomicBool,
    opens: AtomicUsize,
}

/// Test/host side of a [`NullBackend`]
#[derive(Clone, Default)]
pub struct NullHandle {
    shared: Arc<NullShared>,
}

impl NullHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one write callback for `frames` frames
    ///
    /// Returns silence when the stream is closed or paused, like a device
    /// that is not pulling.
    pub fn pull(&self, frames: usize) -> Vec<u8> {
        let params = self.params();
        let mut buf = vec![0u8; frames * params.frame_bytes()];
        if !self.is_playing() {
            return buf;
        }

        let callbacks = self.shared.callbacks.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(callbacks) = callbacks {
            let written = callbacks.on_write(&mut buf).min(buf.len());
            buf[written..].fill(0);
        }
        buf
    }

    /// Pull `frames` frames and decode them as f32
    pub fn pull_f32(&self, frames: usize) -> Vec<f32> {
        let bytes = self.pull(frames);
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    /// Simulate a device failure
    pub fn fail(&self) {
        self.shared.failed.store(true, Ordering::SeqCst);
        self.shared.playing.store(false, Ordering::SeqCst);
        self.raise(StateEvent::UnspecifiedError);
    }

    /// Simulate a change of the system default device
    pub fn change_default_device(&self) {
        self.shared.default_changed.store(true, Ordering::SeqCst);
        self.raise(StateEvent::DefaultDeviceMaybeChanged);
    }

    /// Stop playback without telling anybody
    pub fn stop_silently(&self) {
        self.shared.playing.store(false, Ordering::SeqCst);
    }

    fn raise(&self, event: StateEvent) {
        let callbacks = self.shared.callbacks.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(callbacks) = callbacks {
            callbacks.on_state(event);
        }
    }

    pub fn params(&self) -> StreamParams {
        *self.shared.params.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    /// Number of successful opens so far
    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }
}

/// Backend that plays into nothing
#[derive(Default)]
pub struct NullBackend {
    handle: NullHandle,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend driven through an existing handle
    pub fn with_handle(handle: NullHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> NullHandle {
        self.handle.clone()
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn open(&mut self, _device: Option<&str>, params: StreamParams) -> AudioResult<()> {
        let shared = &self.handle.shared;
        if shared.callbacks.lock().unwrap_or_else(|e| e.into_inner()).is_none() {
            return Err(AudioError::NotOperational);
        }
        *shared.params.lock().unwrap_or_else(|e| e.into_inner()) = params;
        shared.failed.store(false, Ordering::SeqCst);
        shared.playing.store(false, Ordering::SeqCst);
        shared.open.store(true, Ordering::SeqCst);
        shared.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        let shared = &self.handle.shared;
        shared.open.store(false, Ordering::SeqCst);
        shared.playing.store(false, Ordering::SeqCst);
    }

    fn play(&mut self) {
        if self.operational() {
            self.handle.shared.playing.store(true, Ordering::SeqCst);
        }
    }

    fn pause(&mut self) {
        self.handle.shared.playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.handle.is_playing()
    }

    fn operational(&self) -> bool {
        self.handle.is_open() && !self.handle.shared.failed.load(Ordering::SeqCst)
    }

    fn default_device_changed(&mut self) -> bool {
        self.handle.shared.default_changed.swap(false, Ordering::SeqCst)
    }

    fn set_callbacks(&mut self, callbacks: Arc<dyn BackendCallbacks>) {
        *self.handle.shared.callbacks.lock().unwrap_or_else(|e| e.into_inner()) = Some(callbacks);
    }

    fn sample_rate(&self) -> u32 {
        self.handle.params().sample_rate
    }

    fn format(&self) -> SampleFormat {
        self.handle.params().format
    }

    fn layout(&self) -> ChannelLayout {
        self.handle.params().layout
    }

    fn callback_frame_len(&self) -> usize {
        NULL_CALLBACK_FRAMES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant;

    impl BackendCallbacks for Constant {
        fn on_write(&self, buf: &mut [u8]) -> usize {
            buf.fill(0x11);
            buf.len() / 2
        }

        fn on_state(&self, _event: StateEvent) {}
    }

    #[test]
    fn test_open_requires_callbacks() {
        let mut backend = NullBackend::new();
        assert!(backend.open(None, StreamParams::default()).is_err());
        backend.set_callbacks(Arc::new(Constant));
        assert!(backend.open(None, StreamParams::default()).is_ok());
        assert!(backend.operational());
        assert!(!backend.is_playing());
    }

    #[test]
    fn test_pull_silences_short_writes() {
        let mut backend = NullBackend::new();
        let handle = backend.handle();
        backend.set_callbacks(Arc::new(Constant));
        backend.open(None, StreamParams::default()).unwrap();

        // paused: no callback
        assert!(handle.pull(4).iter().all(|&b| b == 0));

        backend.play();
        let out = handle.pull(4);
        assert_eq!(out.len(), 4 * 8);
        assert!(out[..16].iter().all(|&b| b == 0x11));
        assert!(out[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_failure_stops_playback() {
        let mut backend = NullBackend::new();
        let handle = backend.handle();
        backend.set_callbacks(Arc::new(Constant));
        backend.open(None, StreamParams::default()).unwrap();
        backend.play();
        handle.fail();
        assert!(!backend.operational());
        assert!(!backend.is_playing());
    }
}
