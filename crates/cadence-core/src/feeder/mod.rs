//! Backend feeder
//!
//! Owns the device backend on a dedicated `audio-feeder` thread and feeds it
//! from the host ring buffer through [`FeederCallback`].
//!
//! ```text
//! ┌──────────────┐  reconfigure / play / pause   ┌──────────────────────┐
//! │ cell-audio   │──────────────────────────────►│   audio-feeder       │
//! │ rsx-audio    │   (FeederControl + Condvar)   │  owns AudioBackend   │
//! └──────┬───────┘                               │  reopen / retry      │
//!        │ push                                  │  aux stretch stage   │
//!        ▼                                       └──────────┬───────────┘
//! ┌──────────────┐   pop (try-lock)   ┌─────────────────┐   │ open/play
//! │ ring / aux   │───────────────────►│ FeederCallback  │◄──┘
//! └──────────────┘                    │ (device thread) │
//!                                     └─────────────────┘
//! ```
//!
//! Reconfiguration publishes a not-ready [`CallbackConfig`] first, swaps the
//! device and resizes the rings, then publishes the new ready snapshot. The
//! device callback sees either the old or the new configuration, never a mix.

pub mod callback;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub use callback::{CallbackConfig, FeederCallback, SharedCallbackConfig, VolumeRamp, VOLUME_RAMP_MS};

use crate::backend::{AudioBackend, BackendCallbacks, BackendFactory, StateEvent};
use crate::config::{AudioConfig, AudioSettings};
use crate::error::{AudioError, AudioResult};
use crate::resampler::{Resampler, StretchResampler};
use crate::ring::HostRingBuffer;
use crate::scheduler::period::stretch_ratio;
use crate::types::{AvPort, SampleFormat, StreamParams, DEFAULT_SAMPLE_RATE};

/// Wake-up interval while nothing else is going on
pub const SERVICE_INTERVAL: Duration = Duration::from_millis(100);
/// Delay between reopen attempts of a failed device
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// How often the system default device is polled
pub const DEVICE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What the feeder currently has open
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Negotiated stream parameters (requested ones when the open failed)
    pub params: StreamParams,
    pub callback_frames: usize,
    /// Mixing configuration derived for this device
    pub config: AudioConfig,
    pub operational: bool,
    /// Bumped on every reopen
    pub generation: u64,
}

/// Requests queued for the feeder thread
#[derive(Debug, Default)]
struct FeederControl {
    settings: Option<AudioSettings>,
    play: Option<bool>,
    shutdown: bool,
}

impl FeederControl {
    fn is_pending(&self) -> bool {
        self.settings.is_some() || self.play.is_some() || self.shutdown
    }
}

/// State shared between the feeder thread, its producers and the device callback
pub struct FeederShared {
    pub callback_config: SharedCallbackConfig,
    /// Frames queued by the mixing and LLE paths
    pub ring: HostRingBuffer,
    /// Time-stretched copy of `ring`, used when the feeder stretches
    pub aux_ring: HostRingBuffer,
    /// Set by the device callback when the data ran out mid-stream
    pub(crate) underrun: AtomicBool,
    /// Set by the feeder after the device stopped on its own
    restart: AtomicBool,
    backend_error: AtomicBool,
    device_changed: AtomicBool,
    backend_playing: AtomicBool,
    operational: AtomicBool,
    control: Mutex<FeederControl>,
    wake: Condvar,
    device: Mutex<Option<DeviceInfo>>,
    device_ready: Condvar,
    generation: AtomicU64,
}

impl FeederShared {
    pub fn new(ring: HostRingBuffer) -> Self {
        Self {
            callback_config: SharedCallbackConfig::default(),
            ring,
            aux_ring: HostRingBuffer::new(0),
            underrun: AtomicBool::new(false),
            restart: AtomicBool::new(false),
            backend_error: AtomicBool::new(false),
            device_changed: AtomicBool::new(false),
            backend_playing: AtomicBool::new(false),
            operational: AtomicBool::new(false),
            control: Mutex::new(FeederControl::default()),
            wake: Condvar::new(),
            device: Mutex::new(None),
            device_ready: Condvar::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn ring(&self) -> &HostRingBuffer {
        &self.ring
    }

    /// Whether the device callback starved since the last call
    pub fn take_underrun(&self) -> bool {
        self.underrun.swap(false, Ordering::AcqRel)
    }

    /// Whether the output has to be re-primed (device restart or underrun)
    pub fn take_restart(&self) -> bool {
        let restart = self.restart.swap(false, Ordering::AcqRel);
        self.take_underrun() || restart
    }

    /// Record an asynchronous device event and wake the feeder
    ///
    /// Only touches atomics, so it is safe from the device's own threads.
    pub fn notify_state(&self, event: StateEvent) {
        match event {
            StateEvent::UnspecifiedError => self.backend_error.store(true, Ordering::Release),
            StateEvent::DefaultDeviceMaybeChanged => self.device_changed.store(true, Ordering::Release),
        }
        self.wake.notify_one();
    }

    fn control(&self) -> MutexGuard<'_, FeederControl> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn post(&self, f: impl FnOnce(&mut FeederControl)) {
        f(&mut self.control());
        self.wake.notify_one();
    }

    /// Apply new settings; the device is reopened when they differ
    pub fn reconfigure(&self, settings: AudioSettings) {
        self.post(|c| c.settings = Some(settings));
    }

    pub fn request_play(&self) {
        self.post(|c| c.play = Some(true));
    }

    pub fn request_pause(&self) {
        self.post(|c| c.play = Some(false));
    }

    /// Device volume, ramped by the callback
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_finite() { volume.max(0.0) } else { 0.0 };
        self.callback_config.update(|c| c.target_volume = volume);
    }

    pub fn set_mute_mask(&self, mask: u8) {
        self.callback_config.update(|c| c.mute_mask = mask);
    }

    /// Select the AV port that reaches the device
    pub fn set_avport(&self, avport: AvPort) {
        self.callback_config.update(|c| c.avport = avport);
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.device.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Wait up to `timeout` for a device newer than `generation`
    pub fn wait_device(&self, generation: u64, timeout: Duration) -> Option<DeviceInfo> {
        let guard = self.device.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = self
            .device_ready
            .wait_timeout_while(guard, timeout, |d| d.as_ref().map_or(true, |d| d.generation <= generation))
            .unwrap_or_else(|e| e.into_inner());
        guard.as_ref().filter(|d| d.generation > generation).cloned()
    }

    /// Make a freshly opened device visible to the producers
    pub(crate) fn publish_device(
        &self,
        params: StreamParams,
        callback_frames: usize,
        config: AudioConfig,
        operational: bool,
    ) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        {
            let mut device = self.device.lock().unwrap_or_else(|e| e.into_inner());
            *device = Some(DeviceInfo {
                params,
                callback_frames,
                config,
                operational,
                generation,
            });
        }
        self.device_ready.notify_all();
        generation
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_operational(&self) -> bool {
        self.operational.load(Ordering::Acquire)
    }

    /// Whether the feeder has the device running
    pub fn is_device_playing(&self) -> bool {
        self.backend_playing.load(Ordering::Acquire)
    }

    /// Bytes queued towards the device, including the stretched copy
    pub fn queued_bytes(&self) -> usize {
        let cfg = self.callback_config.load();
        let mut queued = self.ring.used_size();
        if cfg.use_aux {
            queued += self.aux_ring.used_size();
        }
        queued
    }

    /// Drop everything queued towards the device
    pub fn flush(&self) {
        self.ring.flush();
        self.aux_ring.flush();
    }

    pub fn shutdown(&self) {
        self.post(|c| c.shutdown = true);
    }
}

impl std::fmt::Debug for FeederShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeederShared")
            .field("ring", &self.ring)
            .field("aux_ring", &self.aux_ring)
            .field("generation", &self.generation())
            .finish()
    }
}

/// Time-stretch stage between the main ring and the auxiliary ring
struct AuxStage {
    resampler: StretchResampler,
    channels: usize,
    /// Target fill of the aux ring in frames
    desired_frames: f32,
    threshold: f32,
    scale: f32,
    step: f32,
    ratio: f32,
    input: Vec<f32>,
    output: Vec<f32>,
    period: Duration,
}

impl AuxStage {
    fn new(cfg: &AudioConfig, settings: &AudioSettings) -> Self {
        let channels = cfg.channels.max(1);
        Self {
            resampler: StretchResampler::new(channels, cfg.sampling_rate),
            channels,
            desired_frames: (cfg.desired_buffer_duration * cfg.sampling_rate as u64 / 1_000_000).max(1) as f32,
            threshold: settings.time_stretching_threshold_ratio(),
            scale: cfg.time_stretching_scale,
            step: cfg.time_stretching_step,
            ratio: 1.0,
            input: vec![0.0; cfg.ring_capacity() / 4],
            output: vec![0.0; cfg.period_samples() * 4],
            period: Duration::from_micros(cfg.block_period.max(1)),
        }
    }

    /// Move whatever the main ring holds through the stretcher
    fn service(&mut self, ring: &HostRingBuffer, aux: &HostRingBuffer) {
        let frame_bytes = self.channels * 4;

        let queued = aux.used_size() / frame_bytes + self.resampler.samples_available();
        let fill = queued as f32 / self.desired_frames;
        let ratio = stretch_ratio(fill, self.ratio, self.threshold, self.scale, self.step);
        if ratio != self.ratio {
            log::trace!("Feeder stretch ratio {:.2} -> {:.2} (fill {:.2})", self.ratio, ratio, fill);
            self.ratio = ratio;
            self.resampler.set_tempo(ratio);
        }

        let available = ring.used_size().min(self.input.len() * 4);
        let bytes = available - available % frame_bytes;
        if bytes > 0 {
            let input = &mut self.input[..bytes / 4];
            if ring.pop(bytemuck::cast_slice_mut(&mut *input), false) == bytes {
                self.resampler.put_samples(input, bytes / frame_bytes);
            }
        }

        loop {
            let room = (aux.free_size() / frame_bytes * self.channels).min(self.output.len());
            if room == 0 {
                break;
            }
            let frames = self.resampler.get_samples(&mut self.output[..room]);
            if frames == 0 {
                break;
            }
            aux.push(bytemuck::cast_slice(&self.output[..frames * self.channels]));
        }
    }
}

/// State private to the feeder thread
struct FeederWorker {
    shared: Arc<FeederShared>,
    factory: BackendFactory,
    callbacks: Arc<FeederCallback>,
    backend: Option<Box<dyn AudioBackend>>,
    settings: AudioSettings,
    want_playing: bool,
    aux: Option<AuxStage>,
    last_open: Instant,
    last_device_poll: Instant,
    /// An unexpected stop was already reported for this device
    stop_reported: bool,
}

impl FeederWorker {
    fn new(shared: Arc<FeederShared>, settings: AudioSettings, factory: BackendFactory) -> Self {
        let callbacks = Arc::new(FeederCallback::new(Arc::clone(&shared)));
        Self {
            shared,
            factory,
            callbacks,
            backend: None,
            settings,
            want_playing: false,
            aux: None,
            last_open: Instant::now(),
            last_device_poll: Instant::now(),
            stop_reported: false,
        }
    }

    fn operational(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.operational())
    }

    /// Close the current device and open one for the current settings
    fn reopen(&mut self) {
        self.shared.callback_config.update(|c| c.ready = false);
        if let Some(mut old) = self.backend.take() {
            old.close();
        }
        self.shared.backend_playing.store(false, Ordering::Release);

        let mut backend = (self.factory)(&self.settings);
        backend.set_callbacks(Arc::clone(&self.callbacks) as Arc<dyn BackendCallbacks>);

        let format = if self.settings.convert_to_s16 {
            SampleFormat::S16
        } else {
            SampleFormat::F32
        };
        let requested = StreamParams::new(DEFAULT_SAMPLE_RATE, format, self.settings.channel_layout);

        let (params, callback_frames, operational) =
            match backend.open(self.settings.device.as_deref(), requested) {
                Ok(()) => (backend.params(), backend.callback_frame_len(), true),
                Err(e) => {
                    log::warn!("Failed to open {} audio backend: {}", backend.name(), e);
                    (requested, 0, false)
                }
            };

        let config = AudioConfig::for_device(&self.settings, params.sample_rate);
        let capacity = config
            .ring_capacity()
            .max(callback_frames * config.frame_bytes() * 2);

        let mut ready = true;
        if let Err(e) = self.shared.ring.set_capacity(capacity) {
            log::error!("Audio output disabled for this session: {}", e);
            ready = false;
        }

        let use_aux = self.settings.feeder_time_stretching();
        if use_aux {
            if let Err(e) = self.shared.aux_ring.set_capacity(capacity) {
                log::error!("Audio output disabled for this session: {}", e);
                ready = false;
            }
            self.aux = Some(AuxStage::new(&config, &self.settings));
        } else {
            self.shared.aux_ring.flush();
            self.aux = None;
        }

        let avport = self.settings.avport;
        self.shared.callback_config.update(|c| {
            c.sample_rate = params.sample_rate;
            c.input_channels = config.channels;
            c.output_layout = params.layout;
            c.convert_to_s16 = params.format == SampleFormat::S16;
            c.avport = avport;
            c.use_aux = use_aux;
            c.ready = ready;
        });
        self.shared.operational.store(operational, Ordering::Release);

        self.shared.publish_device(params, callback_frames, config, operational);

        if operational {
            log::info!(
                "Audio device ready ({}): {}Hz {:?} {:?}, {} frames per callback",
                backend.name(),
                params.sample_rate,
                params.format,
                params.layout,
                callback_frames
            );
            self.stop_reported = false;
        }

        self.backend = Some(backend);
        self.last_open = Instant::now();
        if self.want_playing {
            self.play();
        }
    }

    fn play(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            if backend.operational() {
                backend.play();
                self.shared
                    .backend_playing
                    .store(backend.is_playing(), Ordering::Release);
            }
        }
    }

    fn pause(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            backend.pause();
        }
        self.shared.backend_playing.store(false, Ordering::Release);
    }

    fn wait_timeout(&self) -> Duration {
        match &self.aux {
            Some(aux) if self.want_playing => aux.period,
            _ => SERVICE_INTERVAL,
        }
    }

    /// Block until something needs doing, then take the queued requests
    fn wait(&self) -> FeederControl {
        let shared = &self.shared;
        let guard = shared.control();
        let (mut guard, _) = shared
            .wake
            .wait_timeout_while(guard, self.wait_timeout(), |c| {
                !c.is_pending()
                    && !shared.backend_error.load(Ordering::Acquire)
                    && !shared.device_changed.load(Ordering::Acquire)
            })
            .unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *guard)
    }

    fn run(mut self) {
        log::info!("Audio feeder started");
        self.reopen();

        loop {
            let control = self.wait();
            if control.shutdown {
                break;
            }

            let mut reopen = false;

            if let Some(settings) = control.settings {
                if settings != self.settings {
                    log::info!("Audio settings changed, reopening device");
                    self.settings = settings;
                    reopen = true;
                }
            }

            if self.shared.backend_error.swap(false, Ordering::AcqRel) {
                log::warn!("Audio backend reported an error, reopening device");
                reopen = true;
            }

            let mut device_changed = self.shared.device_changed.swap(false, Ordering::AcqRel);
            if self.last_device_poll.elapsed() >= DEVICE_POLL_INTERVAL {
                self.last_device_poll = Instant::now();
                if let Some(backend) = self.backend.as_mut() {
                    device_changed |= backend.default_device_changed();
                }
            }
            if device_changed && self.settings.device.is_none() {
                log::info!("Default audio device changed, reopening");
                reopen = true;
            }

            if !reopen && !self.operational() && self.last_open.elapsed() >= RETRY_INTERVAL {
                log::debug!("Retrying audio device open");
                reopen = true;
            }

            if !reopen && self.want_playing && self.shared.is_device_playing() {
                let stopped = self.backend.as_ref().is_some_and(|b| !b.is_playing());
                if stopped {
                    if !self.stop_reported {
                        log::warn!("Audio device stopped unexpectedly, restarting");
                        self.stop_reported = true;
                    }
                    self.shared.restart.store(true, Ordering::Release);
                    reopen = true;
                }
            }

            if reopen {
                self.reopen();
            }

            match control.play {
                Some(true) if !self.want_playing => {
                    self.want_playing = true;
                    self.play();
                }
                Some(false) if self.want_playing => {
                    self.want_playing = false;
                    self.pause();
                }
                _ => {}
            }

            if let Some(aux) = self.aux.as_mut() {
                aux.service(&self.shared.ring, &self.shared.aux_ring);
            }
        }

        self.shared.callback_config.update(|c| c.ready = false);
        if let Some(mut backend) = self.backend.take() {
            backend.close();
        }
        self.shared.backend_playing.store(false, Ordering::Release);
        self.shared.operational.store(false, Ordering::Release);
        log::info!("Audio feeder stopped");
    }
}

/// Handle to the running `audio-feeder` thread
pub struct FeederHandle {
    shared: Arc<FeederShared>,
    thread_handle: Option<JoinHandle<()>>,
}

impl FeederHandle {
    /// Start the feeder; the device is opened on the new thread
    pub fn spawn(shared: Arc<FeederShared>, settings: AudioSettings, factory: BackendFactory) -> AudioResult<Self> {
        let worker = FeederWorker::new(Arc::clone(&shared), settings, factory);
        let thread_handle = thread::Builder::new()
            .name("audio-feeder".to_string())
            .spawn(move || worker.run())
            .map_err(|e| AudioError::ThreadSpawn {
                name: "audio-feeder",
                reason: e.to_string(),
            })?;

        Ok(Self {
            shared,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn shared(&self) -> &Arc<FeederShared> {
        &self.shared
    }

    /// Close the device and join the thread
    pub fn stop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            self.shared.shutdown();
            if handle.join().is_err() {
                log::error!("Audio feeder thread panicked");
            }
        }
    }
}

impl Drop for FeederHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{NullBackend, NullHandle};
    use crate::config::BackendKind;
    use crate::types::ChannelLayout;
    use std::sync::atomic::AtomicUsize;

    const TIMEOUT: Duration = Duration::from_secs(3);

    fn wait_until(cond: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < TIMEOUT {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn null_factory(handle: &NullHandle) -> BackendFactory {
        let handle = handle.clone();
        Box::new(move |_: &AudioSettings| -> Box<dyn AudioBackend> {
            Box::new(NullBackend::with_handle(handle.clone()))
        })
    }

    fn start(settings: AudioSettings) -> (FeederHandle, NullHandle, DeviceInfo) {
        let null = NullHandle::new();
        let shared = Arc::new(FeederShared::new(HostRingBuffer::new(0)));
        let feeder = FeederHandle::spawn(shared, settings, null_factory(&null)).unwrap();
        let device = feeder.shared().wait_device(0, TIMEOUT).unwrap();
        (feeder, null, device)
    }

    fn settings() -> AudioSettings {
        AudioSettings::default().with_backend(BackendKind::Null)
    }

    #[test]
    fn test_open_publishes_ready_config() {
        let (feeder, null, device) = start(settings());
        assert!(device.operational);
        assert_eq!(device.params, StreamParams::default());
        assert_eq!(device.config.block_period, 5333);
        assert!(null.is_open());

        let shared = feeder.shared();
        let cfg = shared.callback_config.load();
        assert!(cfg.ready);
        assert_eq!(cfg.input_channels, 2);
        assert!(!cfg.use_aux);
        assert!(shared.ring.capacity() >= device.config.ring_capacity());
        assert!(shared.is_operational());
    }

    #[test]
    fn test_play_feeds_device_from_ring() {
        let (feeder, null, _) = start(settings());
        let shared = Arc::clone(feeder.shared());
        shared.request_play();
        assert!(wait_until(|| null.is_playing()));

        let samples: Vec<f32> = (0..64).map(|i| i as f32 / 64.0).collect();
        shared.ring.push(bytemuck::cast_slice(&samples));
        assert_eq!(null.pull_f32(32), samples);

        shared.request_pause();
        assert!(wait_until(|| !null.is_playing()));
    }

    #[test]
    fn test_backend_error_reopens() {
        let (feeder, null, device) = start(settings());
        feeder.shared().request_play();
        assert!(wait_until(|| null.is_playing()));

        null.fail();
        let reopened = feeder.shared().wait_device(device.generation, TIMEOUT).unwrap();
        assert!(reopened.operational);
        assert_eq!(null.open_count(), 2);
        assert!(wait_until(|| null.is_playing()));
    }

    #[test]
    fn test_unexpected_stop_requests_restart() {
        let (feeder, null, device) = start(settings());
        let shared = Arc::clone(feeder.shared());
        shared.request_play();
        assert!(wait_until(|| shared.is_device_playing()));

        null.stop_silently();
        assert!(shared.wait_device(device.generation, TIMEOUT).is_some());
        assert!(shared.take_restart());
        assert!(wait_until(|| null.is_playing()));
    }

    #[test]
    fn test_default_device_change_reopens() {
        let (feeder, null, device) = start(settings());
        null.change_default_device();
        assert!(feeder.shared().wait_device(device.generation, TIMEOUT).is_some());
        assert_eq!(null.open_count(), 2);
    }

    #[test]
    fn test_explicit_device_ignores_default_change() {
        let (feeder, null, device) = start(settings().with_device("Speakers"));
        null.change_default_device();
        assert!(feeder
            .shared()
            .wait_device(device.generation, Duration::from_millis(300))
            .is_none());
        assert_eq!(null.open_count(), 1);
    }

    #[test]
    fn test_reconfigure_changes_layout() {
        let (feeder, null, device) = start(settings());
        let shared = feeder.shared();
        shared.reconfigure(settings().with_layout(ChannelLayout::Surround51));
        let reopened = shared.wait_device(device.generation, TIMEOUT).unwrap();
        assert_eq!(reopened.params.layout, ChannelLayout::Surround51);
        assert_eq!(reopened.config.channels, 6);
        assert_eq!(shared.callback_config.load().input_channels, 6);
        assert_eq!(null.params().layout, ChannelLayout::Surround51);

        // identical settings are not a reason to reopen
        shared.reconfigure(settings().with_layout(ChannelLayout::Surround51));
        assert!(shared
            .wait_device(reopened.generation, Duration::from_millis(300))
            .is_none());
    }

    struct BrokenBackend {
        attempts: Arc<AtomicUsize>,
    }

    impl AudioBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn open(&mut self, _device: Option<&str>, _params: StreamParams) -> AudioResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(AudioError::NoDevices)
        }
        fn close(&mut self) {}
        fn play(&mut self) {}
        fn pause(&mut self) {}
        fn is_playing(&self) -> bool {
            false
        }
        fn operational(&self) -> bool {
            false
        }
        fn default_device_changed(&mut self) -> bool {
            false
        }
        fn set_callbacks(&mut self, _callbacks: Arc<dyn BackendCallbacks>) {}
        fn sample_rate(&self) -> u32 {
            DEFAULT_SAMPLE_RATE
        }
        fn format(&self) -> SampleFormat {
            SampleFormat::F32
        }
        fn layout(&self) -> ChannelLayout {
            ChannelLayout::Stereo
        }
        fn callback_frame_len(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_failed_open_keeps_retrying() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let factory_attempts = Arc::clone(&attempts);
        let factory: BackendFactory = Box::new(move |_: &AudioSettings| -> Box<dyn AudioBackend> {
            Box::new(BrokenBackend {
                attempts: Arc::clone(&factory_attempts),
            })
        });
        let shared = Arc::new(FeederShared::new(HostRingBuffer::new(0)));
        let _feeder = FeederHandle::spawn(Arc::clone(&shared), settings(), factory).unwrap();

        let device = shared.wait_device(0, TIMEOUT).unwrap();
        assert!(!device.operational);
        assert_eq!(device.params, StreamParams::default());
        assert!(!shared.is_operational());
        // the session still has somewhere to queue silence
        assert!(shared.ring.capacity() > 0);

        assert!(wait_until(|| attempts.load(Ordering::SeqCst) >= 2));
    }

    #[test]
    fn test_stop_closes_device() {
        let (mut feeder, null, _) = start(settings());
        feeder.stop();
        assert!(!null.is_open());
        assert!(!feeder.shared().callback_config.load().ready);
        // second stop is a no-op
        feeder.stop();
    }

    #[test]
    fn test_aux_stage_moves_ring_into_aux() {
        let settings = settings().with_time_stretching(true);
        let cfg = AudioConfig::for_device(&settings, DEFAULT_SAMPLE_RATE);
        let ring = HostRingBuffer::new(cfg.ring_capacity());
        let aux = HostRingBuffer::new(cfg.ring_capacity() * 4);
        let mut stage = AuxStage::new(&cfg, &settings);

        ring.push(bytemuck::cast_slice(&vec![0.25f32; cfg.period_samples()]));
        stage.service(&ring, &aux);

        assert_eq!(ring.used_size(), 0);
        // empty aux ring: the source is slowed down
        assert!(stage.ratio < 1.0);
        assert_eq!(aux.used_size() % cfg.frame_bytes(), 0);
    }

    #[test]
    fn test_lle_stretching_uses_aux_ring() {
        let (feeder, _null, device) = start(settings().with_time_stretching(true));
        let shared = feeder.shared();
        assert!(shared.callback_config.load().use_aux);
        assert!(shared.aux_ring.capacity() >= device.config.ring_capacity());
        assert!(!device.config.time_stretching_enabled);
    }
}
