//! Device write callback
//!
//! Runs on the platform's real-time thread. Everything it touches is either
//! a lock-free snapshot ([`CallbackConfig`]) or try-locked; when anything is
//! contended the device simply gets silence for this call.
//!
//! Per call: snapshot the config, pop whole frames from the source ring
//! (zero-filling any shortfall), fold to the device layout, ramp the volume
//! frame by frame, then write f32 or s16 into the device buffer.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, TryLockError};

use crossbeam::atomic::AtomicCell;

use super::FeederShared;
use crate::backend::{BackendCallbacks, StateEvent};
use crate::mixer::{convert_to_s16, downmix};
use crate::types::{AvPort, ChannelLayout, DEFAULT_SAMPLE_RATE, MAX_OUTPUT_CHANNELS};

/// Duration of a master volume ramp
pub const VOLUME_RAMP_MS: u32 = 16;

/// Frames processed per inner iteration of the callback
const CHUNK_FRAMES: usize = 256;

/// Snapshot of everything the write callback needs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallbackConfig {
    pub sample_rate: u32,
    /// Channels of the f32 frames queued in the ring
    pub input_channels: usize,
    /// Layout of the device stream
    pub output_layout: ChannelLayout,
    pub convert_to_s16: bool,
    /// AV port whose audio reaches the device
    pub avport: AvPort,
    pub target_volume: f32,
    /// AV ports currently muted (see [`AvPort::mask`])
    pub mute_mask: u8,
    /// Read from the time-stretched auxiliary ring instead of the main ring
    pub use_aux: bool,
    /// False while the stream is being reconfigured
    pub ready: bool,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            input_channels: 2,
            output_layout: ChannelLayout::Stereo,
            convert_to_s16: false,
            avport: AvPort::Hdmi0,
            target_volume: 1.0,
            mute_mask: 0,
            use_aux: false,
            ready: false,
        }
    }
}

impl CallbackConfig {
    pub fn is_muted(&self) -> bool {
        self.mute_mask & self.avport.mask() != 0
    }

    fn output_sample_bytes(&self) -> usize {
        if self.convert_to_s16 {
            2
        } else {
            4
        }
    }
}

/// Lock-free holder of the current [`CallbackConfig`]
///
/// Readers never block. Writers are serialized so that read-modify-write
/// updates from different threads do not lose each other.
#[derive(Debug, Default)]
pub struct SharedCallbackConfig {
    cell: AtomicCell<CallbackConfig>,
    writer: Mutex<()>,
}

impl SharedCallbackConfig {
    pub fn load(&self) -> CallbackConfig {
        self.cell.load()
    }

    /// Apply `f` to the current snapshot and publish the result
    pub fn update(&self, f: impl FnOnce(&mut CallbackConfig)) -> CallbackConfig {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let mut cfg = self.cell.load();
        f(&mut cfg);
        self.cell.store(cfg);
        cfg
    }
}

/// Master volume ramp carried across callbacks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeRamp {
    pub current: f32,
    /// Level the running ramp started from
    pub initial: f32,
    pub target: f32,
    step: f32,
}

impl VolumeRamp {
    pub fn new(volume: f32) -> Self {
        Self {
            current: volume,
            initial: volume,
            target: volume,
            step: 0.0,
        }
    }

    /// Retarget the ramp; a no-op when `target` is unchanged
    pub fn set_target(&mut self, target: f32, sample_rate: u32) {
        if target == self.target {
            return;
        }
        let frames = (sample_rate as u64 * VOLUME_RAMP_MS as u64 / 1000).max(1);
        self.initial = self.current;
        self.target = target;
        self.step = (target - self.current) / frames as f32;
    }

    pub fn is_ramping(&self) -> bool {
        self.current != self.target
    }

    /// Scale one frame and advance by one step
    #[inline]
    fn apply(&mut self, frame: &mut [f32]) {
        if self.current != 1.0 {
            for s in frame.iter_mut() {
                *s *= self.current;
            }
        }
        if self.current != self.target {
            self.current += self.step;
            let done = if self.step > 0.0 {
                self.current >= self.target
            } else {
                self.current <= self.target
            };
            if done || self.step == 0.0 {
                self.current = self.target;
                self.initial = self.target;
            }
        }
    }
}

/// State owned by the real-time thread between calls
struct CallbackState {
    volume: VolumeRamp,
    input: Vec<f32>,
    output: Vec<f32>,
    output_s16: Vec<i16>,
    /// Whether the previous call got all the data it asked for
    flowing: bool,
}

impl CallbackState {
    fn new() -> Self {
        Self {
            volume: VolumeRamp::new(1.0),
            input: vec![0.0; CHUNK_FRAMES * MAX_OUTPUT_CHANNELS],
            output: vec![0.0; CHUNK_FRAMES * MAX_OUTPUT_CHANNELS],
            output_s16: vec![0; CHUNK_FRAMES * MAX_OUTPUT_CHANNELS],
            flowing: false,
        }
    }
}

/// [`BackendCallbacks`] implementation of the feeder
pub struct FeederCallback {
    shared: Arc<FeederShared>,
    state: Mutex<CallbackState>,
}

impl FeederCallback {
    pub fn new(shared: Arc<FeederShared>) -> Self {
        Self {
            shared,
            state: Mutex::new(CallbackState::new()),
        }
    }

    /// Current master volume as seen by the device thread
    pub fn volume(&self) -> Option<VolumeRamp> {
        self.state.try_lock().ok().map(|s| s.volume)
    }
}

impl BackendCallbacks for FeederCallback {
    fn on_write(&self, buf: &mut [u8]) -> usize {
        let cfg = self.shared.callback_config.load();
        let out_channels = cfg.output_layout.channels();
        let in_channels = cfg.input_channels.clamp(1, MAX_OUTPUT_CHANNELS);
        let out_frame_bytes = out_channels * cfg.output_sample_bytes();

        let mut state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => {
                buf.fill(0);
                return buf.len();
            }
        };

        if !cfg.ready {
            state.flowing = false;
            buf.fill(0);
            return buf.len();
        }

        let ring = if cfg.use_aux {
            &self.shared.aux_ring
        } else {
            &self.shared.ring
        };
        let muted = cfg.is_muted();
        let state = &mut *state;
        state.volume.set_target(cfg.target_volume, cfg.sample_rate);

        let whole = buf.len() - buf.len() % out_frame_bytes.max(1);
        let (frames_buf, tail) = buf.split_at_mut(whole);
        tail.fill(0);

        for out_chunk in frames_buf.chunks_mut(CHUNK_FRAMES * out_frame_bytes) {
            let frames = out_chunk.len() / out_frame_bytes;
            let input = &mut state.input[..frames * in_channels];

            let want = input.len() * 4;
            let got = {
                let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut *input);
                let got = ring.try_pop(bytes);
                // drop partial frames so the stream stays frame aligned
                let got = got.map(|n| n - n % (in_channels * 4));
                bytes[got.unwrap_or(0)..].fill(0);
                got
            };

            // a producer holding the ring is not a starved ring
            match got {
                Some(got) if got == want => state.flowing = true,
                Some(_) if state.flowing => {
                    state.flowing = false;
                    self.shared.underrun.store(true, Ordering::Release);
                }
                _ => {}
            }

            if muted {
                input.fill(0.0);
            }

            let output = &mut state.output[..frames * out_channels];
            downmix(input, in_channels, output, out_channels);

            for frame in output.chunks_exact_mut(out_channels) {
                state.volume.apply(frame);
            }

            if cfg.convert_to_s16 {
                let pcm = &mut state.output_s16[..output.len()];
                convert_to_s16(output, pcm);
                out_chunk.copy_from_slice(bytemuck::cast_slice(pcm));
            } else {
                out_chunk.copy_from_slice(bytemuck::cast_slice(output));
            }
        }

        buf.len()
    }

    fn on_state(&self, event: StateEvent) {
        self.shared.notify_state(event);
    }
}
