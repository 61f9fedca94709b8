//! Time-stretching resampler
//!
//! The output stage feeds mixed periods through a [`Resampler`] when
//! time-stretching is enabled, so a draining host buffer can be refilled by
//! slowing the source down slightly instead of underrunning.
//!
//! [`StretchResampler`] wraps signalsmith-stretch. The stretcher is driven with
//! variable-length input and a fixed-ratio output length; the resulting frames
//! are queued until the output stage pulls them.

use std::collections::VecDeque;

use signalsmith_stretch::Stretch;

use crate::types::{DEFAULT_SAMPLE_RATE, MAX_OUTPUT_CHANNELS};

/// Lowest tempo accepted by [`Resampler::set_tempo`]
pub const MIN_TEMPO: f32 = 0.1;
/// Highest tempo accepted by [`Resampler::set_tempo`]
pub const MAX_TEMPO: f32 = 4.0;

/// Sample-rate converter with tempo control
///
/// Buffers are interleaved f32 frames of `channels` samples.
pub trait Resampler: Send {
    /// Reconfigure for a new stream, dropping anything queued
    fn set_params(&mut self, channels: usize, sample_rate: u32);

    /// Playback speed of the source (1.0 = unchanged, < 1.0 = slower)
    fn set_tempo(&mut self, tempo: f32);

    /// Feed `frames` interleaved frames from `input`
    fn put_samples(&mut self, input: &[f32], frames: usize);

    /// Pull up to `out.len() / channels` frames, returning the number written
    fn get_samples(&mut self, out: &mut [f32]) -> usize;

    /// Frames ready to be pulled
    fn samples_available(&self) -> usize;

    /// Drop all queued input and output
    fn flush(&mut self);
}

/// [`Resampler`] backed by signalsmith-stretch
pub struct StretchResampler {
    stretcher: Stretch,
    channels: usize,
    sample_rate: u32,
    tempo: f32,
    /// Fractional output frames carried between calls
    carry: f64,
    /// Scratch for one stretch call
    scratch: Vec<f32>,
    output: VecDeque<f32>,
}

impl StretchResampler {
    pub fn new(channels: usize, sample_rate: u32) -> Self {
        let channels = channels.clamp(1, MAX_OUTPUT_CHANNELS);
        Self {
            stretcher: Stretch::preset_default(channels as u32, sample_rate),
            channels,
            sample_rate,
            tempo: 1.0,
            carry: 0.0,
            scratch: Vec::new(),
            output: VecDeque::new(),
        }
    }

    pub fn tempo(&self) -> f32 {
        self.tempo
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Latency of the stretcher in frames
    pub fn latency(&self) -> usize {
        self.stretcher.input_latency() + self.stretcher.output_latency()
    }
}

impl Default for StretchResampler {
    fn default() -> Self {
        Self::new(2, DEFAULT_SAMPLE_RATE)
    }
}

impl Resampler for StretchResampler {
    fn set_params(&mut self, channels: usize, sample_rate: u32) {
        let channels = channels.clamp(1, MAX_OUTPUT_CHANNELS);
        if channels != self.channels || sample_rate != self.sample_rate {
            self.stretcher = Stretch::preset_default(channels as u32, sample_rate);
            self.channels = channels;
            self.sample_rate = sample_rate;
            log::debug!("Resampler reconfigured: {} channels @ {}Hz", channels, sample_rate);
        }
        self.flush();
    }

    fn set_tempo(&mut self, tempo: f32) {
        self.tempo = tempo.clamp(MIN_TEMPO, MAX_TEMPO);
    }

    fn put_samples(&mut self, input: &[f32], frames: usize) {
        let frames = frames.min(input.len() / self.channels);
        if frames == 0 {
            return;
        }

        // A slower tempo stretches the same input over more output frames
        let exact = frames as f64 / self.tempo as f64 + self.carry;
        let out_frames = exact.floor() as usize;
        self.carry = exact - out_frames as f64;
        if out_frames == 0 {
            return;
        }

        let out_len = out_frames * self.channels;
        self.scratch.clear();
        self.scratch.resize(out_len, 0.0);
        self.stretcher
            .process(&input[..frames * self.channels], &mut self.scratch[..out_len]);
        self.output.extend(self.scratch.iter().copied());
    }

    fn get_samples(&mut self, out: &mut [f32]) -> usize {
        let frames = (out.len() / self.channels).min(self.samples_available());
        let len = frames * self.channels;
        for (o, s) in out[..len].iter_mut().zip(self.output.drain(..len)) {
            *o = s;
        }
        frames
    }

    fn samples_available(&self) -> usize {
        self.output.len() / self.channels
    }

    fn flush(&mut self) {
        self.stretcher.reset();
        self.output.clear();
        self.carry = 0.0;
    }
}
