//! Output stage of the mixing scheduler
//!
//! Queues mixed periods towards the device, optionally through a
//! time-stretching resampler, and keeps track of how much playtime is queued
//! and whether playback is running.

use std::sync::Arc;

use crate::config::AudioConfig;
use crate::feeder::FeederShared;
use crate::resampler::{Resampler, StretchResampler};

/// Mixed periods on their way to the device
pub struct OutputStage {
    feeder: Arc<FeederShared>,
    cfg: AudioConfig,
    stretcher: Option<StretchResampler>,
    frequency_ratio: f32,
    /// Playback was requested and not flushed since
    playing: bool,
    paused: bool,
    silence: Vec<f32>,
    stretched: Vec<f32>,
}

impl OutputStage {
    pub fn new(feeder: Arc<FeederShared>, cfg: AudioConfig) -> Self {
        let mut stage = Self {
            feeder,
            cfg: cfg.clone(),
            stretcher: None,
            frequency_ratio: 1.0,
            playing: false,
            paused: false,
            silence: Vec::new(),
            stretched: Vec::new(),
        };
        stage.reconfigure(cfg);
        stage
    }

    pub fn config(&self) -> &AudioConfig {
        &self.cfg
    }

    pub fn feeder(&self) -> &Arc<FeederShared> {
        &self.feeder
    }

    /// Switch to a new configuration, dropping everything queued
    pub fn reconfigure(&mut self, cfg: AudioConfig) {
        if self.playing {
            self.feeder.request_pause();
        }
        // queued frames and stretcher state are in the previous format
        self.feeder.flush();
        if let Some(stretcher) = self.stretcher.as_mut() {
            stretcher.flush();
        }
        self.stretcher = cfg
            .time_stretching_enabled
            .then(|| StretchResampler::new(cfg.channels, cfg.sampling_rate));
        self.silence = vec![0.0; cfg.period_samples()];
        self.stretched = vec![0.0; cfg.period_samples() * 4];
        self.cfg = cfg;
        self.playing = false;
        self.frequency_ratio = 1.0;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn frequency_ratio(&self) -> f32 {
        self.frequency_ratio
    }

    /// Change the playback speed of the source; stays at 1.0 without a stretcher
    pub fn set_frequency_ratio(&mut self, ratio: f32) -> f32 {
        match self.stretcher.as_mut() {
            Some(stretcher) => {
                stretcher.set_tempo(ratio);
                self.frequency_ratio = stretcher.tempo();
            }
            None => self.frequency_ratio = 1.0,
        }
        self.frequency_ratio
    }

    /// Frames queued in the rings and the stretcher
    pub fn enqueued_frames(&self) -> u64 {
        let ring_frames = self.feeder.queued_bytes() / self.cfg.frame_bytes().max(1);
        let stretch_frames = self.stretcher.as_ref().map_or(0, |s| s.samples_available());
        (ring_frames + stretch_frames) as u64
    }

    /// Queued playtime in µs
    ///
    /// `raw` ignores the frequency ratio; otherwise the time it takes to
    /// play the queue at the current source speed is returned.
    pub fn enqueued_playtime(&self, raw: bool) -> u64 {
        let play_time = self.enqueued_frames() * 1_000_000 / self.cfg.sampling_rate.max(1) as u64;
        if raw || self.frequency_ratio == 1.0 {
            play_time
        } else {
            (play_time as f64 / self.frequency_ratio as f64) as u64
        }
    }

    /// Queue one mixed period and make sure playback runs
    pub fn enqueue(&mut self, period: &[f32]) {
        self.push(period);
        self.play();
    }

    /// Queue `periods` periods of silence
    pub fn enqueue_silence(&mut self, periods: u32) {
        let silence = std::mem::take(&mut self.silence);
        for _ in 0..periods {
            self.push(&silence);
        }
        self.silence = silence;
        self.play();
    }

    fn push(&mut self, period: &[f32]) {
        let wanted = std::mem::size_of_val(period);
        let written = match self.stretcher.as_mut() {
            Some(stretcher) => {
                let channels = self.cfg.channels.max(1);
                stretcher.put_samples(period, period.len() / channels);
                let mut written = 0;
                loop {
                    let frames = stretcher.get_samples(&mut self.stretched);
                    if frames == 0 {
                        break;
                    }
                    written += self
                        .feeder
                        .ring
                        .push(bytemuck::cast_slice(&self.stretched[..frames * channels]));
                }
                written.min(wanted)
            }
            None => self.feeder.ring.push(bytemuck::cast_slice(period)),
        };

        if written < wanted {
            log::trace!("Host ring buffer full, dropped {} bytes", wanted - written);
        }
    }

    /// Start playback
    pub fn play(&mut self) {
        if self.playing {
            return;
        }
        if self.frequency_ratio != 1.0 {
            self.set_frequency_ratio(1.0);
        }
        self.playing = true;
        if !self.paused {
            self.feeder.request_play();
        }
    }

    /// Stop playback and drop everything queued
    pub fn flush(&mut self) {
        self.feeder.request_pause();
        self.playing = false;
        self.feeder.flush();
        if let Some(stretcher) = self.stretcher.as_mut() {
            stretcher.flush();
        }
        if self.frequency_ratio != 1.0 {
            self.set_frequency_ratio(1.0);
        }
    }

    /// Follow the emulator pause state and react to device restarts
    ///
    /// Returns true when playback was lost and the queue flushed.
    pub fn update(&mut self, emu_paused: bool) -> bool {
        if emu_paused {
            if !self.paused {
                if self.playing {
                    self.feeder.request_pause();
                }
                self.paused = true;
            }
        } else if self.paused {
            self.paused = false;
            if self.enqueued_frames() > 0 && self.playing {
                self.feeder.request_play();
            }
        }

        if self.feeder.take_restart() && self.playing && !self.paused {
            log::warn!("Audio output stopped unexpectedly, likely due to a buffer underrun");
            self.flush();
            return true;
        }
        false
    }
}
