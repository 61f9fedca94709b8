//! Mixing scheduler (cell-audio path)
//!
//! Mixes the started guest ports once per period and queues the result
//! towards the device. With buffering enabled the period length adapts to
//! how much audio is queued; without it the scheduler runs on a fixed grid
//! anchored at session start.
//!
//! ```text
//!   ┌──────────┐   ┌───────────────┐   ┌──────────────┐   ┌─────────┐
//!   │ wait for │──►│ poll port tags│──►│ mix started  │──►│ enqueue │──► advance
//!   │ period   │   │ (buffering)   │   │ ports        │   │         │    + notify
//!   └──────────┘   └──────┬────────┘   └──────────────┘   └─────────┘
//!                         │ untouched past timeout / no ports
//!                         └──────────────► silence + advance
//! ```
//!
//! [`MixScheduler::step`] makes exactly one decision for a given timestamp,
//! so the whole state machine can be driven by tests without sleeping.

pub mod output;
pub mod period;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

pub use output::OutputStage;
pub use period::{desired_duration_adjusted, dynamic_period, stretch_ratio};

use crate::clock::{us_duration, SessionClock};
use crate::config::AudioConfig;
use crate::error::{AudioError, AudioResult};
use crate::memory::GuestMemory;
use crate::mixer::mix_ports;
use crate::notify::{send_all, EventQueueTable, NotifyPhase, NotifyRegistry, AUDIO_EVENT_BEFORE_MIX, AUDIO_EVENT_MIX};
use crate::port::{PortRegistry, TagStatus};
use crate::timer::{CondvarWait, WaitPrimitive};
use crate::types::BLOCK_PERIOD_US;

/// Idle wait while paused or not initialised
pub const PAUSED_WAIT_US: u64 = 10_000;
/// Re-poll delay while some port is still untouched
pub const UNTOUCHED_WAIT_US: u64 = 1_000;
/// Re-poll delay while some port is being written
pub const IN_PROGRESS_WAIT_US: u64 = 500;

/// Data guarded by the cell-audio lock
#[derive(Debug)]
pub struct CellAudioState {
    pub init: bool,
    /// Periods completed since the scheduler started
    pub counter: u64,
    pub start_time: u64,
    /// Timestamp (µs) of the last advance
    pub last_period_end: u64,
    /// Period length of the current configuration
    pub block_period: u64,
    pub buffering: bool,
    /// Linear master volume folded into port levels
    pub master_volume: f32,
    /// Guest address of port 0's region
    pub port_region: u32,
    /// Guest address of the read-index table
    pub index_table: u32,
    pub notify: NotifyRegistry,
}

/// Guest-facing state of the cell-audio path
///
/// Shared by the scheduler thread and the control surface
/// (see [`crate::guest`]).
pub struct CellAudio {
    pub ports: PortRegistry,
    pub mem: Arc<GuestMemory>,
    pub queues: Arc<EventQueueTable>,
    state: Mutex<CellAudioState>,
    paused: AtomicBool,
}

impl CellAudio {
    pub fn new(
        mem: Arc<GuestMemory>,
        queues: Arc<EventQueueTable>,
        process_id: u32,
        port_region: u32,
        index_table: u32,
    ) -> Self {
        let ports = PortRegistry::new();
        ports.reset(port_region, crate::types::PORT_STRIDE, index_table);
        Self {
            ports,
            mem,
            queues,
            state: Mutex::new(CellAudioState {
                init: false,
                counter: 0,
                start_time: 0,
                last_period_end: 0,
                block_period: BLOCK_PERIOD_US,
                buffering: true,
                master_volume: 1.0,
                port_region,
                index_table,
                notify: NotifyRegistry::new(process_id),
            }),
            paused: AtomicBool::new(false),
        }
    }

    /// Take the cell-audio lock
    pub fn lock(&self) -> MutexGuard<'_, CellAudioState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Emulator pause state
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().init
    }
}

/// Port completion counts of one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagCounts {
    pub active: u32,
    pub in_progress: u32,
    pub untouched: u32,
    pub incomplete: u32,
}

/// What one [`MixScheduler::step`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing to do for this many µs
    Wait(u64),
    /// Period ended without mixing
    Advanced,
    /// A period was mixed and queued
    Mixed,
    Paused,
    /// The cell-audio path is not initialised
    Idle,
}

/// Period loop of the cell-audio path
pub struct MixScheduler {
    audio: Arc<CellAudio>,
    output: OutputStage,
    average_playtime: f32,
    dynamic_period: u64,
    untouched_expected: u32,
    /// The restart alignment wait already happened
    aligned: bool,
    generation: u64,
    mix_buf: Vec<f32>,
    scratch: Vec<f32>,
}

impl MixScheduler {
    pub fn new(audio: Arc<CellAudio>, output: OutputStage, now_us: u64) -> Self {
        let generation = output.feeder().generation();
        let mut scheduler = Self {
            audio,
            output,
            average_playtime: 0.0,
            dynamic_period: 0,
            untouched_expected: 0,
            aligned: false,
            generation,
            mix_buf: Vec::new(),
            scratch: Vec::new(),
        };
        let cfg = scheduler.output.config().clone();
        scheduler.apply_config(&cfg, now_us);
        scheduler
    }

    pub fn output(&self) -> &OutputStage {
        &self.output
    }

    /// The most recently mixed period
    pub fn last_mix(&self) -> &[f32] {
        &self.mix_buf
    }

    pub fn average_playtime(&self) -> f32 {
        self.average_playtime
    }

    fn apply_config(&mut self, cfg: &AudioConfig, now_us: u64) {
        self.mix_buf = vec![0.0; cfg.period_samples()];
        self.average_playtime = 0.0;
        self.dynamic_period = 0;
        self.untouched_expected = 0;
        self.aligned = false;

        let mut state = self.audio.lock();
        // the counter stays monotonic so guest block tags never go backwards
        state.start_time = now_us.saturating_sub(state.counter * cfg.block_period);
        state.last_period_end = now_us;
        state.block_period = cfg.block_period;
        state.buffering = cfg.buffering_enabled;
        state.master_volume = cfg.master_volume;
    }

    /// Pick up a device reopened by the feeder
    fn check_device(&mut self, now_us: u64) {
        let feeder = self.output.feeder();
        if feeder.generation() == self.generation {
            return;
        }
        if let Some(device) = feeder.device_info() {
            log::info!(
                "Mixing scheduler reconfigured: {}Hz, {} channels, period {}µs",
                device.config.sampling_rate,
                device.config.channels,
                device.config.block_period
            );
            self.generation = device.generation;
            self.output.reconfigure(device.config.clone());
            self.apply_config(&device.config, now_us);
        }
    }

    /// Classify every started port
    fn count_tags(&self) -> TagCounts {
        let mut counts = TagCounts::default();
        for port in self.audio.ports.started() {
            counts.active += 1;
            let status = port.data().poll_tags(&self.audio.mem);
            match status {
                Ok(TagStatus::Untouched) => counts.untouched += 1,
                Ok(TagStatus::InProgress) => counts.in_progress += 1,
                Ok(TagStatus::Incomplete) => counts.incomplete += 1,
                Ok(TagStatus::Complete) => {}
                Err(e) => {
                    log::warn!("Port {} tags unreadable: {}", port.number(), e);
                    counts.untouched += 1;
                }
            }
        }
        counts
    }

    fn finish_volume_stepping(&self) {
        for port in self.audio.ports.started() {
            port.data().finish_volume_stepping();
        }
    }

    /// Run one scheduling decision at `now_us`
    pub fn step(&mut self, now_us: u64) -> StepOutcome {
        self.check_device(now_us);

        let paused = self.audio.is_paused();
        self.output.update(paused);
        if paused {
            return StepOutcome::Paused;
        }

        let (init, counter, start_time, last_period_end) = {
            let state = self.audio.lock();
            (state.init, state.counter, state.start_time, state.last_period_end)
        };
        if !init {
            if self.output.is_playing() {
                self.output.flush();
            }
            return StepOutcome::Idle;
        }

        let cfg = self.output.config().clone();
        let margin = cfg.period_comparison_margin as i64;
        let since_last_period = now_us.saturating_sub(last_period_end);

        if !cfg.buffering_enabled {
            let period_end = counter * cfg.block_period + start_time;
            let time_left = period_end as i64 - now_us as i64;
            if time_left > margin {
                return StepOutcome::Wait(time_left as u64);
            }
            return self.mix(now_us);
        }

        let playing = self.output.is_playing();
        let tags = self.count_tags();

        if !playing {
            self.dynamic_period = cfg.block_period;
        } else {
            let desired = desired_duration_adjusted(&cfg, self.average_playtime);
            if cfg.time_stretching_enabled {
                let raw = self.output.enqueued_playtime(true) as f32;
                let ratio = self.output.frequency_ratio();
                let requested = stretch_ratio(
                    raw / desired,
                    ratio,
                    cfg.time_stretching_threshold,
                    cfg.time_stretching_scale,
                    cfg.time_stretching_step,
                );
                if requested != ratio {
                    let applied = self.output.set_frequency_ratio(requested);
                    log::trace!("Frequency ratio {:.2} -> {:.2}", ratio, applied);
                }
            }
            let playtime = self.output.enqueued_playtime(false);
            self.dynamic_period = dynamic_period(&cfg, playtime, desired, true);
        }

        let time_left = self.dynamic_period as i64 - since_last_period as i64;
        if time_left > margin {
            return StepOutcome::Wait(time_left as u64);
        }

        if tags.active == 0 {
            log::trace!("No active ports, enqueuing silence");
            self.output.enqueue_silence(1);
            self.untouched_expected = 0;
            self.advance(now_us);
            return StepOutcome::Advanced;
        }

        if tags.untouched > self.untouched_expected {
            if !playing {
                log::trace!("Advancing time: untouched={}/{}", tags.untouched, tags.active);
                self.untouched_expected = tags.untouched;
                self.advance(now_us);
                return StepOutcome::Advanced;
            }

            // guests may skip whole periods when they fall behind
            if (tags.untouched == tags.active && since_last_period > cfg.fully_untouched_timeout)
                || since_last_period > cfg.partially_untouched_timeout
            {
                log::trace!(
                    "Untouched timeout: untouched={}/{} expected={}",
                    tags.untouched,
                    tags.active,
                    self.untouched_expected
                );
                self.untouched_expected = tags.untouched;
                self.advance(now_us);
                return StepOutcome::Advanced;
            }

            return StepOutcome::Wait(UNTOUCHED_WAIT_US);
        }

        if tags.untouched == tags.active {
            if playing {
                self.output.enqueue_silence(1);
            }
            self.untouched_expected = tags.untouched;
            self.advance(now_us);
            return StepOutcome::Advanced;
        }

        if tags.in_progress > 0 {
            return StepOutcome::Wait(IN_PROGRESS_WAIT_US);
        }

        self.untouched_expected = tags.untouched;
        if tags.untouched > 0 || tags.incomplete > 0 {
            log::trace!(
                "Mixing partial periods: untouched={} incomplete={} of {}",
                tags.untouched,
                tags.incomplete,
                tags.active
            );
        }

        if !playing {
            if !self.aligned {
                // restart on the global period grid
                let delta = (now_us.saturating_sub(start_time) % cfg.block_period.max(1)) as i64;
                if delta > margin {
                    self.aligned = true;
                    return StepOutcome::Wait((delta - margin) as u64);
                }
            }
            self.aligned = false;

            log::debug!("Starting playback with {} periods of silence", cfg.desired_full_buffers);
            self.output.flush();
            self.output.enqueue_silence(cfg.desired_full_buffers);
            self.finish_volume_stepping();
            self.average_playtime = self.output.enqueued_playtime(false) as f32;
        }

        self.mix(now_us)
    }

    fn mix(&mut self, now_us: u64) -> StepOutcome {
        let before = self.audio.lock().notify.targets(NotifyPhase::BeforeMix, &self.audio.queues);
        send_all(before, AUDIO_EVENT_BEFORE_MIX);

        let channels = self.output.config().channels;
        mix_ports(
            &self.audio.ports,
            &self.audio.mem,
            0,
            &mut self.mix_buf,
            channels,
            &mut self.scratch,
        );

        let period = std::mem::take(&mut self.mix_buf);
        self.output.enqueue(&period);
        self.mix_buf = period;

        self.advance(now_us);
        StepOutcome::Mixed
    }

    /// Close the current period
    fn advance(&mut self, timestamp: u64) {
        let buffering = self.output.config().buffering_enabled;
        let mem = &self.audio.mem;

        let targets = {
            let mut state = self.audio.lock();

            for port in self.audio.ports.started() {
                let mut data = port.data();
                if let Err(e) = data.reset_block(mem, 0, buffering) {
                    log::warn!("Port {} block reset failed: {}", port.number(), e);
                }
                data.global_counter = state.counter;
                data.active_counter += 1;
                data.timestamp = timestamp;
                data.cur_pos = data.position(1);
                if let Err(e) = mem.write_u64(data.index_addr, data.cur_pos as u64) {
                    log::warn!("Port {} read index unwritable: {}", port.number(), e);
                }
            }

            if buffering {
                let cfg = self.output.config();
                let enqueued = self.output.enqueued_playtime(true) as f32;
                self.average_playtime =
                    cfg.period_average_alpha * enqueued + (1.0 - cfg.period_average_alpha) * self.average_playtime;
            }

            state.counter += 1;
            state.last_period_end = timestamp;
            self.dynamic_period = 0;

            state.notify.advance_period();
            state.notify.targets(NotifyPhase::AfterMix, &self.audio.queues)
        };

        send_all(targets, AUDIO_EVENT_MIX);
    }

    /// Drive [`MixScheduler::step`] on the session clock until `stop` is raised
    pub fn run(mut self, clock: SessionClock, stop: &AtomicBool, waiter: &CondvarWait) {
        log::info!("Mixing scheduler started");
        while !stop.load(Ordering::Acquire) {
            let wait_us = match self.step(clock.now_us()) {
                StepOutcome::Wait(us) => us,
                StepOutcome::Paused | StepOutcome::Idle => PAUSED_WAIT_US,
                StepOutcome::Advanced | StepOutcome::Mixed => continue,
            };
            waiter.wait(Some(us_duration(wait_us as i64)));
        }
        self.output.flush();
        log::info!("Mixing scheduler stopped");
    }
}

/// Handle to the running `cell-audio` thread
pub struct SchedulerHandle {
    stop: Arc<AtomicBool>,
    waiter: Arc<CondvarWait>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn spawn(scheduler: MixScheduler, clock: SessionClock) -> AudioResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let waiter = Arc::new(CondvarWait::new());

        let thread_stop = Arc::clone(&stop);
        let thread_waiter = Arc::clone(&waiter);
        let thread_handle = thread::Builder::new()
            .name("cell-audio".to_string())
            .spawn(move || scheduler.run(clock, &thread_stop, &thread_waiter))
            .map_err(|e| AudioError::ThreadSpawn {
                name: "cell-audio",
                reason: e.to_string(),
            })?;

        Ok(Self {
            stop,
            waiter,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            self.stop.store(true, Ordering::Release);
            self.waiter.cancel();
            if handle.join().is_err() {
                log::error!("Mixing scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioSettings;
    use crate::feeder::FeederShared;
    use crate::guest::PortParam;
    use crate::notify::{EVENTFLAG_BEFOREMIX, EVENTFLAG_DECIMATE_2};
    use crate::ring::HostRingBuffer;
    use crate::types::{ChannelLayout, SampleFormat, StreamParams, BLOCK_SAMPLES, PORT_COUNT, PORT_STRIDE};

    const BASE: u32 = 0x1000_0000;

    fn setup(settings: &AudioSettings) -> (Arc<CellAudio>, MixScheduler) {
        let mem = Arc::new(GuestMemory::new(BASE, PORT_STRIDE as usize * PORT_COUNT + 0x1000));
        let region = mem.alloc(PORT_STRIDE as usize * PORT_COUNT, 0x100).unwrap();
        let index = mem.alloc(8 * PORT_COUNT, 8).unwrap();
        let audio = Arc::new(CellAudio::new(mem, Arc::new(EventQueueTable::new()), 1, region, index));
        audio.init().unwrap();

        let cfg = AudioConfig::from_settings(settings);
        let feeder = Arc::new(FeederShared::new(HostRingBuffer::new(cfg.ring_capacity())));
        let scheduler = MixScheduler::new(Arc::clone(&audio), OutputStage::new(feeder, cfg), 0);
        (audio, scheduler)
    }

    fn open_started(audio: &CellAudio, blocks: u64) -> u32 {
        let port = audio
            .port_open(&PortParam {
                channels: 2,
                blocks,
                attr: 0,
                level: 1.0,
            })
            .unwrap();
        audio.port_start(port).unwrap();
        port
    }

    fn fill_current_block(audio: &CellAudio, port: u32, value: f32) {
        let data = audio.ports.get(port).unwrap().data().clone();
        let block = vec![value; data.block_size() as usize];
        audio.mem.write_f32_slice(data.block_addr(0), &block).unwrap();
    }

    fn ring_bytes(scheduler: &MixScheduler) -> usize {
        scheduler.output().feeder().ring.used_size()
    }

    #[test]
    fn test_silence_fast_path_enqueues_one_period() {
        let (audio, mut scheduler) = setup(&AudioSettings::default());
        let period_bytes = scheduler.output().config().period_bytes();

        assert_eq!(scheduler.step(0), StepOutcome::Wait(5333));
        assert_eq!(scheduler.step(5333), StepOutcome::Advanced);
        assert_eq!(ring_bytes(&scheduler), period_bytes);
        assert_eq!(audio.lock().counter, 1);

        // past the longest possible period there is no wait either
        assert_eq!(scheduler.step(5333 + 6399), StepOutcome::Advanced);
        assert_eq!(ring_bytes(&scheduler), 2 * period_bytes);
        assert_eq!(audio.lock().counter, 2);

        let mut queued = vec![0u8; 2 * period_bytes];
        assert_eq!(scheduler.output().feeder().ring.pop(&mut queued, false), queued.len());
        assert!(queued.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_device_reopen_drops_old_format_periods() {
        let (audio, mut scheduler) = setup(&AudioSettings::default());
        assert_eq!(scheduler.step(0), StepOutcome::Wait(5333));
        assert_eq!(scheduler.step(5333), StepOutcome::Advanced);
        assert_eq!(ring_bytes(&scheduler), scheduler.output().config().period_bytes());

        let surround = AudioSettings::default().with_layout(ChannelLayout::Surround51);
        let generation = scheduler.output().feeder().publish_device(
            StreamParams::new(48000, SampleFormat::F32, ChannelLayout::Surround51),
            256,
            AudioConfig::for_device(&surround, 48000),
            true,
        );
        assert_eq!(generation, 1);

        // the reopen restarts the period, so this step only picks up the device
        assert_eq!(scheduler.step(10_666), StepOutcome::Wait(5333));
        assert_eq!(scheduler.output().config().channels, 6);
        assert_eq!(ring_bytes(&scheduler), 0);

        assert_eq!(scheduler.step(16_000), StepOutcome::Advanced);
        let cfg = scheduler.output().config().clone();
        let queued = ring_bytes(&scheduler);
        assert_eq!(queued % cfg.frame_bytes(), 0);
        assert_eq!(queued, cfg.period_bytes());
        assert_eq!(audio.lock().counter, 2);
    }

    #[test]
    fn test_mixes_one_period_and_advances_port() {
        let (audio, mut scheduler) = setup(&AudioSettings::default());
        let port = open_started(&audio, 4);
        fill_current_block(&audio, port, 0.5);

        assert_eq!(scheduler.step(5333), StepOutcome::Mixed);
        assert_eq!(scheduler.last_mix().len(), BLOCK_SAMPLES * 2);
        assert!(scheduler.last_mix().iter().all(|&s| s == 0.5));
        assert!(scheduler.output().is_playing());

        let cfg = scheduler.output().config().clone();
        // prebuffer plus the mixed period
        assert_eq!(
            ring_bytes(&scheduler),
            (cfg.desired_full_buffers as usize + 1) * cfg.period_bytes()
        );

        let first = audio.ports.get(port).unwrap().data().clone();
        assert_eq!(first.cur_pos, 1);

        fill_current_block(&audio, port, 0.25);
        assert_eq!(scheduler.step(5333 + 10_000), StepOutcome::Mixed);
        let second = audio.ports.get(port).unwrap().data().clone();
        assert_eq!(second.global_counter, first.global_counter + 1);
        assert_eq!(second.cur_pos, 2);
        assert_eq!(audio.mem.read_u64(second.index_addr).unwrap(), 2);
        assert!(scheduler.last_mix().iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_two_ports_accumulate() {
        let (audio, mut scheduler) = setup(&AudioSettings::default());
        let a = open_started(&audio, 4);
        let b = open_started(&audio, 4);
        fill_current_block(&audio, a, 1.0);
        fill_current_block(&audio, b, 0.5);

        assert_eq!(scheduler.step(5333), StepOutcome::Mixed);
        assert!(scheduler.last_mix().iter().all(|&s| s == 1.5));
    }

    #[test]
    fn test_untouched_port_advances_while_stopped() {
        let (audio, mut scheduler) = setup(&AudioSettings::default());
        let port = open_started(&audio, 4);
        // zero the untagged block back to the sentinel so it reads untouched
        audio
            .ports
            .get(port)
            .unwrap()
            .data()
            .reset_block(&audio.mem, 0, true)
            .unwrap();

        assert_eq!(scheduler.step(5333), StepOutcome::Advanced);
        assert_eq!(ring_bytes(&scheduler), 0);
        assert_eq!(audio.lock().counter, 1);
    }

    #[test]
    fn test_in_progress_port_is_waited_for() {
        let (audio, mut scheduler) = setup(&AudioSettings::default());
        let port = open_started(&audio, 4);
        let data = audio.ports.get(port).unwrap().data().clone();
        audio
            .ports
            .get(port)
            .unwrap()
            .data()
            .reset_block(&audio.mem, 0, true)
            .unwrap();

        // first half of the block written
        let half = vec![0.5f32; data.block_size() as usize / 2];
        audio.mem.write_f32_slice(data.block_addr(0), &half).unwrap();
        assert_eq!(scheduler.step(5333), StepOutcome::Wait(IN_PROGRESS_WAIT_US));
        assert_eq!(audio.lock().counter, 0);

        fill_current_block(&audio, port, 0.5);
        assert_eq!(scheduler.step(5833), StepOutcome::Mixed);
    }

    #[test]
    fn test_fully_untouched_timeout_while_playing() {
        let (audio, mut scheduler) = setup(&AudioSettings::default());
        let port = open_started(&audio, 2);
        fill_current_block(&audio, port, 0.5);
        assert_eq!(scheduler.step(5333), StepOutcome::Mixed);

        // block 1 was never tagged and reads as written silence
        assert_eq!(scheduler.step(5333 + 7000), StepOutcome::Mixed);
        assert!(scheduler.last_mix().iter().all(|&s| s == 0.0));

        // block 0 carries fresh tags the guest never touches
        let last = audio.lock().last_period_end;
        let counter = audio.lock().counter;
        assert_eq!(scheduler.step(last + 7000), StepOutcome::Wait(UNTOUCHED_WAIT_US));
        assert_eq!(scheduler.step(last + 11_000), StepOutcome::Advanced);
        assert_eq!(audio.lock().counter, counter + 1);
    }

    #[test]
    fn test_unbuffered_runs_on_fixed_grid() {
        let (audio, mut scheduler) = setup(&AudioSettings::default().with_buffering(false));
        assert_eq!(scheduler.step(0), StepOutcome::Mixed);
        assert_eq!(scheduler.step(100), StepOutcome::Wait(5233));
        assert_eq!(scheduler.step(5333), StepOutcome::Mixed);
        assert_eq!(audio.lock().counter, 2);
    }

    #[test]
    fn test_pause_and_uninitialised_idle() {
        let (audio, mut scheduler) = setup(&AudioSettings::default());
        audio.set_paused(true);
        assert_eq!(scheduler.step(5333), StepOutcome::Paused);
        audio.set_paused(false);

        audio.quit().unwrap();
        assert_eq!(scheduler.step(5333), StepOutcome::Idle);
        assert_eq!(audio.lock().counter, 0);
    }

    #[test]
    fn test_notifications_follow_periods() {
        let (audio, mut scheduler) = setup(&AudioSettings::default().with_buffering(false));
        let (every, mut every_rx) = audio.create_notify_event_queue(0).unwrap();
        let (half, mut half_rx) = audio.create_notify_event_queue(0).unwrap();
        let source = audio.set_notify_event_queue(every, EVENTFLAG_BEFOREMIX).unwrap();
        audio.set_notify_event_queue(half, EVENTFLAG_DECIMATE_2).unwrap();

        for i in 0..4 {
            assert_eq!(scheduler.step(i * 5333), StepOutcome::Mixed);
        }

        let events = every_rx.drain();
        assert_eq!(events.len(), 8);
        assert!(events.iter().all(|e| e.source == source));
        assert_eq!(events.iter().filter(|e| e.data1 == AUDIO_EVENT_BEFORE_MIX).count(), 4);
        assert_eq!(half_rx.drain().len(), 2);
    }
}
