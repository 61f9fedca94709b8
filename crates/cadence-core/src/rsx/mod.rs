//! Virtual audio hardware path (LLE)
//!
//! Services up to three independently clocked domains from one thread.
//! Every due tick pulls one block from the domain's shared-memory ring,
//! converts it, fans it out to the AV ports the domain feeds, and queues the
//! AV port selected for output into the host ring buffer.
//!
//! ```text
//!  VirtualTimerPool ──► PeriodicTimer (rsx-audio thread)
//!                            │ due tick for domain D
//!                            ▼
//!  guest ring[D] ──► extract (BE PCM → f32) ──► route per AV port
//!        ▲                                          │ selected AV port
//!        └── read_idx++, notify guest queue          ▼
//!                                            host ring buffer ──► feeder
//! ```

pub mod extract;
pub mod layout;
pub mod routing;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

pub use extract::SampleWidth;
pub use layout::{RingEntry, RingHeader, RingView};
pub use routing::{AvRoute, ChannelMap, RoutingConfig};

use crate::clock::{ns_to_timebase, SessionClock};
use crate::error::{AudioError, AudioResult, GuestError, GuestResult};
use crate::feeder::FeederShared;
use crate::memory::{GuestMemory, MemoryResult};
use crate::mixer::downmix;
use crate::notify::{GuestEvent, GuestEventQueue};
use crate::timer::{PeriodicTimer, TickRate, TimerDomain, VirtualTimerPool};
use crate::types::AvPort;
use extract::extract_block;
use layout::{SERIAL_STREAMS, STREAM_BLOCK_BYTES};
use routing::domain_channels;

/// Event source of domain `n` is this plus `n`
pub const RSX_EVENT_SOURCE_BASE: u64 = 0x5253_5841_5544_0000;

/// Guest-side configuration of one clock domain
#[derive(Clone, Default)]
pub struct DomainConfig {
    pub enabled: bool,
    pub sample_rate: u32,
    pub width: SampleWidth,
    /// Guest address of the domain's ring
    pub ring_addr: u32,
    /// Receives a block-completion event at the ring's notify index
    pub queue: Option<Arc<dyn GuestEventQueue>>,
}

impl DomainConfig {
    fn tick_rate(&self) -> TickRate {
        TickRate::stereo(STREAM_BLOCK_BYTES as u64, self.sample_rate, self.width.bytes() as u32)
    }
}

fn domain_streams(domain: TimerDomain) -> usize {
    match domain {
        TimerDomain::Serial => SERIAL_STREAMS as usize,
        TimerDomain::Spdif0 | TimerDomain::Spdif1 => 1,
    }
}

struct RsxState {
    domains: [DomainConfig; TimerDomain::COUNT],
    timers: VirtualTimerPool,
    routing: RoutingConfig,
    /// Converted frames of the block being served
    block: Vec<f32>,
    /// Last routed block of every AV port
    outputs: [Vec<f32>; AvPort::ALL.len()],
    /// Selected AV port in the host ring's channel count
    host: Vec<f32>,
    playing: bool,
}

/// Virtual audio hardware
pub struct RsxAudio {
    mem: Arc<GuestMemory>,
    feeder: Arc<FeederShared>,
    clock: SessionClock,
    state: Mutex<RsxState>,
    timer: PeriodicTimer,
    shutdown: AtomicBool,
}

impl RsxAudio {
    pub fn new(mem: Arc<GuestMemory>, feeder: Arc<FeederShared>, clock: SessionClock) -> Self {
        Self {
            mem,
            feeder,
            clock,
            state: Mutex::new(RsxState {
                domains: Default::default(),
                timers: VirtualTimerPool::new(),
                routing: RoutingConfig::default(),
                block: Vec::new(),
                outputs: Default::default(),
                host: Vec::new(),
                playing: false,
            }),
            timer: PeriodicTimer::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RsxState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a domain configuration at `now_ns`
    ///
    /// The serving thread picks up the new deadline right away.
    pub fn configure_domain_at(&self, domain: TimerDomain, cfg: DomainConfig, now_ns: u64) -> GuestResult<()> {
        if cfg.enabled && cfg.sample_rate == 0 {
            return Err(GuestError::Param);
        }

        {
            let mut state = self.lock();
            if cfg.enabled {
                log::info!(
                    "RSX {} domain enabled: {}Hz, {}-bit, ring 0x{:x}",
                    domain,
                    cfg.sample_rate,
                    cfg.width.bytes() * 8,
                    cfg.ring_addr
                );
                state.timers.enable(domain, cfg.tick_rate(), now_ns);
            } else {
                log::info!("RSX {} domain disabled", domain);
                state.timers.disable(domain);
            }
            state.domains[domain.index()] = cfg;

            let any_active = TimerDomain::ALL.iter().any(|&d| state.timers.is_active(d));
            if !any_active && state.playing {
                state.playing = false;
                self.feeder.request_pause();
            }
        }

        self.timer.cancel();
        Ok(())
    }

    pub fn configure_domain(&self, domain: TimerDomain, cfg: DomainConfig) -> GuestResult<()> {
        self.configure_domain_at(domain, cfg, self.clock.now_ns())
    }

    pub fn set_routing(&self, routing: RoutingConfig) {
        self.lock().routing = routing;
    }

    pub fn routing(&self) -> RoutingConfig {
        self.lock().routing.clone()
    }

    /// Tick counter of `domain`
    pub fn tick(&self, domain: TimerDomain) -> u64 {
        self.lock().timers.tick(domain)
    }

    /// Last block routed to `port`
    pub fn output(&self, port: AvPort) -> Vec<f32> {
        self.lock().outputs[port.index()].clone()
    }

    pub fn next_deadline_in(&self, now_ns: u64) -> Option<u64> {
        self.lock().timers.next_deadline_in(now_ns)
    }

    /// Serve every tick due at `now_ns`; returns the number served
    pub fn service(&self, now_ns: u64) -> u32 {
        let mut state = self.lock();
        let mut served = 0;

        for domain in TimerDomain::ALL {
            while state.timers.is_behind(domain, now_ns) {
                match self.serve_tick(&mut state, domain, now_ns) {
                    Ok(true) => {
                        served += 1;
                        state.timers.increment(domain, now_ns);
                    }
                    Ok(false) => {
                        // guest stopped draining its queue
                        log::debug!("RSX {} notification not delivered, resyncing", domain);
                        served += 1;
                        state.timers.skip_to_now(domain, now_ns);
                        break;
                    }
                    Err(e) => {
                        log::warn!("RSX {} ring unreadable: {}", domain, e);
                        state.timers.skip_to_now(domain, now_ns);
                        break;
                    }
                }
            }
        }

        served
    }

    /// Serve one tick of `domain`; false when the notification was dropped
    fn serve_tick(&self, state: &mut RsxState, domain: TimerDomain, now_ns: u64) -> MemoryResult<bool> {
        let cfg = &state.domains[domain.index()];
        let (ring_addr, width, queue) = (cfg.ring_addr, cfg.width, cfg.queue.clone());
        let streams = domain_streams(domain);
        let stream_bytes = STREAM_BLOCK_BYTES as usize;

        let ring = RingView::new(&self.mem, ring_addr);
        let header = ring.header()?;
        let mut block = std::mem::take(&mut state.block);

        if header.active == 0 {
            extract_block(&self.mem, None, width, streams, stream_bytes, &mut block)?;
            self.route(state, domain, &block);
            state.block = block;
            return Ok(true);
        }

        let count = header.entry_count();
        let read_idx = header.read_idx % count;
        let entry = ring.entry(read_idx)?;
        let source = if entry.valid {
            Some(entry.buf_addr)
        } else if header.dma_silence_addr != 0 {
            Some(header.dma_silence_addr)
        } else {
            None
        };

        if let Err(e) = extract_block(&self.mem, source, width, streams, stream_bytes, &mut block) {
            log::trace!("RSX {} block unreadable, playing silence: {}", domain, e);
            extract_block(&self.mem, None, width, streams, stream_bytes, &mut block)?;
        }

        let blk_idx = ring.next_blk_idx()?;
        let timestamp = ns_to_timebase(now_ns);
        let next = (read_idx + 1) % count;
        ring.complete_entry(read_idx, blk_idx, timestamp)?;
        ring.set_read_idx(next)?;
        ring.set_next_blk_idx(blk_idx + 1)?;

        self.route(state, domain, &block);
        state.block = block;

        let mut delivered = true;
        if header.queue_notify_step != 0 && next == header.queue_notify_idx % count {
            ring.set_queue_notify_idx((header.queue_notify_idx + header.queue_notify_step) % count)?;
            if let Some(queue) = queue {
                let event = GuestEvent {
                    source: RSX_EVENT_SOURCE_BASE + domain.index() as u64,
                    data1: blk_idx,
                    data2: timestamp,
                    data3: 0,
                };
                delivered = queue.send(event).is_ok();
            }
        }

        Ok(delivered)
    }

    /// Fan `block` out to the AV ports fed by `domain`
    fn route(&self, state: &mut RsxState, domain: TimerDomain, block: &[f32]) {
        let RsxState {
            routing,
            outputs,
            host,
            playing,
            ..
        } = state;
        let in_channels = domain_channels(domain);

        for port in routing.ports_for(domain) {
            routing.route(port).map.apply(block, in_channels, &mut outputs[port.index()]);
        }

        let cb = self.feeder.callback_config.load();
        let selected = routing.route(cb.avport);
        if selected.domain != domain || !cb.ready {
            return;
        }

        let output = &outputs[cb.avport.index()];
        let port_channels = selected.map.channels().max(1);
        let frames = output.len() / port_channels;
        host.clear();
        host.resize(frames * cb.input_channels, 0.0);
        downmix(output, port_channels, host, cb.input_channels);

        let bytes: &[u8] = bytemuck::cast_slice(host.as_slice());
        let written = self.feeder.ring.push(bytes);
        if written < bytes.len() {
            log::trace!("Host ring buffer full, dropped {} bytes", bytes.len() - written);
        }

        if !*playing {
            *playing = true;
            self.feeder.request_play();
        }
    }

    /// Serve ticks on the session clock until [`RsxAudio::shutdown`]
    pub fn run(&self) {
        log::info!("RSX audio thread started");
        self.timer.run(
            || self.next_deadline_in(self.clock.now_ns()),
            || {
                self.service(self.clock.now_ns());
            },
            || self.shutdown.load(Ordering::Acquire),
        );
        log::info!("RSX audio thread stopped");
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.timer.cancel();
    }
}

/// Handle to the running `rsx-audio` thread
pub struct RsxHandle {
    audio: Arc<RsxAudio>,
    thread_handle: Option<JoinHandle<()>>,
}

impl RsxHandle {
    pub fn spawn(audio: Arc<RsxAudio>) -> AudioResult<Self> {
        let thread_audio = Arc::clone(&audio);
        let thread_handle = thread::Builder::new()
            .name("rsx-audio".to_string())
            .spawn(move || thread_audio.run())
            .map_err(|e| AudioError::ThreadSpawn {
                name: "rsx-audio",
                reason: e.to_string(),
            })?;

        Ok(Self {
            audio,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn audio(&self) -> &Arc<RsxAudio> {
        &self.audio
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            self.audio.shutdown();
            if handle.join().is_err() {
                log::error!("RSX audio thread panicked");
            }
        }
    }
}

impl Drop for RsxHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
