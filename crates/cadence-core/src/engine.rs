//! Audio engine context
//!
//! Owns everything one emulation session needs for audio: the guest memory
//! arena, the cell-audio port table, the virtual audio hardware and the
//! three background threads. Components receive their collaborators from
//! here instead of looking them up globally.
//!
//! Start order is feeder first (it opens the device and publishes the
//! negotiated configuration), then the producers. Stop runs in reverse.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::BackendFactory;
use crate::clock::SessionClock;
use crate::config::{AudioConfig, AudioSettings};
use crate::error::AudioResult;
use crate::feeder::{FeederHandle, FeederShared};
use crate::memory::GuestMemory;
use crate::notify::EventQueueTable;
use crate::ring::HostRingBuffer;
use crate::rsx::{RsxAudio, RsxHandle};
use crate::scheduler::{CellAudio, MixScheduler, OutputStage, SchedulerHandle};
use crate::types::{PORT_COUNT, PORT_STRIDE};

/// Guest address of the audio arena
pub const GUEST_MEMORY_BASE: u32 = 0x3000_0000;
/// Space left in the arena for guest allocations (LLE rings and blocks)
pub const GUEST_HEAP_SIZE: usize = 0x10_0000;
/// How long `start` waits for the first device
pub const DEVICE_READY_TIMEOUT: Duration = Duration::from_secs(2);

/// One session of the audio pipeline
pub struct AudioEngine {
    settings: AudioSettings,
    clock: SessionClock,
    mem: Arc<GuestMemory>,
    queues: Arc<EventQueueTable>,
    cell: Arc<CellAudio>,
    rsx: Arc<RsxAudio>,
    feeder_shared: Arc<FeederShared>,
    feeder: Option<FeederHandle>,
    scheduler: Option<SchedulerHandle>,
    rsx_thread: Option<RsxHandle>,
}

impl AudioEngine {
    /// Lay out guest memory and build the components; no thread runs yet
    pub fn new(settings: AudioSettings, process_id: u32) -> AudioResult<Self> {
        let region_len = PORT_STRIDE as usize * PORT_COUNT;
        let index_len = 8 * PORT_COUNT;
        let mem = Arc::new(GuestMemory::new(
            GUEST_MEMORY_BASE,
            region_len + index_len + GUEST_HEAP_SIZE,
        ));
        let port_region = mem.alloc(region_len, 0x100)?;
        let index_table = mem.alloc(index_len, 8)?;

        let clock = SessionClock::new();
        let queues = Arc::new(EventQueueTable::new());
        let cell = Arc::new(CellAudio::new(
            Arc::clone(&mem),
            Arc::clone(&queues),
            process_id,
            port_region,
            index_table,
        ));
        let feeder_shared = Arc::new(FeederShared::new(HostRingBuffer::new(0)));
        let rsx = Arc::new(RsxAudio::new(Arc::clone(&mem), Arc::clone(&feeder_shared), clock));

        log::debug!(
            "Audio arena at 0x{:x}: ports 0x{:x}, read indices 0x{:x}",
            GUEST_MEMORY_BASE,
            port_region,
            index_table
        );

        Ok(Self {
            settings,
            clock,
            mem,
            queues,
            cell,
            rsx,
            feeder_shared,
            feeder: None,
            scheduler: None,
            rsx_thread: None,
        })
    }

    /// Open the device and start the background threads
    pub fn start(&mut self, factory: BackendFactory) -> AudioResult<()> {
        if self.feeder.is_some() {
            return Ok(());
        }

        let feeder = FeederHandle::spawn(Arc::clone(&self.feeder_shared), self.settings.clone(), factory)?;
        self.feeder = Some(feeder);

        let cfg = match self.feeder_shared.wait_device(0, DEVICE_READY_TIMEOUT) {
            Some(device) => device.config,
            None => {
                log::warn!("No audio device after {:?}, mixing against defaults", DEVICE_READY_TIMEOUT);
                AudioConfig::from_settings(&self.settings)
            }
        };

        let output = OutputStage::new(Arc::clone(&self.feeder_shared), cfg);
        let scheduler = MixScheduler::new(Arc::clone(&self.cell), output, self.clock.now_us());
        self.scheduler = Some(SchedulerHandle::spawn(scheduler, self.clock)?);

        if self.settings.enable_lle {
            self.rsx_thread = Some(RsxHandle::spawn(Arc::clone(&self.rsx))?);
        }

        log::info!(
            "Audio engine started (buffering: {}, LLE: {})",
            self.settings.enable_buffering,
            self.settings.enable_lle
        );
        Ok(())
    }

    /// Stop every thread and close the device
    pub fn stop(&mut self) {
        if self.feeder.is_none() {
            return;
        }
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.stop();
        }
        if let Some(mut rsx) = self.rsx_thread.take() {
            rsx.stop();
        }
        if let Some(mut feeder) = self.feeder.take() {
            feeder.stop();
        }
        log::info!("Audio engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.feeder.is_some()
    }

    /// Apply new user settings; the feeder reopens the device when needed
    pub fn reconfigure(&mut self, settings: AudioSettings) {
        self.feeder_shared.set_avport(settings.avport);
        self.feeder_shared.reconfigure(settings.clone());
        self.settings = settings;
    }

    /// Follow the emulator's pause state
    pub fn set_paused(&self, paused: bool) {
        self.cell.set_paused(paused);
    }

    pub fn settings(&self) -> &AudioSettings {
        &self.settings
    }

    pub fn clock(&self) -> SessionClock {
        self.clock
    }

    pub fn memory(&self) -> &Arc<GuestMemory> {
        &self.mem
    }

    pub fn queues(&self) -> &Arc<EventQueueTable> {
        &self.queues
    }

    /// Guest control surface of the cell-audio path
    pub fn cell(&self) -> &Arc<CellAudio> {
        &self.cell
    }

    /// Virtual audio hardware
    pub fn rsx(&self) -> &Arc<RsxAudio> {
        &self.rsx
    }

    pub fn feeder(&self) -> &Arc<FeederShared> {
        &self.feeder_shared
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
