//! Audio port registry
//!
//! A fixed table of [`PORT_COUNT`] guest audio ports. Each port owns a region
//! of guest memory split into `blocks` periods of 256 frames, plus a u64 slot
//! in the read-index table where the current block position is published.
//!
//! ```text
//!  port region (blocks × 256 frames × channels × f32, big-endian)
//!  ┌────────┬────────┬────────┬────────┐
//!  │ blk 0  │ blk 1  │ blk 2  │ blk 3  │      cur_pos ──► block being mixed next
//!  └────────┴────────┴────────┴────────┘
//! ```
//!
//! The state machine is lock-free (see [`state`]). Everything else a port
//! carries (counters, volume ramp, tag detector) sits behind a short-lived
//! mutex and is only advanced by the mixing scheduler while the port is
//! started.

mod state;
pub mod tags;

use std::sync::{Mutex, MutexGuard};

pub use state::{AtomicPortState, PortState};
pub use tags::{TagDetector, TagStatus};

use crate::memory::{GuestMemory, MemoryResult};
use crate::types::{BLOCK_SAMPLES, PORT_COUNT};

/// Mix steps a level change is spread over (13ms at 48kHz)
pub const LEVEL_RAMP_STEPS: f32 = 624.0;

/// Target level and per-frame increment of an ongoing ramp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelRamp {
    pub target: f32,
    pub inc: f32,
}

/// Mutable per-port data
#[derive(Debug, Clone)]
pub struct PortData {
    /// Guest address of the port region
    pub addr: u32,
    /// Guest address of this port's read-index slot
    pub index_addr: u32,
    pub channels: u32,
    pub blocks: u32,
    pub attr: u64,
    /// Region size in bytes
    pub size: u32,
    /// Current linear level
    pub level: f32,
    pub ramp: LevelRamp,
    /// Scheduler period counter value at the last advance
    pub global_counter: u64,
    /// Periods this port has been mixed since open
    pub active_counter: u64,
    /// Timestamp (µs) of the last advance
    pub timestamp: u64,
    pub cur_pos: u32,
    pub tags: TagDetector,
}

impl PortData {
    fn new(addr: u32, index_addr: u32) -> Self {
        Self {
            addr,
            index_addr,
            channels: 0,
            blocks: 0,
            attr: 0,
            size: 0,
            level: 1.0,
            ramp: LevelRamp {
                target: 1.0,
                inc: 0.0,
            },
            global_counter: 0,
            active_counter: 0,
            timestamp: 0,
            cur_pos: 0,
            tags: TagDetector::new(),
        }
    }

    /// Floats per block
    pub fn block_size(&self) -> u32 {
        self.channels * BLOCK_SAMPLES as u32
    }

    /// Block index `offset` periods away from the current one
    pub fn position(&self, offset: i32) -> u32 {
        if self.blocks == 0 {
            return 0;
        }
        (self.cur_pos as i64 + offset as i64).rem_euclid(self.blocks as i64) as u32
    }

    /// Guest address of the block `offset` periods away from the current one
    pub fn block_addr(&self, offset: i32) -> u32 {
        self.addr + self.position(offset) * self.block_size() * 4
    }

    /// Start a ramp from the current level towards `target`
    pub fn set_level(&mut self, target: f32) {
        self.ramp = LevelRamp {
            target,
            inc: (target - self.level) / LEVEL_RAMP_STEPS,
        };
    }

    /// Advance the level ramp by one frame, latching on the target
    #[inline]
    pub fn step_volume(&mut self) {
        let LevelRamp { target, inc } = self.ramp;
        if inc == 0.0 {
            return;
        }

        self.level += inc;
        let reached = if inc < 0.0 {
            target - self.level >= 0.0
        } else {
            target - self.level <= 0.0
        };
        if reached {
            self.level = target;
            self.ramp.inc = 0.0;
        }
    }

    /// Jump straight to the ramp target
    pub fn finish_volume_stepping(&mut self) {
        self.level = self.ramp.target;
        self.ramp.inc = 0.0;
    }

    /// Zero the block `offset` periods ahead and, when buffering, re-arm its tags
    pub fn reset_block(&mut self, mem: &GuestMemory, offset: i32, tag: bool) -> MemoryResult<()> {
        let addr = self.block_addr(offset);
        mem.fill(addr, self.block_size() as usize * 4, 0)?;
        if tag {
            let channels = self.channels;
            self.tags.write(mem, addr, channels)?;
        }
        Ok(())
    }

    /// Poll the tags of the current block
    pub fn poll_tags(&mut self, mem: &GuestMemory) -> MemoryResult<TagStatus> {
        let addr = self.block_addr(0);
        let channels = self.channels;
        self.tags.poll(mem, addr, channels)
    }
}

/// One slot of the port table
#[derive(Debug)]
pub struct AudioPort {
    number: u32,
    state: AtomicPortState,
    data: Mutex<PortData>,
}

impl AudioPort {
    fn new(number: u32) -> Self {
        Self {
            number,
            state: AtomicPortState::default(),
            data: Mutex::new(PortData::new(0, 0)),
        }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn state(&self) -> &AtomicPortState {
        &self.state
    }

    pub fn is_started(&self) -> bool {
        self.state.load() == PortState::Started
    }

    /// Lock the port's mutable data
    pub fn data(&self) -> MutexGuard<'_, PortData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Fixed-size table of audio ports
#[derive(Debug)]
pub struct PortRegistry {
    ports: [AudioPort; PORT_COUNT],
}

impl PortRegistry {
    pub fn new() -> Self {
        Self {
            ports: std::array::from_fn(|i| AudioPort::new(i as u32)),
        }
    }

    pub fn get(&self, number: u32) -> Option<&AudioPort> {
        self.ports.get(number as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AudioPort> {
        self.ports.iter()
    }

    /// Ports currently in the started state
    pub fn started(&self) -> impl Iterator<Item = &AudioPort> {
        self.ports.iter().filter(|p| p.is_started())
    }

    /// Claim the first closed port
    pub fn open_port(&self) -> Option<&AudioPort> {
        self.ports.iter().find(|p| p.state.open())
    }

    /// Force every port closed and point it at its guest region
    pub fn reset(&self, region_addr: u32, stride: u32, index_addr: u32) {
        for port in &self.ports {
            port.state.swap(PortState::Closed);
            *port.data() = PortData::new(
                region_addr + stride * port.number,
                index_addr + 8 * port.number,
            );
        }
    }
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PORT_STRIDE;

    #[test]
    fn test_open_claims_slots_in_order() {
        let reg = PortRegistry::new();
        for expected in 0..PORT_COUNT as u32 {
            assert_eq!(reg.open_port().map(|p| p.number()), Some(expected));
        }
        assert!(reg.open_port().is_none());

        reg.get(3).unwrap().state().close().unwrap();
        assert_eq!(reg.open_port().map(|p| p.number()), Some(3));
    }

    #[test]
    fn test_reset_assigns_regions() {
        let reg = PortRegistry::new();
        reg.reset(0x10000, PORT_STRIDE, 0x8000);
        let data = reg.get(2).unwrap().data().clone();
        assert_eq!(data.addr, 0x10000 + 2 * PORT_STRIDE);
        assert_eq!(data.index_addr, 0x8010);
    }

    #[test]
    fn test_position_wraps_both_ways() {
        let mut data = PortData::new(0, 0);
        data.blocks = 4;
        data.cur_pos = 3;
        assert_eq!(data.position(0), 3);
        assert_eq!(data.position(1), 0);
        assert_eq!(data.position(-4), 3);
        assert_eq!(data.position(-1), 2);
    }

    #[test]
    fn test_level_ramp_to_zero_is_monotonic_and_exact() {
        let mut data = PortData::new(0, 0);
        data.level = 1.0;
        data.set_level(0.0);

        let mut prev = data.level;
        let mut steps = 0;
        while data.ramp.inc != 0.0 {
            data.step_volume();
            assert!(data.level <= prev);
            assert!(data.level >= 0.0);
            prev = data.level;
            steps += 1;
            assert!(steps <= 700);
        }
        assert_eq!(data.level, 0.0);
        assert!(steps >= 623);
    }

    #[test]
    fn test_level_ramp_up_latches_target() {
        let mut data = PortData::new(0, 0);
        data.level = 0.25;
        data.set_level(0.75);
        for _ in 0..1000 {
            data.step_volume();
            assert!(data.level <= 0.75);
        }
        assert_eq!(data.level, 0.75);
    }

    #[test]
    fn test_finish_volume_stepping() {
        let mut data = PortData::new(0, 0);
        data.set_level(0.5);
        data.step_volume();
        data.finish_volume_stepping();
        assert_eq!(data.level, 0.5);
        assert_eq!(data.ramp.inc, 0.0);
    }
}
