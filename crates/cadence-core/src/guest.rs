//! Guest control surface of the cell-audio path
//!
//! The calls emulated code makes to drive its audio ports. Every call takes
//! the cell-audio lock, so it serializes against the scheduler's advance.
//! Status codes come back as [`GuestError`].

use std::sync::MutexGuard;

use crate::error::{GuestError, GuestResult};
use crate::memory::{GuestMemory, MemoryResult};
use crate::notify::{EventReceiver, CREATEEVENTFLAG_SPU, EVENTFLAG_MASK};
use crate::port::{AudioPort, PortState};
use crate::scheduler::{CellAudio, CellAudioState};
use crate::types::{BLOCK_SAMPLES, PORT_COUNT, PORT_STRIDE};

pub const PORT_2CH: u64 = 2;
pub const PORT_8CH: u64 = 8;

/// Port attribute: start at the level given in [`PortParam::level`]
pub const PORTATTR_INITLEVEL: u64 = 0x1000;
/// Attributes with an effect on playback
const PORTATTR_KNOWN: u64 = PORTATTR_INITLEVEL;

/// Largest magnitude of an add-data volume
pub const ADD_DATA_MAX_VOLUME: f32 = 16.0;

/// Parameters of a port open call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortParam {
    pub channels: u64,
    pub blocks: u64,
    pub attr: u64,
    pub level: f32,
}

/// Status reported by [`CellAudio::get_port_config`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStatus {
    Close,
    Ready,
    Run,
}

impl From<PortState> for PortStatus {
    fn from(state: PortState) -> Self {
        match state {
            PortState::Closed => PortStatus::Close,
            PortState::Opened => PortStatus::Ready,
            PortState::Started => PortStatus::Run,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    pub read_index_addr: u32,
    pub status: PortStatus,
    pub channels: u32,
    pub blocks: u32,
    pub port_size: u32,
    pub port_addr: u32,
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_finite() {
        volume.clamp(-ADD_DATA_MAX_VOLUME, ADD_DATA_MAX_VOLUME)
    } else {
        0.0
    }
}

/// Add `src` scaled by `volume` into the first channels of a block
///
/// `src` holds `frames` frames of `src_channels`; the block holds frames of
/// `dst_channels`. Only `min(src_channels, dst_channels)` leading channels
/// are touched.
fn mix_into_block(
    mem: &GuestMemory,
    addr: u32,
    frames: usize,
    dst_channels: usize,
    src: &[f32],
    src_channels: usize,
    volume: f32,
) -> MemoryResult<()> {
    if dst_channels == 0 || src_channels == 0 {
        return Ok(());
    }

    let mut block = vec![0.0f32; frames * dst_channels];
    mem.read_f32_slice(addr, &mut block)?;
    let width = src_channels.min(dst_channels);
    for (dst, src) in block.chunks_exact_mut(dst_channels).zip(src.chunks_exact(src_channels)) {
        for (d, s) in dst[..width].iter_mut().zip(&src[..width]) {
            *d += s * volume;
        }
    }
    mem.write_f32_slice(addr, &block)
}

impl CellAudio {
    fn lock_init(&self) -> GuestResult<MutexGuard<'_, CellAudioState>> {
        let state = self.lock();
        if !state.init {
            return Err(GuestError::NotInit);
        }
        Ok(state)
    }

    fn port(&self, port_num: u32) -> GuestResult<&AudioPort> {
        self.ports.get(port_num).ok_or(GuestError::Param)
    }

    fn open_port_ref(&self, port_num: u32) -> GuestResult<&AudioPort> {
        let port = self.port(port_num)?;
        if port.state().load() == PortState::Closed {
            return Err(GuestError::PortNotOpen);
        }
        Ok(port)
    }

    /// Bring the port table up
    pub fn init(&self) -> GuestResult<()> {
        let mut state = self.lock();
        if state.init {
            return Err(GuestError::AlreadyInit);
        }

        let region_len = PORT_STRIDE as usize * PORT_COUNT;
        self.mem.fill(state.port_region, region_len, 0)?;
        self.mem.fill(state.index_table, 8 * PORT_COUNT, 0)?;
        self.ports.reset(state.port_region, PORT_STRIDE, state.index_table);

        state.init = true;
        log::info!("Audio initialized");
        Ok(())
    }

    pub fn quit(&self) -> GuestResult<()> {
        let mut state = self.lock_init()?;
        for port in self.ports.iter() {
            // stopping an idle port is fine here
            let _ = port.state().stop();
        }
        state.notify.clear();
        state.init = false;
        log::info!("Audio shut down");
        Ok(())
    }

    /// Claim a free port; returns its number
    pub fn port_open(&self, param: &PortParam) -> GuestResult<u32> {
        let state = self.lock_init()?;

        if !matches!(param.channels, 0 | PORT_2CH | PORT_8CH) {
            return Err(GuestError::Param);
        }
        if !matches!(param.blocks, 2 | 4 | 8 | 16 | 32) {
            return Err(GuestError::Param);
        }
        if param.attr & !PORTATTR_KNOWN != 0 {
            log::debug!("Port open: unsupported attributes 0x{:x}", param.attr & !PORTATTR_KNOWN);
        }

        let port = self.ports.open_port().ok_or(GuestError::PortFull)?;

        let level = if param.attr & PORTATTR_INITLEVEL != 0 {
            param.level * state.master_volume
        } else {
            state.master_volume
        };

        let mut data = port.data();
        data.channels = param.channels as u32;
        data.blocks = param.blocks as u32;
        data.attr = param.attr;
        data.size = data.channels * data.blocks * BLOCK_SAMPLES as u32 * 4;
        data.cur_pos = 0;
        data.global_counter = state.counter;
        data.active_counter = 0;
        data.timestamp = state.last_period_end;
        data.level = level;
        data.set_level(level);
        data.tags.reset();

        log::debug!(
            "Port {} opened: {} channels, {} blocks, level {:.2}",
            port.number(),
            param.channels,
            param.blocks,
            level
        );
        Ok(port.number())
    }

    pub fn get_port_config(&self, port_num: u32) -> GuestResult<PortConfig> {
        let _state = self.lock_init()?;
        let port = self.port(port_num)?;
        let data = port.data();
        Ok(PortConfig {
            read_index_addr: data.index_addr,
            status: port.state().load().into(),
            channels: data.channels,
            blocks: data.blocks,
            port_size: data.size,
            port_addr: data.addr,
        })
    }

    pub fn port_start(&self, port_num: u32) -> GuestResult<()> {
        let _state = self.lock_init()?;
        self.port(port_num)?.state().start()
    }

    pub fn port_stop(&self, port_num: u32) -> GuestResult<()> {
        let _state = self.lock_init()?;
        self.port(port_num)?.state().stop()
    }

    pub fn port_close(&self, port_num: u32) -> GuestResult<()> {
        let _state = self.lock_init()?;
        self.port(port_num)?.state().close()
    }

    /// Time (µs) at which the period tagged `tag` was mixed
    pub fn get_port_timestamp(&self, port_num: u32, tag: u64) -> GuestResult<u64> {
        let state = self.lock_init()?;
        let data = self.open_port_ref(port_num)?.data();

        if data.global_counter < tag {
            log::error!(
                "Port {} timestamp: tag {} is ahead of counter {}",
                port_num,
                tag,
                data.global_counter
            );
            return Err(GuestError::TagNotFound);
        }

        let delta = (data.global_counter - tag) * state.block_period;
        Ok(data.timestamp.wrapping_sub(delta))
    }

    /// Period tag of block `block_no` of the port
    pub fn get_port_block_tag(&self, port_num: u32, block_no: u64) -> GuestResult<u64> {
        let _state = self.lock_init()?;
        let data = self.open_port_ref(port_num)?.data();

        if block_no >= data.blocks as u64 {
            return Err(GuestError::Param);
        }
        Ok((data.global_counter + block_no).wrapping_sub(data.cur_pos as u64))
    }

    /// Ramp the port towards `level`
    pub fn set_port_level(&self, port_num: u32, level: f32) -> GuestResult<()> {
        let state = self.lock_init()?;
        let port = self.open_port_ref(port_num)?;

        let level = level * state.master_volume;
        if level >= 0.0 {
            port.data().set_level(level);
        } else {
            log::debug!("Port {}: ignoring negative level {}", port_num, level);
        }
        Ok(())
    }

    /// Create a notification queue under the first free key
    pub fn create_notify_event_queue(&self, flags: u32) -> GuestResult<(u64, EventReceiver)> {
        if flags & !CREATEEVENTFLAG_SPU != 0 {
            return Err(GuestError::Param);
        }
        self.queues.create_notify_queue()
    }

    /// Register `key` for mix notifications; returns the event source id
    pub fn set_notify_event_queue(&self, key: u64, flags: u32) -> GuestResult<u64> {
        if flags & !EVENTFLAG_MASK != 0 {
            return Err(GuestError::Param);
        }
        let mut state = self.lock_init()?;
        state.notify.add(key, flags, &self.queues)
    }

    pub fn remove_notify_event_queue(&self, key: u64, flags: u32) -> GuestResult<()> {
        if flags & !EVENTFLAG_MASK != 0 {
            return Err(GuestError::Param);
        }
        let mut state = self.lock_init()?;
        state.notify.remove(key, flags)
    }

    /// Target block of an add-data call
    ///
    /// The returned guard keeps the scheduler from advancing the port while
    /// the block is written.
    fn add_target(&self, port_num: u32) -> GuestResult<(MutexGuard<'_, CellAudioState>, u32, usize)> {
        let state = self.lock_init()?;
        let data = self.port(port_num)?.data();
        Ok((state, data.block_addr(0), data.channels as usize))
    }

    /// Mix a block of the port's own channel count into its current block
    pub fn add_data(&self, port_num: u32, src: &[f32], samples: u32, volume: f32) -> GuestResult<()> {
        let (_state, addr, channels) = self.add_target(port_num)?;
        if samples as usize != BLOCK_SAMPLES {
            log::error!("Add data: invalid sample count {}", samples);
            return Err(GuestError::Param);
        }
        if src.len() < BLOCK_SAMPLES * channels {
            return Err(GuestError::Param);
        }
        mix_into_block(&self.mem, addr, BLOCK_SAMPLES, channels, src, channels, clamp_volume(volume))?;
        Ok(())
    }

    /// Mix a stereo block into the front pair of the port's current block
    pub fn add_2ch_data(&self, port_num: u32, src: &[f32], samples: u32, volume: f32) -> GuestResult<()> {
        let (_state, addr, channels) = self.add_target(port_num)?;
        if samples as usize != BLOCK_SAMPLES {
            log::error!("Add 2ch data: invalid sample count {}", samples);
            return Err(GuestError::Param);
        }
        if src.len() < BLOCK_SAMPLES * 2 {
            return Err(GuestError::Param);
        }
        if !matches!(channels, 2 | 6 | 8) {
            log::error!("Add 2ch data: port {} has {} channels", port_num, channels);
            return Ok(());
        }
        mix_into_block(&self.mem, addr, BLOCK_SAMPLES, channels, src, 2, clamp_volume(volume))?;
        Ok(())
    }

    /// Mix a 5.1 block into the port's current block
    pub fn add_6ch_data(&self, port_num: u32, src: &[f32], volume: f32) -> GuestResult<()> {
        let (_state, addr, channels) = self.add_target(port_num)?;
        if src.len() < BLOCK_SAMPLES * 6 {
            return Err(GuestError::Param);
        }
        if !matches!(channels, 6 | 8) {
            log::error!("Add 6ch data: port {} has {} channels", port_num, channels);
            return Ok(());
        }
        mix_into_block(&self.mem, addr, BLOCK_SAMPLES, channels, src, 6, clamp_volume(volume))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{EventQueueTable, EVENTFLAG_DECIMATE_2, EVENTFLAG_NOMIX};
    use std::sync::Arc;

    fn audio() -> CellAudio {
        let mem = Arc::new(GuestMemory::new(0x1000_0000, PORT_STRIDE as usize * PORT_COUNT + 0x100));
        let region = mem.alloc(PORT_STRIDE as usize * PORT_COUNT, 0x100).unwrap();
        let index = mem.alloc(8 * PORT_COUNT, 8).unwrap();
        let audio = CellAudio::new(mem, Arc::new(EventQueueTable::new()), 7, region, index);
        audio.init().unwrap();
        audio
    }

    fn stereo(blocks: u64) -> PortParam {
        PortParam {
            channels: 2,
            blocks,
            attr: 0,
            level: 1.0,
        }
    }

    #[test]
    fn test_calls_before_init_fail() {
        let audio = audio();
        audio.quit().unwrap();
        assert_eq!(audio.port_open(&stereo(4)), Err(GuestError::NotInit));
        assert_eq!(audio.port_start(0), Err(GuestError::NotInit));
        assert_eq!(audio.quit(), Err(GuestError::NotInit));
        audio.init().unwrap();
        assert_eq!(audio.init(), Err(GuestError::AlreadyInit));
    }

    #[test]
    fn test_open_validates_params() {
        let audio = audio();
        assert_eq!(audio.port_open(&PortParam { channels: 6, ..stereo(4) }), Err(GuestError::Param));
        assert_eq!(audio.port_open(&stereo(3)), Err(GuestError::Param));
        for _ in 0..PORT_COUNT {
            audio.port_open(&stereo(2)).unwrap();
        }
        assert_eq!(audio.port_open(&stereo(2)), Err(GuestError::PortFull));
    }

    #[test]
    fn test_port_lifecycle_codes() {
        let audio = audio();
        let port = audio.port_open(&stereo(4)).unwrap();

        let cfg = audio.get_port_config(port).unwrap();
        assert_eq!(cfg.status, PortStatus::Ready);
        assert_eq!(cfg.port_size, 2 * 4 * 256 * 4);
        assert_eq!(cfg.read_index_addr, audio.lock().index_table + 8 * port);

        assert_eq!(audio.port_stop(port), Err(GuestError::PortNotRun));
        audio.port_start(port).unwrap();
        assert_eq!(audio.port_start(port), Err(GuestError::PortAlreadyRun));
        assert_eq!(audio.get_port_config(port).unwrap().status, PortStatus::Run);
        audio.port_stop(port).unwrap();
        audio.port_close(port).unwrap();
        assert_eq!(audio.port_close(port), Err(GuestError::PortNotOpen));
        assert_eq!(audio.port_start(port), Err(GuestError::PortNotOpen));
        assert_eq!(audio.port_start(PORT_COUNT as u32), Err(GuestError::Param));
    }

    #[test]
    fn test_timestamps_and_block_tags() {
        let audio = audio();
        let port = audio.port_open(&stereo(4)).unwrap();
        {
            let mut data = audio.ports.get(port).unwrap().data();
            data.global_counter = 10;
            data.timestamp = 100_000;
            data.cur_pos = 2;
        }

        assert_eq!(audio.get_port_timestamp(port, 10), Ok(100_000));
        assert_eq!(audio.get_port_timestamp(port, 8), Ok(100_000 - 2 * 5333));
        assert_eq!(audio.get_port_timestamp(port, 11), Err(GuestError::TagNotFound));

        assert_eq!(audio.get_port_block_tag(port, 2), Ok(10));
        assert_eq!(audio.get_port_block_tag(port, 3), Ok(11));
        assert_eq!(audio.get_port_block_tag(port, 4), Err(GuestError::Param));
    }

    #[test]
    fn test_level_ramp_reaches_zero_monotonically() {
        let audio = audio();
        let port = audio.port_open(&stereo(4)).unwrap();
        audio.set_port_level(port, 0.0).unwrap();

        let mut data = audio.ports.get(port).unwrap().data();
        let mut prev = data.level;
        assert_eq!(prev, 1.0);
        for _ in 0..1000 {
            data.step_volume();
            assert!(data.level <= prev);
            assert!(data.level >= 0.0);
            prev = data.level;
        }
        assert_eq!(data.level, 0.0);
    }

    #[test]
    fn test_initlevel_and_negative_level() {
        let audio = audio();
        let port = audio
            .port_open(&PortParam {
                attr: PORTATTR_INITLEVEL,
                level: 0.25,
                ..stereo(2)
            })
            .unwrap();
        assert_eq!(audio.ports.get(port).unwrap().data().level, 0.25);

        audio.set_port_level(port, -1.0).unwrap();
        assert_eq!(audio.ports.get(port).unwrap().data().ramp.target, 0.25);
    }

    #[test]
    fn test_notify_queue_registration() {
        let audio = audio();
        let (key, _rx) = audio.create_notify_event_queue(0).unwrap();
        assert_eq!(audio.create_notify_event_queue(2).err(), Some(GuestError::Param));

        assert_eq!(audio.set_notify_event_queue(key, 1), Err(GuestError::Param));
        assert_eq!(audio.set_notify_event_queue(key + 100, 0), Err(GuestError::TransEvent));

        let source = audio.set_notify_event_queue(key, EVENTFLAG_DECIMATE_2).unwrap();
        assert_eq!(source >> 32, 7);
        assert_eq!(audio.set_notify_event_queue(key, 0), Err(GuestError::TransEvent));

        assert_eq!(audio.remove_notify_event_queue(key, EVENTFLAG_NOMIX), Err(GuestError::TransEvent));
        audio.remove_notify_event_queue(key, EVENTFLAG_DECIMATE_2).unwrap();
        assert!(audio.lock().notify.keys().is_empty());
    }

    #[test]
    fn test_add_data_accumulates_with_clamped_volume() {
        let audio = audio();
        let port = audio.port_open(&stereo(4)).unwrap();
        let src = vec![0.5f32; 512];

        audio.add_data(port, &src, 256, 1.0).unwrap();
        audio.add_2ch_data(port, &src, 256, 100.0).unwrap();
        audio.add_data(port, &src, 256, f32::NAN).unwrap();
        assert_eq!(audio.add_data(port, &src, 128, 1.0), Err(GuestError::Param));

        let addr = audio.ports.get(port).unwrap().data().block_addr(0);
        let mut block = vec![0.0f32; 512];
        audio.mem.read_f32_slice(addr, &mut block).unwrap();
        // 0.5 + 0.5 * 16
        assert!(block.iter().all(|&s| s == 8.5));
    }

    #[test]
    fn test_add_6ch_into_8ch_port_leaves_sides() {
        let audio = audio();
        let port = audio
            .port_open(&PortParam {
                channels: 8,
                ..stereo(2)
            })
            .unwrap();
        let src = vec![1.0f32; 256 * 6];
        audio.add_6ch_data(port, &src, 0.5).unwrap();

        let addr = audio.ports.get(port).unwrap().data().block_addr(0);
        let mut frame = [0.0f32; 8];
        audio.mem.read_f32_slice(addr, &mut frame).unwrap();
        assert_eq!(frame, [0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
    }
}
