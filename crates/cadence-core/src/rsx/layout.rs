//! Shared-memory ring of the virtual audio hardware
//!
//! Each clock domain reads its blocks through a ring the guest fills in
//! shared memory. All fields are big-endian.
//!
//! ```text
//!  0x00  active            u32     0x28  entry[0]   valid          u32
//!  0x04  read_idx          u32           +0x04      reserved       u32
//!  0x08  write_idx         u32           +0x08      audio_blk_idx  u64
//!  0x0c  rw_max_idx        u32           +0x10      timestamp      u64
//!  0x10  queue_notify_idx  u32           +0x18      buf_addr       u32
//!  0x14  queue_notify_step u32           +0x1c      dma_addr       u32
//!  0x18  dma_silence_addr  u32     0x48  entry[1]
//!  0x1c  reserved          u32     ...
//!  0x20  next_blk_idx      u64     0x208 entry[15]
//! ```

use crate::memory::{GuestMemory, MemoryResult};

pub const RING_ENTRY_COUNT: u32 = 16;
pub const RING_NEXT_BLK_OFFSET: u32 = 0x20;
pub const RING_ENTRIES_OFFSET: u32 = 0x28;
pub const RING_ENTRY_SIZE: u32 = 0x20;
pub const RING_SIZE: u32 = RING_ENTRIES_OFFSET + RING_ENTRY_COUNT * RING_ENTRY_SIZE;

/// Bytes of one stereo stream per block
pub const STREAM_BLOCK_BYTES: u32 = 0x400;
/// Stereo streams carried by a serial block
pub const SERIAL_STREAMS: u32 = 4;

const ACTIVE: u32 = 0x00;
const READ_IDX: u32 = 0x04;
const WRITE_IDX: u32 = 0x08;
const RW_MAX_IDX: u32 = 0x0c;
const QUEUE_NOTIFY_IDX: u32 = 0x10;
const QUEUE_NOTIFY_STEP: u32 = 0x14;
const DMA_SILENCE_ADDR: u32 = 0x18;

const ENTRY_VALID: u32 = 0x00;
const ENTRY_BLK_IDX: u32 = 0x08;
const ENTRY_TIMESTAMP: u32 = 0x10;
const ENTRY_BUF_ADDR: u32 = 0x18;
const ENTRY_DMA_ADDR: u32 = 0x1c;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingHeader {
    pub active: u32,
    pub read_idx: u32,
    pub write_idx: u32,
    pub rw_max_idx: u32,
    pub queue_notify_idx: u32,
    pub queue_notify_step: u32,
    pub dma_silence_addr: u32,
}

impl RingHeader {
    /// Entries in use, never more than the ring holds
    pub fn entry_count(&self) -> u32 {
        self.rw_max_idx.saturating_add(1).min(RING_ENTRY_COUNT)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingEntry {
    pub valid: bool,
    pub audio_blk_idx: u64,
    pub timestamp: u64,
    pub buf_addr: u32,
    pub dma_addr: u32,
}

/// Bounds-checked view of one ring in guest memory
#[derive(Clone, Copy)]
pub struct RingView<'a> {
    mem: &'a GuestMemory,
    addr: u32,
}

impl<'a> RingView<'a> {
    pub fn new(mem: &'a GuestMemory, addr: u32) -> Self {
        Self { mem, addr }
    }

    pub fn header(&self) -> MemoryResult<RingHeader> {
        let a = self.addr;
        Ok(RingHeader {
            active: self.mem.read_u32(a + ACTIVE)?,
            read_idx: self.mem.read_u32(a + READ_IDX)?,
            write_idx: self.mem.read_u32(a + WRITE_IDX)?,
            rw_max_idx: self.mem.read_u32(a + RW_MAX_IDX)?,
            queue_notify_idx: self.mem.read_u32(a + QUEUE_NOTIFY_IDX)?,
            queue_notify_step: self.mem.read_u32(a + QUEUE_NOTIFY_STEP)?,
            dma_silence_addr: self.mem.read_u32(a + DMA_SILENCE_ADDR)?,
        })
    }

    pub fn write_header(&self, header: &RingHeader) -> MemoryResult<()> {
        let a = self.addr;
        self.mem.write_u32(a + ACTIVE, header.active)?;
        self.mem.write_u32(a + READ_IDX, header.read_idx)?;
        self.mem.write_u32(a + WRITE_IDX, header.write_idx)?;
        self.mem.write_u32(a + RW_MAX_IDX, header.rw_max_idx)?;
        self.mem.write_u32(a + QUEUE_NOTIFY_IDX, header.queue_notify_idx)?;
        self.mem.write_u32(a + QUEUE_NOTIFY_STEP, header.queue_notify_step)?;
        self.mem.write_u32(a + DMA_SILENCE_ADDR, header.dma_silence_addr)
    }

    pub fn set_read_idx(&self, idx: u32) -> MemoryResult<()> {
        self.mem.write_u32(self.addr + READ_IDX, idx)
    }

    pub fn set_queue_notify_idx(&self, idx: u32) -> MemoryResult<()> {
        self.mem.write_u32(self.addr + QUEUE_NOTIFY_IDX, idx)
    }

    pub fn next_blk_idx(&self) -> MemoryResult<u64> {
        self.mem.read_u64(self.addr + RING_NEXT_BLK_OFFSET)
    }

    pub fn set_next_blk_idx(&self, idx: u64) -> MemoryResult<()> {
        self.mem.write_u64(self.addr + RING_NEXT_BLK_OFFSET, idx)
    }

    fn entry_addr(&self, idx: u32) -> u32 {
        self.addr + RING_ENTRIES_OFFSET + (idx % RING_ENTRY_COUNT) * RING_ENTRY_SIZE
    }

    pub fn entry(&self, idx: u32) -> MemoryResult<RingEntry> {
        let a = self.entry_addr(idx);
        Ok(RingEntry {
            valid: self.mem.read_u32(a + ENTRY_VALID)? != 0,
            audio_blk_idx: self.mem.read_u64(a + ENTRY_BLK_IDX)?,
            timestamp: self.mem.read_u64(a + ENTRY_TIMESTAMP)?,
            buf_addr: self.mem.read_u32(a + ENTRY_BUF_ADDR)?,
            dma_addr: self.mem.read_u32(a + ENTRY_DMA_ADDR)?,
        })
    }

    pub fn write_entry(&self, idx: u32, entry: &RingEntry) -> MemoryResult<()> {
        let a = self.entry_addr(idx);
        self.mem.write_u32(a + ENTRY_VALID, entry.valid as u32)?;
        self.mem.write_u64(a + ENTRY_BLK_IDX, entry.audio_blk_idx)?;
        self.mem.write_u64(a + ENTRY_TIMESTAMP, entry.timestamp)?;
        self.mem.write_u32(a + ENTRY_BUF_ADDR, entry.buf_addr)?;
        self.mem.write_u32(a + ENTRY_DMA_ADDR, entry.dma_addr)
    }

    /// Record when block `blk_idx` was consumed from entry `idx`
    pub fn complete_entry(&self, idx: u32, blk_idx: u64, timestamp: u64) -> MemoryResult<()> {
        let a = self.entry_addr(idx);
        self.mem.write_u64(a + ENTRY_BLK_IDX, blk_idx)?;
        self.mem.write_u64(a + ENTRY_TIMESTAMP, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_offsets() {
        assert_eq!(RING_SIZE, 0x228);
        let mem = GuestMemory::new(0x2000, 0x400);
        let ring = RingView::new(&mem, 0x2000);
        ring.write_entry(
            1,
            &RingEntry {
                valid: true,
                audio_blk_idx: 7,
                timestamp: 9,
                buf_addr: 0x1234_5678,
                dma_addr: 0,
            },
        )
        .unwrap();

        // second entry starts at 0x48, buf_addr 0x18 into it
        assert_eq!(mem.read_u32(0x2000 + 0x48).unwrap(), 1);
        assert_eq!(mem.read_u32(0x2000 + 0x48 + 0x18).unwrap(), 0x1234_5678);
        assert_eq!(ring.entry(1).unwrap().audio_blk_idx, 7);
    }

    #[test]
    fn test_header_roundtrip_is_big_endian() {
        let mem = GuestMemory::new(0x2000, 0x400);
        let ring = RingView::new(&mem, 0x2000);
        let header = RingHeader {
            active: 1,
            read_idx: 2,
            rw_max_idx: 3,
            queue_notify_step: 1,
            ..RingHeader::default()
        };
        ring.write_header(&header).unwrap();

        let mut raw = [0u8; 4];
        mem.read_bytes(0x2004, &mut raw).unwrap();
        assert_eq!(raw, [0, 0, 0, 2]);
        assert_eq!(ring.header().unwrap(), header);
        assert_eq!(header.entry_count(), 4);
    }

    #[test]
    fn test_entry_count_is_capped() {
        let header = RingHeader {
            rw_max_idx: u32::MAX,
            ..RingHeader::default()
        };
        assert_eq!(header.entry_count(), RING_ENTRY_COUNT);
    }
}
