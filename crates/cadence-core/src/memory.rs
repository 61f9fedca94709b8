//! Guest memory arena
//!
//! Emulated code and the audio threads share port buffers, read-index tables
//! and the LLE ring structures through this arena. Everything in it is stored
//! big-endian, the way the guest sees it, and every access is bounds-checked
//! against the arena instead of going through raw pointers.
//!
//! ```text
//!  base                                                     base + size
//!   │◄──────────── allocated (bump) ────────────►│◄──── free ────►│
//!   ┌──────────────┬──────────────┬──────────────┬────────────────┐
//!   │ port regions │ index table  │ LLE rings ...│                │
//!   └──────────────┴──────────────┴──────────────┴────────────────┘
//! ```

use std::ops::Range;
use std::sync::{Mutex, RwLock};

use thiserror::Error;

/// Errors raised by guest memory accesses
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// Access range falls outside the arena
    #[error("guest access out of bounds: addr=0x{addr:x} len={len}")]
    OutOfBounds { addr: u32, len: usize },

    /// Address does not meet the required alignment
    #[error("misaligned guest access: addr=0x{addr:x} align={align}")]
    Misaligned { addr: u32, align: u32 },

    /// Bump allocator ran out of space
    #[error("guest arena exhausted: requested {0} bytes")]
    Exhausted(usize),
}

pub type MemoryResult<T> = Result<T, MemoryError>;

/// Byte arena mapped at a fixed guest address
pub struct GuestMemory {
    base: u32,
    bytes: RwLock<Box<[u8]>>,
    /// Next free offset for `alloc`
    cursor: Mutex<usize>,
    size: usize,
}

impl GuestMemory {
    /// Create a zeroed arena of `size` bytes mapped at `base`
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            bytes: RwLock::new(vec![0u8; size].into_boxed_slice()),
            cursor: Mutex::new(0),
            size,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Reserve `size` bytes aligned to `align` and return their guest address
    pub fn alloc(&self, size: usize, align: u32) -> MemoryResult<u32> {
        let align = align.max(1) as usize;
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let start = (self.base as usize + *cursor).next_multiple_of(align) - self.base as usize;
        let end = start.checked_add(size).ok_or(MemoryError::Exhausted(size))?;
        if end > self.size {
            return Err(MemoryError::Exhausted(size));
        }
        *cursor = end;
        Ok(self.base + start as u32)
    }

    fn range(&self, addr: u32, len: usize) -> MemoryResult<Range<usize>> {
        let start = addr
            .checked_sub(self.base)
            .ok_or(MemoryError::OutOfBounds { addr, len })? as usize;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.size)
            .ok_or(MemoryError::OutOfBounds { addr, len })?;
        Ok(start..end)
    }

    fn aligned(addr: u32, align: u32) -> MemoryResult<()> {
        if addr % align != 0 {
            return Err(MemoryError::Misaligned { addr, align });
        }
        Ok(())
    }

    /// Copy bytes out of the arena
    pub fn read_bytes(&self, addr: u32, out: &mut [u8]) -> MemoryResult<()> {
        let range = self.range(addr, out.len())?;
        let bytes = self.bytes.read().unwrap_or_else(|e| e.into_inner());
        out.copy_from_slice(&bytes[range]);
        Ok(())
    }

    /// Copy bytes into the arena
    pub fn write_bytes(&self, addr: u32, data: &[u8]) -> MemoryResult<()> {
        let range = self.range(addr, data.len())?;
        let mut bytes = self.bytes.write().unwrap_or_else(|e| e.into_inner());
        bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Set `len` bytes starting at `addr` to `value`
    pub fn fill(&self, addr: u32, len: usize, value: u8) -> MemoryResult<()> {
        let range = self.range(addr, len)?;
        let mut bytes = self.bytes.write().unwrap_or_else(|e| e.into_inner());
        bytes[range].fill(value);
        Ok(())
    }

    /// Run `f` over a read-only view of `len` bytes at `addr`
    pub fn with_slice<R>(&self, addr: u32, len: usize, f: impl FnOnce(&[u8]) -> R) -> MemoryResult<R> {
        let range = self.range(addr, len)?;
        let bytes = self.bytes.read().unwrap_or_else(|e| e.into_inner());
        Ok(f(&bytes[range]))
    }

    /// Run `f` over a mutable view of `len` bytes at `addr`
    pub fn with_slice_mut<R>(
        &self,
        addr: u32,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> MemoryResult<R> {
        let range = self.range(addr, len)?;
        let mut bytes = self.bytes.write().unwrap_or_else(|e| e.into_inner());
        Ok(f(&mut bytes[range]))
    }

    pub fn read_u16(&self, addr: u32) -> MemoryResult<u16> {
        Self::aligned(addr, 2)?;
        let mut raw = [0u8; 2];
        self.read_bytes(addr, &mut raw)?;
        Ok(u16::from_be_bytes(raw))
    }

    pub fn read_u32(&self, addr: u32) -> MemoryResult<u32> {
        Self::aligned(addr, 4)?;
        let mut raw = [0u8; 4];
        self.read_bytes(addr, &mut raw)?;
        Ok(u32::from_be_bytes(raw))
    }

    pub fn read_u64(&self, addr: u32) -> MemoryResult<u64> {
        Self::aligned(addr, 8)?;
        let mut raw = [0u8; 8];
        self.read_bytes(addr, &mut raw)?;
        Ok(u64::from_be_bytes(raw))
    }

    pub fn read_f32(&self, addr: u32) -> MemoryResult<f32> {
        self.read_u32(addr).map(f32::from_bits)
    }

    pub fn write_u16(&self, addr: u32, value: u16) -> MemoryResult<()> {
        Self::aligned(addr, 2)?;
        self.write_bytes(addr, &value.to_be_bytes())
    }

    pub fn write_u32(&self, addr: u32, value: u32) -> MemoryResult<()> {
        Self::aligned(addr, 4)?;
        self.write_bytes(addr, &value.to_be_bytes())
    }

    pub fn write_u64(&self, addr: u32, value: u64) -> MemoryResult<()> {
        Self::aligned(addr, 8)?;
        self.write_bytes(addr, &value.to_be_bytes())
    }

    pub fn write_f32(&self, addr: u32, value: f32) -> MemoryResult<()> {
        self.write_u32(addr, value.to_bits())
    }

    /// Decode `out.len()` big-endian floats starting at `addr`
    pub fn read_f32_slice(&self, addr: u32, out: &mut [f32]) -> MemoryResult<()> {
        Self::aligned(addr, 4)?;
        self.with_slice(addr, out.len() * 4, |bytes| {
            for (dst, src) in out.iter_mut().zip(bytes.chunks_exact(4)) {
                *dst = f32::from_be_bytes([src[0], src[1], src[2], src[3]]);
            }
        })
    }

    /// Encode `data` as big-endian floats starting at `addr`
    pub fn write_f32_slice(&self, addr: u32, data: &[f32]) -> MemoryResult<()> {
        Self::aligned(addr, 4)?;
        self.with_slice_mut(addr, data.len() * 4, |bytes| {
            for (dst, src) in bytes.chunks_exact_mut(4).zip(data) {
                dst.copy_from_slice(&src.to_be_bytes());
            }
        })
    }
}

impl std::fmt::Debug for GuestMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestMemory")
            .field("base", &format_args!("0x{:x}", self.base))
            .field("size", &self.size)
            .finish()
    }
}
