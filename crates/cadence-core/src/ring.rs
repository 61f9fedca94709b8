//! Host ring buffer
//!
//! Byte-oriented circular buffer between the producers (mixing scheduler,
//! LLE extraction) and the device write callback.
//!
//! ```text
//!   producer ──push()──►┌───────────────────────────┐──try_pop()──► device callback
//!   (never blocks,      │  [read ... used ... write)│   (try-lock only,
//!    drops overflow)    └───────────────────────────┘    short read = silence)
//! ```
//!
//! The storage sits behind a mutex. Producers and the blocking consumer path
//! take it normally. The real-time consumer only ever calls `try_lock`, and a
//! contended pop is reported as such so it is not mistaken for an empty ring.

use std::sync::{Mutex, TryLockError};

use crate::error::{AudioError, AudioResult};

struct RingStorage {
    buf: Vec<u8>,
    /// Read offset
    head: usize,
    /// Bytes currently queued
    used: usize,
}

impl RingStorage {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn tail(&self) -> usize {
        if self.buf.is_empty() {
            0
        } else {
            (self.head + self.used) % self.buf.len()
        }
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let cap = self.capacity();
        let len = data.len().min(cap - self.used);
        if len == 0 {
            return 0;
        }
        let tail = self.tail();
        let first = len.min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        self.buf[..len - first].copy_from_slice(&data[first..len]);
        self.used += len;
        len
    }

    fn read(&mut self, out: &mut [u8]) -> usize {
        let cap = self.capacity();
        let len = out.len().min(self.used);
        if len == 0 {
            return 0;
        }
        let first = len.min(cap - self.head);
        out[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        out[first..len].copy_from_slice(&self.buf[..len - first]);
        self.head = (self.head + len) % cap;
        self.used -= len;
        len
    }
}

/// Single-producer/single-consumer byte ring with flush support
pub struct HostRingBuffer {
    storage: Mutex<RingStorage>,
}

impl HostRingBuffer {
    /// Create a ring holding up to `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: Mutex::new(RingStorage {
                buf: vec![0; capacity],
                head: 0,
                used: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RingStorage> {
        self.storage.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Queue as much of `data` as fits, returning the number of bytes written
    ///
    /// Never waits for space; whatever does not fit is dropped.
    pub fn push(&self, data: &[u8]) -> usize {
        self.lock().write(data)
    }

    /// Dequeue into `buf` without waiting for the lock
    ///
    /// Returns however many bytes were available, or `None` when another
    /// thread holds the ring. Real-time safe.
    pub fn try_pop(&self, buf: &mut [u8]) -> Option<usize> {
        match self.storage.try_lock() {
            Ok(mut guard) => Some(guard.read(buf)),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner().read(buf)),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Dequeue into `buf`
    ///
    /// With `partial_ok` this is [`HostRingBuffer::try_pop`] with contention
    /// read as 0 bytes. Without it the call may block on the lock and reads
    /// either the whole `buf` or nothing.
    pub fn pop(&self, buf: &mut [u8], partial_ok: bool) -> usize {
        if partial_ok {
            return self.try_pop(buf).unwrap_or(0);
        }
        let mut storage = self.lock();
        if storage.used < buf.len() {
            return 0;
        }
        storage.read(buf)
    }

    /// Bytes that can be pushed before the ring is full
    pub fn free_size(&self) -> usize {
        let storage = self.lock();
        storage.capacity() - storage.used
    }

    /// Bytes queued and not yet popped
    pub fn used_size(&self) -> usize {
        self.lock().used
    }

    /// Drop up to `max` of the oldest queued bytes, returning how many were dropped
    pub fn reader_flush(&self, max: usize) -> usize {
        let mut storage = self.lock();
        let len = max.min(storage.used);
        if len > 0 {
            storage.head = (storage.head + len) % storage.capacity();
            storage.used -= len;
        }
        len
    }

    /// Drop up to `max` of the newest queued bytes, returning how many were dropped
    pub fn writer_flush(&self, max: usize) -> usize {
        let mut storage = self.lock();
        let len = max.min(storage.used);
        storage.used -= len;
        len
    }

    /// Drop everything
    pub fn flush(&self) {
        let mut storage = self.lock();
        storage.head = 0;
        storage.used = 0;
    }

    /// Replace the storage with a fresh ring of `capacity` bytes
    ///
    /// Queued data is discarded. On allocation failure the old storage is
    /// kept (flushed) and the error is returned.
    pub fn set_capacity(&self, capacity: usize) -> AudioResult<()> {
        let mut storage = self.lock();
        storage.head = 0;
        storage.used = 0;
        if storage.capacity() == capacity {
            return Ok(());
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| AudioError::RingAllocation(capacity))?;
        buf.resize(capacity, 0);
        storage.buf = buf;

        log::debug!("Host ring buffer resized to {} bytes", capacity);
        Ok(())
    }
}

#[cfg(test)]
impl HostRingBuffer {
    /// Run `f` while the ring is held by this thread
    pub(crate) fn with_locked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.lock();
        f()
    }
}

impl std::fmt::Debug for HostRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage = self.lock();
        f.debug_struct("HostRingBuffer")
            .field("capacity", &storage.capacity())
            .field("used", &storage.used)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariant(ring: &HostRingBuffer) {
        assert_eq!(ring.used_size() + ring.free_size(), ring.capacity());
    }

    #[test]
    fn test_push_drops_overflow() {
        let ring = HostRingBuffer::new(8);
        assert_eq!(ring.push(&[1, 2, 3, 4, 5]), 5);
        assert_eq!(ring.push(&[6, 7, 8, 9, 10]), 3);
        assert_eq!(ring.used_size(), 8);
        assert_eq!(ring.free_size(), 0);

        let mut out = [0u8; 8];
        assert_eq!(ring.pop(&mut out, true), 8);
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_capacity_invariant_over_mixed_sequence() {
        let ring = HostRingBuffer::new(13);
        let mut pushed = 0usize;
        let mut popped = 0usize;
        let mut next = 0u8;
        let mut expected = 0u8;

        for step in 0..200usize {
            let push_len = (step * 7) % 11;
            let data: Vec<u8> = (0..push_len)
                .map(|_| {
                    let v = next;
                    next = next.wrapping_add(1);
                    v
                })
                .collect();
            let written = ring.push(&data);
            // bytes that did not fit are gone for good
            next = next.wrapping_sub((push_len - written) as u8);
            pushed += written;
            assert_invariant(&ring);

            let mut out = vec![0u8; (step * 5) % 9];
            let read = ring.pop(&mut out, true);
            assert!(read <= pushed - popped);
            for &b in &out[..read] {
                assert_eq!(b, expected);
                expected = expected.wrapping_add(1);
            }
            popped += read;
            assert_invariant(&ring);
        }
    }

    #[test]
    fn test_blocking_pop_is_all_or_nothing() {
        let ring = HostRingBuffer::new(16);
        ring.push(&[1, 2, 3]);
        let mut out = [0u8; 4];
        assert_eq!(ring.pop(&mut out, false), 0);
        assert_eq!(ring.used_size(), 3);
        ring.push(&[4]);
        assert_eq!(ring.pop(&mut out, false), 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_partial_flushes() {
        let ring = HostRingBuffer::new(16);
        ring.push(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(ring.reader_flush(2), 2);
        assert_eq!(ring.writer_flush(1), 1);
        let mut out = [0u8; 8];
        assert_eq!(ring.pop(&mut out, true), 3);
        assert_eq!(&out[..3], &[3, 4, 5]);
        assert_eq!(ring.reader_flush(usize::MAX), 0);
        assert_invariant(&ring);
    }

    #[test]
    fn test_set_capacity_discards_data() {
        let ring = HostRingBuffer::new(4);
        ring.push(&[1, 2, 3]);
        ring.set_capacity(32).unwrap();
        assert_eq!(ring.capacity(), 32);
        assert_eq!(ring.used_size(), 0);
        assert_invariant(&ring);
    }

    #[test]
    fn test_contended_realtime_pop_is_reported() {
        let ring = HostRingBuffer::new(8);
        ring.push(&[9; 8]);
        let mut out = [0u8; 4];
        assert_eq!(ring.with_locked(|| ring.try_pop(&mut out)), None);
        assert_eq!(ring.with_locked(|| ring.pop(&mut out, true)), 0);
        assert_eq!(ring.used_size(), 8);

        assert_eq!(ring.try_pop(&mut out), Some(4));
        assert_eq!(out, [9; 4]);
    }
}
