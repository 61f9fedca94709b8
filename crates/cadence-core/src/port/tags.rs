//! Completion-tag detection
//!
//! Before each period the scheduler writes `-0.0` sentinels at 32 evenly
//! spaced float slots of the block the guest is about to fill. Polling those
//! slots tells how far the guest got. `-0.0 == 0.0` holds for floats, so a
//! guest writing real silence is still seen through the sign bit.
//!
//! | highest touched slot                    | status      |
//! |-----------------------------------------|-------------|
//! | none                                    | Untouched   |
//! | last slot, re-touched                   | InProgress  |
//! | last slot                               | Complete    |
//! | same as previous poll, re-touched       | InProgress  |
//! | same as previous poll                   | Incomplete  |
//! | advanced since previous poll            | InProgress  |

use crate::memory::{GuestMemory, MemoryResult};

/// Sentinel slots per block
pub const TAG_COUNT: usize = 32;

pub const TAG_FIRST_2CH: u32 = 15;
pub const TAG_DELTA_2CH: u32 = 16;
pub const TAG_FIRST_8CH: u32 = 1;
pub const TAG_DELTA_8CH: u32 = 66;

/// Value written into every sentinel slot
pub const TAG_SENTINEL: f32 = -0.0;

/// How far the guest got with the current block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagStatus {
    Untouched,
    InProgress,
    Incomplete,
    Complete,
}

/// Float index of each sentinel inside a block of `channels` interleaved channels
pub fn tag_positions(channels: u32) -> impl Iterator<Item = u32> {
    let (first, delta) = if channels == 2 {
        (TAG_FIRST_2CH, TAG_DELTA_2CH)
    } else {
        (TAG_FIRST_8CH, TAG_DELTA_8CH)
    };
    (0..TAG_COUNT as u32).map(move |nr| first + nr * delta)
}

/// Per-port detector state
#[derive(Debug, Clone)]
pub struct TagDetector {
    last_value: [f32; TAG_COUNT],
    prev_touched: Option<u32>,
}

impl TagDetector {
    pub fn new() -> Self {
        Self {
            last_value: [TAG_SENTINEL; TAG_COUNT],
            prev_touched: None,
        }
    }

    /// Forget all observations; every slot is assumed to hold the sentinel
    pub fn reset(&mut self) {
        self.last_value = [TAG_SENTINEL; TAG_COUNT];
        self.prev_touched = None;
    }

    /// Highest slot seen touched by the previous poll
    pub fn prev_touched(&self) -> Option<u32> {
        self.prev_touched
    }

    /// Compare freshly read slot values against the last observation
    pub fn classify(&mut self, values: &[f32; TAG_COUNT]) -> TagStatus {
        let prev = self.prev_touched;
        let mut last_touched = prev;
        let mut retouched = false;

        for (nr, (&val, last)) in values.iter().zip(self.last_value.iter_mut()).enumerate() {
            let nr = nr as u32;
            if is_touched(val, *last) {
                *last = val;
                retouched |= prev.is_some_and(|p| nr <= p);
                last_touched = Some(nr);
            }
        }

        let last_slot = TAG_COUNT as u32 - 1;
        match last_touched {
            None => TagStatus::Untouched,
            Some(nr) if nr == last_slot => {
                self.prev_touched = last_touched;
                if retouched {
                    TagStatus::InProgress
                } else {
                    TagStatus::Complete
                }
            }
            Some(_) if last_touched == prev => {
                if retouched {
                    TagStatus::InProgress
                } else {
                    TagStatus::Incomplete
                }
            }
            Some(_) => {
                self.prev_touched = last_touched;
                TagStatus::InProgress
            }
        }
    }

    /// Write the sentinels into the block at `block_addr` and reset
    pub fn write(&mut self, mem: &GuestMemory, block_addr: u32, channels: u32) -> MemoryResult<()> {
        for pos in tag_positions(channels) {
            mem.write_f32(block_addr + pos * 4, TAG_SENTINEL)?;
        }
        self.reset();
        Ok(())
    }

    /// Read the sentinel slots of the block at `block_addr` and classify them
    pub fn poll(&mut self, mem: &GuestMemory, block_addr: u32, channels: u32) -> MemoryResult<TagStatus> {
        let mut values = [0.0f32; TAG_COUNT];
        for (value, pos) in values.iter_mut().zip(tag_positions(channels)) {
            *value = mem.read_f32(block_addr + pos * 4)?;
        }
        Ok(self.classify(&values))
    }
}

impl Default for TagDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// A slot counts as touched when its value changed, or when the sentinel's
/// sign bit was cleared (`-0.0` → `+0.0` compares equal)
fn is_touched(val: f32, last: f32) -> bool {
    val != last || (last == 0.0 && last.is_sign_negative() && !val.is_sign_negative())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinels() -> [f32; TAG_COUNT] {
        [TAG_SENTINEL; TAG_COUNT]
    }

    fn filled_up_to(n: usize) -> [f32; TAG_COUNT] {
        let mut values = sentinels();
        for v in values.iter_mut().take(n) {
            *v = 0.5;
        }
        values
    }

    #[test]
    fn test_positions_cover_whole_block() {
        let two: Vec<u32> = tag_positions(2).collect();
        assert_eq!(two.len(), TAG_COUNT);
        assert_eq!(two[0], 15);
        assert_eq!(*two.last().unwrap(), 511);

        let eight: Vec<u32> = tag_positions(8).collect();
        assert_eq!(eight[0], 1);
        assert_eq!(*eight.last().unwrap(), 2047);
    }

    #[test]
    fn test_untouched_block() {
        let mut det = TagDetector::new();
        assert_eq!(det.classify(&sentinels()), TagStatus::Untouched);
        assert_eq!(det.classify(&sentinels()), TagStatus::Untouched);
    }

    #[test]
    fn test_partial_then_stalled_then_complete() {
        let mut det = TagDetector::new();
        assert_eq!(det.classify(&filled_up_to(10)), TagStatus::InProgress);
        assert_eq!(det.prev_touched(), Some(9));
        // nothing new since the last poll
        assert_eq!(det.classify(&filled_up_to(10)), TagStatus::Incomplete);
        assert_eq!(det.classify(&filled_up_to(TAG_COUNT)), TagStatus::Complete);
    }

    #[test]
    fn test_complete_stays_complete_when_unchanged() {
        let mut det = TagDetector::new();
        let full = filled_up_to(TAG_COUNT);
        assert_eq!(det.classify(&full), TagStatus::Complete);
        assert_eq!(det.classify(&full), TagStatus::Complete);
    }

    #[test]
    fn test_sign_flip_counts_as_touch() {
        let mut det = TagDetector::new();
        let mut values = sentinels();
        values[TAG_COUNT - 1] = 0.0;
        assert_eq!(det.classify(&values), TagStatus::Complete);
        assert_eq!(det.prev_touched(), Some(TAG_COUNT as u32 - 1));
    }

    #[test]
    fn test_retouch_after_completion_is_in_progress() {
        let mut det = TagDetector::new();
        let mut values = filled_up_to(TAG_COUNT);
        assert_eq!(det.classify(&values), TagStatus::Complete);

        // guest started overwriting the block again
        values[0] = 0.25;
        values[TAG_COUNT - 1] = 0.25;
        assert_eq!(det.classify(&values), TagStatus::InProgress);
    }

    #[test]
    fn test_retouch_below_prev_without_advancing() {
        let mut det = TagDetector::new();
        let mut values = filled_up_to(8);
        assert_eq!(det.classify(&values), TagStatus::InProgress);
        values[3] = 0.75;
        // highest slot touched by this poll is 3, which is not the previous one
        assert_eq!(det.classify(&values), TagStatus::InProgress);
    }

    #[test]
    fn test_write_and_poll_through_memory() {
        let mem = GuestMemory::new(0, 256 * 2 * 4);
        let mut det = TagDetector::new();
        det.write(&mem, 0, 2).unwrap();
        assert_eq!(det.poll(&mem, 0, 2).unwrap(), TagStatus::Untouched);

        let data = vec![0.1f32; 512];
        mem.write_f32_slice(0, &data).unwrap();
        assert_eq!(det.poll(&mem, 0, 2).unwrap(), TagStatus::Complete);
    }
}
