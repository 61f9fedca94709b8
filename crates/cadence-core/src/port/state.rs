//! Lock-free port state machine
//!
//! ```text
//!   closed ──open──► opened ──start──► started
//!     ▲                │  ▲               │
//!     └─────close──────┘  └─────stop──────┘
//!     ▲                                   │
//!     └───────────────close───────────────┘
//! ```
//!
//! Every transition is a single compare-and-swap (or swap for close), so a
//! control thread can race the scheduler without a lock. The scheduler only
//! ever reads the state as a filter.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{GuestError, GuestResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PortState {
    Closed = 0,
    Opened = 1,
    Started = 2,
}

impl PortState {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => PortState::Opened,
            2 => PortState::Started,
            _ => PortState::Closed,
        }
    }
}

/// Atomic cell holding a [`PortState`]
#[derive(Debug)]
pub struct AtomicPortState(AtomicU32);

impl AtomicPortState {
    pub const fn new(state: PortState) -> Self {
        Self(AtomicU32::new(state as u32))
    }

    pub fn load(&self) -> PortState {
        PortState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Replace the state unconditionally, returning the previous one
    pub fn swap(&self, state: PortState) -> PortState {
        PortState::from_raw(self.0.swap(state as u32, Ordering::AcqRel))
    }

    /// Move `from` → `to`; on failure the observed state is returned
    pub fn transition(&self, from: PortState, to: PortState) -> Result<(), PortState> {
        self.0
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(PortState::from_raw)
    }

    /// closed → opened
    pub fn open(&self) -> bool {
        self.transition(PortState::Closed, PortState::Opened).is_ok()
    }

    /// opened → started
    pub fn start(&self) -> GuestResult<()> {
        match self.transition(PortState::Opened, PortState::Started) {
            Ok(()) => Ok(()),
            Err(PortState::Started) => Err(GuestError::PortAlreadyRun),
            Err(_) => Err(GuestError::PortNotOpen),
        }
    }

    /// started → opened
    pub fn stop(&self) -> GuestResult<()> {
        self.transition(PortState::Started, PortState::Opened)
            .map_err(|_| GuestError::PortNotRun)
    }

    /// any → closed
    pub fn close(&self) -> GuestResult<()> {
        match self.swap(PortState::Closed) {
            PortState::Closed => Err(GuestError::PortNotOpen),
            _ => Ok(()),
        }
    }
}

impl Default for AtomicPortState {
    fn default() -> Self {
        Self::new(PortState::Closed)
    }
}
