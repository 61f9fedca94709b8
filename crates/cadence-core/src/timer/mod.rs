//! Virtual timer pool and periodic timer
//!
//! [`VirtualTimerPool`] holds the scheduling math for the LLE clock domains
//! and is independent of any OS primitive. [`PeriodicTimer`] does the actual
//! sleeping.

mod periodic;
mod virtual_timer;

pub use periodic::{CondvarWait, PeriodicTimer, WaitPrimitive, Wake};
pub use virtual_timer::{TickRate, TimerDomain, VirtualTimerPool, MAX_BURST_TICKS};
