//! Cancelable deadline wait
//!
//! The LLE thread sleeps on one wait primitive until the earliest virtual
//! timer deadline. Another thread can cancel the wait so that a domain
//! reconfiguration takes effect right away.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Why a wait returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The deadline passed
    Elapsed,
    /// Another thread cancelled the wait
    Cancelled,
}

/// Wait until a deadline, cancelable from another thread
pub trait WaitPrimitive: Send + Sync {
    /// Block for `timeout`, or until cancelled when `None`
    fn wait(&self, timeout: Option<Duration>) -> Wake;

    /// Wake the current (or next) waiter early
    fn cancel(&self);
}

/// [`WaitPrimitive`] on a mutex/condvar pair
///
/// A cancel issued while nobody waits is latched and consumed by the next
/// wait, so it cannot be lost between deadline computation and sleeping.
#[derive(Debug, Default)]
pub struct CondvarWait {
    cancelled: Mutex<bool>,
    cv: Condvar,
}

impl CondvarWait {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitPrimitive for CondvarWait {
    fn wait(&self, timeout: Option<Duration>) -> Wake {
        let guard = self.cancelled.lock().unwrap_or_else(|e| e.into_inner());
        let mut guard = match timeout {
            Some(timeout) => {
                self.cv
                    .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
                    .unwrap_or_else(|e| e.into_inner())
                    .0
            }
            None => self
                .cv
                .wait_while(guard, |cancelled| !*cancelled)
                .unwrap_or_else(|e| e.into_inner()),
        };

        if std::mem::take(&mut *guard) {
            Wake::Cancelled
        } else {
            Wake::Elapsed
        }
    }

    fn cancel(&self) {
        *self.cancelled.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.cv.notify_all();
    }
}

/// Runs a callback at the earliest of a moving set of deadlines
pub struct PeriodicTimer<W: WaitPrimitive = CondvarWait> {
    primitive: W,
}

impl PeriodicTimer<CondvarWait> {
    pub fn new() -> Self {
        Self::with_primitive(CondvarWait::new())
    }
}

impl Default for PeriodicTimer<CondvarWait> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: WaitPrimitive> PeriodicTimer<W> {
    pub fn with_primitive(primitive: W) -> Self {
        Self { primitive }
    }

    /// Sleep for `delay_ns` (forever when `None`)
    ///
    /// A zero delay returns immediately without touching the primitive.
    pub fn wait(&self, delay_ns: Option<u64>) -> Wake {
        match delay_ns {
            Some(0) => Wake::Elapsed,
            Some(ns) => self.primitive.wait(Some(Duration::from_nanos(ns))),
            None => self.primitive.wait(None),
        }
    }

    /// Force the current wait to return early
    pub fn cancel(&self) {
        self.primitive.cancel();
    }

    /// Drive `on_tick` until `should_stop` returns true
    ///
    /// `next_delay` is asked for the time until the next deadline before
    /// every wait. `on_tick` runs once per elapsed wait; a cancelled wait only
    /// recomputes the deadline. Cancel after raising the stop condition to
    /// unblock the loop.
    pub fn run(
        &self,
        mut next_delay: impl FnMut() -> Option<u64>,
        mut on_tick: impl FnMut(),
        should_stop: impl Fn() -> bool,
    ) {
        while !should_stop() {
            if self.wait(next_delay()) == Wake::Elapsed && !should_stop() {
                on_tick();
            }
        }
    }
}
