//! Virtual hardware clock domains
//!
//! Each domain ticks once per block of its stream. Deadlines are kept as
//! exact rationals (tick index × bytes per tick / bytes per second) so long
//! sessions do not drift.

use std::fmt;

/// Tick backlog a domain may accumulate before it is resynchronized
pub const MAX_BURST_TICKS: u64 = 4;

const NS_PER_SEC: u128 = 1_000_000_000;

/// Independently clocked LLE stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerDomain {
    Serial = 0,
    Spdif0 = 1,
    Spdif1 = 2,
}

impl TimerDomain {
    pub const COUNT: usize = 3;
    pub const ALL: [TimerDomain; Self::COUNT] = [TimerDomain::Serial, TimerDomain::Spdif0, TimerDomain::Spdif1];

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TimerDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerDomain::Serial => write!(f, "serial"),
            TimerDomain::Spdif0 => write!(f, "spdif0"),
            TimerDomain::Spdif1 => write!(f, "spdif1"),
        }
    }
}

/// Tick duration as an exact ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRate {
    /// Bytes of one stream consumed per tick
    pub bytes_per_tick: u64,
    /// Bytes of one stream consumed per second
    pub bytes_per_sec: u64,
}

impl TickRate {
    /// Rate of a stereo stream of `sample_bytes`-wide samples
    pub fn stereo(bytes_per_tick: u64, sample_rate: u32, sample_bytes: u32) -> Self {
        Self {
            bytes_per_tick,
            bytes_per_sec: sample_rate as u64 * sample_bytes as u64 * 2,
        }
    }

    fn is_valid(&self) -> bool {
        self.bytes_per_tick != 0 && self.bytes_per_sec != 0
    }

    /// Start time of tick `tick` in ns
    pub fn deadline(&self, tick: u64) -> u64 {
        let ns = tick as u128 * self.bytes_per_tick as u128 * NS_PER_SEC / self.bytes_per_sec as u128;
        ns.min(u64::MAX as u128) as u64
    }

    /// Number of whole ticks elapsed at `now_ns`
    pub fn ticks_at(&self, now_ns: u64) -> u64 {
        let ticks = now_ns as u128 * self.bytes_per_sec as u128 / (self.bytes_per_tick as u128 * NS_PER_SEC);
        ticks.min(u64::MAX as u128) as u64
    }

    /// Tick duration in ns, rounded down
    pub fn period_ns(&self) -> u64 {
        self.deadline(1)
    }
}

#[derive(Debug, Clone, Copy)]
struct VirtualTimer {
    active: bool,
    rate: Option<TickRate>,
    /// Index of the next tick to be served
    tick: u64,
}

impl VirtualTimer {
    const fn new() -> Self {
        Self {
            active: false,
            rate: None,
            tick: 0,
        }
    }
}

/// Fixed set of virtual clock domains
#[derive(Debug, Clone)]
pub struct VirtualTimerPool {
    timers: [VirtualTimer; TimerDomain::COUNT],
}

impl VirtualTimerPool {
    pub fn new() -> Self {
        Self {
            timers: [VirtualTimer::new(); TimerDomain::COUNT],
        }
    }

    /// Activate `domain` at `rate`
    ///
    /// A domain that was inactive or changes rate is resynchronized to the
    /// first tick after `now_ns`; otherwise its counter carries on.
    pub fn enable(&mut self, domain: TimerDomain, rate: TickRate, now_ns: u64) {
        if !rate.is_valid() {
            log::warn!("Ignoring zero tick rate for {} domain", domain);
            return;
        }

        let timer = &mut self.timers[domain.index()];
        let resync = !timer.active || timer.rate != Some(rate);
        timer.rate = Some(rate);
        timer.active = true;
        if resync {
            timer.tick = rate.ticks_at(now_ns) + 1;
        }
    }

    /// Deactivate `domain`, keeping its counter
    pub fn disable(&mut self, domain: TimerDomain) {
        self.timers[domain.index()].active = false;
    }

    pub fn is_active(&self, domain: TimerDomain) -> bool {
        self.timers[domain.index()].active
    }

    /// Deadline of the next tick of an active domain
    pub fn deadline(&self, domain: TimerDomain) -> Option<u64> {
        let timer = &self.timers[domain.index()];
        match (timer.active, timer.rate) {
            (true, Some(rate)) => Some(rate.deadline(timer.tick)),
            _ => None,
        }
    }

    /// Tick counter of `domain`
    pub fn tick(&self, domain: TimerDomain) -> u64 {
        self.timers[domain.index()].tick
    }

    /// Whether the next deadline of `domain` has passed
    pub fn is_behind(&self, domain: TimerDomain, now_ns: u64) -> bool {
        self.deadline(domain).is_some_and(|d| d <= now_ns)
    }

    /// Deadlines of `domain` that have passed and not been served
    pub fn pending(&self, domain: TimerDomain, now_ns: u64) -> u64 {
        let timer = &self.timers[domain.index()];
        match (timer.active, timer.rate) {
            (true, Some(rate)) => (rate.ticks_at(now_ns) + 1).saturating_sub(timer.tick),
            _ => 0,
        }
    }

    /// Resynchronize to the first tick after `now_ns` without serving anything
    pub fn skip_to_now(&mut self, domain: TimerDomain, now_ns: u64) {
        let timer = &mut self.timers[domain.index()];
        if let Some(rate) = timer.rate {
            timer.tick = rate.ticks_at(now_ns) + 1;
        }
    }

    /// Mark one tick served
    ///
    /// When the remaining backlog exceeds [`MAX_BURST_TICKS`] the domain is
    /// resynchronized instead of being allowed to burst through it.
    pub fn increment(&mut self, domain: TimerDomain, now_ns: u64) {
        self.timers[domain.index()].tick += 1;
        let backlog = self.pending(domain, now_ns);
        if backlog > MAX_BURST_TICKS {
            log::debug!("{} domain {} ticks behind, resyncing", domain, backlog);
            self.skip_to_now(domain, now_ns);
        }
    }

    /// Time until the earliest deadline of any active domain
    ///
    /// `Some(0)` when a deadline has already passed, `None` when nothing is
    /// active.
    pub fn next_deadline_in(&self, now_ns: u64) -> Option<u64> {
        TimerDomain::ALL
            .iter()
            .filter_map(|&d| self.deadline(d))
            .map(|deadline| deadline.saturating_sub(now_ns))
            .min()
    }
}

impl Default for VirtualTimerPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 0x400 bytes per tick at 48kHz/16-bit stereo: 5.333ms
    fn rate_48k() -> TickRate {
        TickRate::stereo(0x400, 48000, 2)
    }

    #[test]
    fn test_deadlines_are_exact() {
        let rate = rate_48k();
        assert_eq!(rate.deadline(3), 16_000_000);
        assert_eq!(rate.ticks_at(16_000_000), 3);
        assert_eq!(rate.ticks_at(15_999_999), 2);
    }

    #[test]
    fn test_enable_resyncs_to_next_tick() {
        let mut pool = VirtualTimerPool::new();
        pool.enable(TimerDomain::Serial, rate_48k(), 100_000_000);
        // floor(100ms / 5.333ms) + 1 = 19
        assert_eq!(pool.tick(TimerDomain::Serial), 19);
        assert!(!pool.is_behind(TimerDomain::Serial, 100_000_000));
        assert!(pool.is_behind(TimerDomain::Serial, 101_333_334));
    }

    #[test]
    fn test_reenable_same_rate_keeps_counter() {
        let mut pool = VirtualTimerPool::new();
        pool.enable(TimerDomain::Spdif0, rate_48k(), 0);
        pool.increment(TimerDomain::Spdif0, 6_000_000);
        let tick = pool.tick(TimerDomain::Spdif0);
        pool.enable(TimerDomain::Spdif0, rate_48k(), 7_000_000);
        assert_eq!(pool.tick(TimerDomain::Spdif0), tick);
    }

    #[test]
    fn test_disable_then_enable_resyncs() {
        let mut pool = VirtualTimerPool::new();
        pool.enable(TimerDomain::Spdif1, rate_48k(), 0);
        pool.disable(TimerDomain::Spdif1);
        assert_eq!(pool.next_deadline_in(0), None);
        pool.enable(TimerDomain::Spdif1, rate_48k(), 1_000_000_000);
        assert_eq!(pool.pending(TimerDomain::Spdif1, 1_000_000_000), 0);
    }

    #[test]
    fn test_rate_change_resyncs() {
        let mut pool = VirtualTimerPool::new();
        pool.enable(TimerDomain::Serial, rate_48k(), 0);
        let faster = TickRate::stereo(0x400, 96000, 2);
        pool.enable(TimerDomain::Serial, faster, 50_000_000);
        assert_eq!(pool.tick(TimerDomain::Serial), faster.ticks_at(50_000_000) + 1);
    }

    #[test]
    fn test_catch_up_is_bounded() {
        let mut pool = VirtualTimerPool::new();
        pool.enable(TimerDomain::Serial, rate_48k(), 0);

        // ten second stall
        let now = 10_000_000_000;
        assert!(pool.pending(TimerDomain::Serial, now) > MAX_BURST_TICKS);

        let mut served = 0;
        while pool.is_behind(TimerDomain::Serial, now) {
            pool.increment(TimerDomain::Serial, now);
            served += 1;
            assert!(pool.pending(TimerDomain::Serial, now) <= MAX_BURST_TICKS);
        }
        assert!(served <= MAX_BURST_TICKS + 1);
    }

    #[test]
    fn test_next_deadline_picks_minimum() {
        let mut pool = VirtualTimerPool::new();
        assert_eq!(pool.next_deadline_in(0), None);

        pool.enable(TimerDomain::Serial, rate_48k(), 0);
        pool.enable(TimerDomain::Spdif0, TickRate::stereo(0x400, 24000, 2), 0);
        assert_eq!(pool.next_deadline_in(1_000_000), Some(5_333_333 - 1_000_000));
        assert_eq!(pool.next_deadline_in(6_000_000), Some(0));
    }

    #[test]
    fn test_skip_to_now_serves_nothing() {
        let mut pool = VirtualTimerPool::new();
        pool.enable(TimerDomain::Serial, rate_48k(), 0);
        pool.skip_to_now(TimerDomain::Serial, 20_000_000);
        assert_eq!(pool.pending(TimerDomain::Serial, 20_000_000), 0);
        assert!(!pool.is_behind(TimerDomain::Serial, 20_000_000));
    }
}
