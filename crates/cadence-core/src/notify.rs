//! Guest event queues and mix notifications
//!
//! Guest code registers event queues by key to be told when a period has
//! been mixed. Each registration may ask for decimated delivery (every 2nd,
//! 4th or 8th period); the decimation phase is anchored at the period the
//! key was registered in, so consumers registered together stay in lockstep.
//!
//! Queues themselves are bounded `rtrb` rings: the audio threads push, the
//! emulated consumer pops. A full queue drops the event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{GuestError, GuestResult};

pub const EVENTFLAG_BEFOREMIX: u32 = 0x8000_0000;
pub const EVENTFLAG_NOMIX: u32 = 0x4000_0000;
pub const EVENTFLAG_HIGHPRIORITY: u32 = 0x2000_0000;
pub const EVENTFLAG_DECIMATE_4: u32 = 0x1000_0000;
pub const EVENTFLAG_DECIMATE_2: u32 = 0x0800_0000;

/// Flags accepted by the extended registration calls
pub const EVENTFLAG_MASK: u32 = !(u32::MAX >> 5);

/// Queue creation flag requesting an SPU-side queue
pub const CREATEEVENTFLAG_SPU: u32 = 0x0000_0001;

/// First key tried when creating a notify queue
pub const NOTIFY_KEY_BASE: u64 = 0x8000_4d49_4f32_3221;
/// Number of keys tried before giving up
pub const MAX_NOTIFY_QUEUES: u64 = 4;
/// Depth of queues created by the audio subsystem
pub const NOTIFY_QUEUE_DEPTH: usize = 8;

/// `data1` of an after-mix event
pub const AUDIO_EVENT_MIX: u64 = 0;
/// `data1` of a before-mix event
pub const AUDIO_EVENT_BEFORE_MIX: u64 = 1;

const EVENT_SOURCE_BASE: u64 = 0x0500_0000;
const EVENT_SOURCE_STEP: u64 = 0x100;
const EVENT_SOURCE_COUNT: u64 = 2048;

/// One event as delivered to guest code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestEvent {
    pub source: u64,
    pub data1: u64,
    pub data2: u64,
    pub data3: u64,
}

/// Sink for guest events
pub trait GuestEventQueue: Send + Sync {
    /// Deliver an event; gives it back when the queue is full
    fn send(&self, event: GuestEvent) -> Result<(), GuestEvent>;
}

/// Bounded SPSC event queue
pub struct RingEventQueue {
    producer: Mutex<rtrb::Producer<GuestEvent>>,
}

impl GuestEventQueue for RingEventQueue {
    fn send(&self, event: GuestEvent) -> Result<(), GuestEvent> {
        let mut producer = self.producer.lock().unwrap_or_else(|e| e.into_inner());
        producer.push(event).map_err(|rtrb::PushError::Full(event)| event)
    }
}

/// Consumer side of a [`RingEventQueue`]
pub struct EventReceiver {
    consumer: rtrb::Consumer<GuestEvent>,
}

impl EventReceiver {
    pub fn try_recv(&mut self) -> Option<GuestEvent> {
        self.consumer.pop().ok()
    }

    /// Pop everything currently queued
    pub fn drain(&mut self) -> Vec<GuestEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn len(&self) -> usize {
        self.consumer.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }
}

/// Create a bounded event queue
pub fn event_queue(depth: usize) -> (Arc<RingEventQueue>, EventReceiver) {
    let (producer, consumer) = rtrb::RingBuffer::new(depth);
    (
        Arc::new(RingEventQueue {
            producer: Mutex::new(producer),
        }),
        EventReceiver { consumer },
    )
}

/// Event queues known to the emulated system, by key
#[derive(Default)]
pub struct EventQueueTable {
    queues: Mutex<HashMap<u64, Arc<dyn GuestEventQueue>>>,
}

impl EventQueueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue; fails when the key is taken
    pub fn insert(&self, key: u64, queue: Arc<dyn GuestEventQueue>) -> bool {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if queues.contains_key(&key) {
            return false;
        }
        queues.insert(key, queue);
        true
    }

    pub fn find(&self, key: u64) -> Option<Arc<dyn GuestEventQueue>> {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.get(&key).cloned()
    }

    pub fn remove(&self, key: u64) -> Option<Arc<dyn GuestEventQueue>> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.remove(&key)
    }

    /// Create a queue under the first free notify key
    pub fn create_notify_queue(&self) -> GuestResult<(u64, EventReceiver)> {
        for i in 0..MAX_NOTIFY_QUEUES {
            let key = NOTIFY_KEY_BASE + i;
            let (queue, receiver) = event_queue(NOTIFY_QUEUE_DEPTH);
            if self.insert(key, queue) {
                return Ok((key, receiver));
            }
        }
        Err(GuestError::EventQueue)
    }
}

/// When in the period a notification fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyPhase {
    BeforeMix,
    AfterMix,
}

/// A registered notification consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyKey {
    pub key: u64,
    pub flags: u32,
    pub source: u64,
    /// Event period at registration time
    pub start_period: u64,
}

impl NotifyKey {
    /// Decimation factor requested by the flags
    pub fn periods(&self) -> u64 {
        let mut periods = 1;
        if self.flags & EVENTFLAG_DECIMATE_2 != 0 {
            periods *= 2;
        }
        if self.flags & EVENTFLAG_DECIMATE_4 != 0 {
            // both flags together give x8
            periods *= 4;
        }
        periods
    }

    fn is_due(&self, event_period: u64) -> bool {
        (event_period ^ self.start_period) & (self.periods() - 1) == 0
    }

    fn fires_in(&self, phase: NotifyPhase) -> bool {
        match phase {
            NotifyPhase::AfterMix => self.flags & EVENTFLAG_NOMIX == 0,
            NotifyPhase::BeforeMix => self.flags & EVENTFLAG_BEFOREMIX != 0,
        }
    }
}

/// Registered mix-notification consumers and the shared event period
#[derive(Debug)]
pub struct NotifyRegistry {
    keys: Vec<NotifyKey>,
    key_count: u64,
    event_period: u64,
    process_id: u32,
}

impl NotifyRegistry {
    pub fn new(process_id: u32) -> Self {
        Self {
            keys: Vec::new(),
            key_count: 0,
            event_period: 0,
            process_id,
        }
    }

    pub fn keys(&self) -> &[NotifyKey] {
        &self.keys
    }

    pub fn event_period(&self) -> u64 {
        self.event_period
    }

    /// Register `key` for notifications
    pub fn add(&mut self, key: u64, flags: u32, table: &EventQueueTable) -> GuestResult<u64> {
        if table.find(key).is_none() || self.keys.iter().any(|k| k.key == key) {
            return Err(GuestError::TransEvent);
        }

        let source = ((self.process_id as u64) << 32)
            + EVENT_SOURCE_BASE
            + self.key_count * EVENT_SOURCE_STEP;
        self.key_count = (self.key_count + 1) % EVENT_SOURCE_COUNT;

        self.keys.push(NotifyKey {
            key,
            flags,
            source,
            start_period: self.event_period,
        });
        log::debug!("Notify key 0x{:x} registered (flags=0x{:x}, source=0x{:x})", key, flags, source);
        Ok(source)
    }

    /// Unregister `key`; the flags must match the registration
    pub fn remove(&mut self, key: u64, flags: u32) -> GuestResult<()> {
        match self.keys.iter().position(|k| k.key == key) {
            Some(idx) if self.keys[idx].flags == flags => {
                self.keys.remove(idx);
                Ok(())
            }
            _ => Err(GuestError::TransEvent),
        }
    }

    /// Drop every registration and restart the period count
    pub fn clear(&mut self) {
        self.keys.clear();
        self.key_count = 0;
        self.event_period = 0;
    }

    /// Step into the next period
    pub fn advance_period(&mut self) {
        self.event_period += 1;
    }

    /// Consumers due in the current period for `phase`
    ///
    /// Before-mix targets are evaluated against the period about to be
    /// completed, so both phases of one period use the same decimation slot.
    pub fn targets(&self, phase: NotifyPhase, table: &EventQueueTable) -> Vec<(Arc<dyn GuestEventQueue>, u64)> {
        let period = match phase {
            NotifyPhase::BeforeMix => self.event_period + 1,
            NotifyPhase::AfterMix => self.event_period,
        };
        self.keys
            .iter()
            .filter(|k| k.fires_in(phase) && k.is_due(period))
            .filter_map(|k| table.find(k.key).map(|q| (q, k.source)))
            .collect()
    }
}

/// Deliver one event per target, outside of any lock
pub fn send_all(targets: Vec<(Arc<dyn GuestEventQueue>, u64)>, data1: u64) {
    for (queue, source) in targets {
        let event = GuestEvent {
            source,
            data1,
            data2: 0,
            data3: 0,
        };
        if queue.send(event).is_err() {
            log::trace!("Event queue full, dropped event for source 0x{:x}", source);
        }
    }
}
