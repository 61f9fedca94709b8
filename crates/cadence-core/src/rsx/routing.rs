//! AV port routing
//!
//! Decides which clock domain backs each AV port and which source channel
//! lands on each of the port's output channels.
//!
//! | AV port  | possible sources                          |
//! |----------|-------------------------------------------|
//! | AV multi | serial ch 0/1                             |
//! | HDMI n   | serial (2/6/8 ch), S/PDIF 0, S/PDIF 1     |
//! | S/PDIF n | own S/PDIF domain, serial ch 0/1          |
//!
//! Serial channels are ordered FL FR C LFE SL SR BL BR, one stereo stream
//! per pair.

use crate::timer::TimerDomain;
use crate::types::{AvPort, MAX_OUTPUT_CHANNELS};

/// Channels a serial block carries
pub const SERIAL_CHANNELS: usize = 8;
/// Channels an S/PDIF block carries
pub const SPDIF_CHANNELS: usize = 2;

/// Source channel (or silence) of every output channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap {
    channels: usize,
    slots: [Option<u8>; MAX_OUTPUT_CHANNELS],
}

impl ChannelMap {
    /// Output channel `n` takes source channel `n`
    pub fn identity(channels: usize) -> Self {
        let channels = channels.min(MAX_OUTPUT_CHANNELS);
        let mut slots = [None; MAX_OUTPUT_CHANNELS];
        for (n, slot) in slots.iter_mut().enumerate().take(channels) {
            *slot = Some(n as u8);
        }
        Self { channels, slots }
    }

    /// Stereo source widened to `channels`, the rest silent
    pub fn stereo_into(channels: usize) -> Self {
        let mut map = Self::identity(channels);
        for slot in map.slots.iter_mut().skip(2) {
            *slot = None;
        }
        map
    }

    /// Map from explicit slots; extra slots are ignored
    pub fn from_slots(slots: &[Option<u8>]) -> Self {
        let channels = slots.len().min(MAX_OUTPUT_CHANNELS);
        let mut map = [None; MAX_OUTPUT_CHANNELS];
        map[..channels].copy_from_slice(&slots[..channels]);
        Self { channels, slots: map }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn slots(&self) -> &[Option<u8>] {
        &self.slots[..self.channels]
    }

    /// Remap interleaved `input` frames into `out`
    ///
    /// Slots naming a channel the input lacks are silent.
    pub fn apply(&self, input: &[f32], in_channels: usize, out: &mut Vec<f32>) {
        let frames = input.len() / in_channels.max(1);
        out.clear();
        out.resize(frames * self.channels, 0.0);
        if in_channels == 0 {
            return;
        }

        for (frame_in, frame_out) in input.chunks_exact(in_channels).zip(out.chunks_exact_mut(self.channels)) {
            for (dst, slot) in frame_out.iter_mut().zip(self.slots()) {
                *dst = match slot {
                    Some(src) => frame_in.get(*src as usize).copied().unwrap_or(0.0),
                    None => 0.0,
                };
            }
        }
    }
}

/// Domain and channel map behind one AV port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvRoute {
    pub domain: TimerDomain,
    pub map: ChannelMap,
}

/// Routes of every AV port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    routes: [AvRoute; AvPort::ALL.len()],
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let serial_stereo = AvRoute {
            domain: TimerDomain::Serial,
            map: ChannelMap::identity(2),
        };
        Self {
            routes: [
                serial_stereo,
                serial_stereo,
                serial_stereo,
                AvRoute {
                    domain: TimerDomain::Spdif0,
                    map: ChannelMap::identity(2),
                },
                AvRoute {
                    domain: TimerDomain::Spdif1,
                    map: ChannelMap::identity(2),
                },
            ],
        }
    }
}

impl RoutingConfig {
    pub fn route(&self, port: AvPort) -> &AvRoute {
        &self.routes[port.index()]
    }

    /// Source an HDMI port from `domain`
    ///
    /// `channels` (2, 6 or 8) is the HDMI output width. S/PDIF sources only
    /// fill the front pair. Returns false for ports that are not HDMI.
    pub fn set_hdmi(&mut self, port: AvPort, domain: TimerDomain, channels: usize) -> bool {
        if !matches!(port, AvPort::Hdmi0 | AvPort::Hdmi1) || !matches!(channels, 2 | 6 | 8) {
            return false;
        }
        let map = match domain {
            TimerDomain::Serial => ChannelMap::identity(channels),
            TimerDomain::Spdif0 | TimerDomain::Spdif1 => ChannelMap::stereo_into(channels),
        };
        self.routes[port.index()] = AvRoute { domain, map };
        true
    }

    /// Replace the channel map of an HDMI port, keeping its source
    pub fn set_hdmi_map(&mut self, port: AvPort, map: ChannelMap) -> bool {
        if !matches!(port, AvPort::Hdmi0 | AvPort::Hdmi1) || !matches!(map.channels(), 2 | 6 | 8) {
            return false;
        }
        self.routes[port.index()].map = map;
        true
    }

    /// Feed an S/PDIF port from its own domain or from serial ch 0/1
    pub fn set_spdif(&mut self, port: AvPort, from_serial: bool) -> bool {
        let own = match port {
            AvPort::Spdif0 => TimerDomain::Spdif0,
            AvPort::Spdif1 => TimerDomain::Spdif1,
            _ => return false,
        };
        self.routes[port.index()] = AvRoute {
            domain: if from_serial { TimerDomain::Serial } else { own },
            map: ChannelMap::identity(2),
        };
        true
    }

    /// AV ports currently fed by `domain`
    pub fn ports_for(&self, domain: TimerDomain) -> impl Iterator<Item = AvPort> + '_ {
        AvPort::ALL.into_iter().filter(move |p| self.routes[p.index()].domain == domain)
    }
}

/// Channels of a block from `domain`
pub fn domain_channels(domain: TimerDomain) -> usize {
    match domain {
        TimerDomain::Serial => SERIAL_CHANNELS,
        TimerDomain::Spdif0 | TimerDomain::Spdif1 => SPDIF_CHANNELS,
    }
}
