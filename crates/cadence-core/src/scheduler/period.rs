//! Adaptive period and time-stretch control
//!
//! Pure functions of the configuration and the measured backlog so they can
//! be tested without a clock.

use crate::config::AudioConfig;

/// Lowest average-fill ratio used when widening the target backlog
pub const MIN_AVERAGE_PLAYTIME_RATIO: f32 = 0.25;

/// Target backlog in µs, widened while the rolling average runs low
pub fn desired_duration_adjusted(cfg: &AudioConfig, average_playtime: f32) -> f32 {
    let average_ratio = average_playtime / cfg.block_period as f32;
    let desired = cfg.desired_buffer_duration as f32 + cfg.block_period as f32 / 2.0;
    if average_ratio < 1.0 {
        desired / average_ratio.max(MIN_AVERAGE_PLAYTIME_RATIO)
    } else {
        desired
    }
}

/// Length of the next period in µs
///
/// Shorter than nominal while the output is under-filled (quadratic in the
/// fill rate), longer while it is over-filled (tending to the maximum as the
/// backlog grows). Not playing always yields the nominal period.
pub fn dynamic_period(cfg: &AudioConfig, enqueued_playtime: u64, desired_adjusted: f32, playing: bool) -> u64 {
    if !playing {
        return cfg.block_period;
    }

    let rate = if desired_adjusted > 0.0 {
        enqueued_playtime as f32 / desired_adjusted
    } else {
        f32::INFINITY
    };

    let period = if rate >= 1.0 {
        let multiplier = 1.0 / rate;
        cfg.maximum_block_period
            - ((cfg.maximum_block_period - cfg.block_period) as f32 * multiplier) as u64
    } else {
        let multiplier = rate * rate;
        cfg.minimum_block_period + ((cfg.block_period - cfg.minimum_block_period) as f32 * multiplier) as u64
    };

    period.clamp(cfg.minimum_block_period, cfg.maximum_block_period)
}

/// Next frequency ratio for a buffer at `fill_rate` of its target
///
/// Below the threshold the ratio follows the normalized fill level, but only
/// moves once the request differs from `current` by more than `step`. At or
/// above the threshold it snaps back to 1.0.
pub fn stretch_ratio(fill_rate: f32, current: f32, threshold: f32, scale: f32, step: f32) -> f32 {
    if fill_rate < threshold {
        let request = (fill_rate / threshold) * scale;
        if (current - request).abs() > step {
            request
        } else {
            current
        }
    } else {
        1.0
    }
}
