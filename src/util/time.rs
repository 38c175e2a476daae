//! Time utilities for the match simulation

use std::time::{Duration, Instant};

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Default simulation rate, matching the 60 Hz loop clients render against
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Fixed simulation step (in seconds) for a tick rate
pub fn tick_delta(tick_rate: u32) -> f32 {
    1.0 / tick_rate.max(1) as f32
}

/// Wall-clock duration of one tick
pub fn tick_duration(tick_rate: u32) -> Duration {
    Duration::from_micros(1_000_000 / tick_rate.max(1) as u64)
}

/// Number of whole ticks covering `duration` (rounded up, at least one)
pub fn ticks_for(duration: Duration, tick_rate: u32) -> u32 {
    let ticks = (duration.as_secs_f64() * tick_rate.max(1) as f64).ceil() as u32;
    ticks.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_helpers_agree() {
        assert_eq!(tick_duration(60), Duration::from_micros(16_666));
        assert!((tick_delta(60) - 1.0 / 60.0).abs() < f32::EPSILON);
        assert_eq!(ticks_for(Duration::from_secs(3), 60), 180);
        assert_eq!(ticks_for(Duration::from_millis(10), 60), 1);
        assert_eq!(ticks_for(Duration::ZERO, 60), 1);
    }
}
