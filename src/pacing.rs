//! Frame pacing: "run again before the next display refresh".

use std::time::{Duration, Instant};

pub const DEFAULT_REFRESH_HZ: u32 = 60;

pub trait FramePacer {
    /// Block until the next tick should run.
    fn wait_next_frame(&mut self);
}

/// Sleeps to a fixed refresh rate.
///
/// Deadlines advance by whole frame periods. When a tick overruns, the
/// pacer skips ahead instead of firing a burst of catch-up ticks.
#[derive(Debug)]
pub struct IntervalPacer {
    period: Duration,
    next_deadline: Option<Instant>,
}

impl IntervalPacer {
    pub fn from_hz(hz: u32) -> Self {
        let hz = hz.max(1);
        Self {
            period: Duration::from_secs(1) / hz,
            next_deadline: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Default for IntervalPacer {
    fn default() -> Self {
        Self::from_hz(DEFAULT_REFRESH_HZ)
    }
}

impl FramePacer for IntervalPacer {
    fn wait_next_frame(&mut self) {
        let now = Instant::now();
        let deadline = match self.next_deadline {
            Some(deadline) if deadline > now => deadline,
            _ => now + self.period,
        };
        std::thread::sleep(deadline.saturating_duration_since(now));
        self.next_deadline = Some(deadline + self.period);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_follows_refresh_rate() {
        assert_eq!(IntervalPacer::from_hz(50).period(), Duration::from_millis(20));
        assert_eq!(IntervalPacer::from_hz(0).period(), Duration::from_secs(1));
        assert_eq!(
            IntervalPacer::default().period(),
            Duration::from_secs(1) / 60
        );
    }

    #[test]
    fn pacer_waits_at_least_one_period_per_frame() {
        let mut pacer = IntervalPacer::from_hz(200);
        let started = Instant::now();
        for _ in 0..3 {
            pacer.wait_next_frame();
        }
        assert!(started.elapsed() >= Duration::from_millis(15));
    }
}
