//! Cooperative yield utilities
//!
//! A long region scan calls `tick()` once per iteration and hands control back
//! to the runtime whenever it returns true. `YieldTimer` reads the clock only
//! once every N ticks and retunes N so that N ticks take about the target
//! interval. `IntervalYielder` fires every fixed N ticks and never reads the
//! clock.

use std::time::{Duration, Instant};

const MAX_INTERVAL: u64 = 1_000_000;
const DEFAULT_SMOOTHING: f64 = 0.25;

pub trait Yielder: Send {
    /// Count one iteration; true when the caller should yield now
    fn tick(&mut self) -> bool;
}

/// Fires every `every` ticks
#[derive(Debug, Clone)]
pub struct IntervalYielder {
    every: u64,
    count: u64,
}

impl IntervalYielder {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            count: 0,
        }
    }
}

impl Yielder for IntervalYielder {
    fn tick(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.every {
            self.count = 0;
            true
        } else {
            false
        }
    }
}

/// Self-tuning time-based yielder
#[derive(Debug, Clone)]
pub struct YieldTimer {
    target: Duration,
    interval: u64,
    countdown: u64,
    smoothing: f64,
    last_sample: Instant,
    last_yield: Instant,
    clock_reads: u64,
}

impl YieldTimer {
    /// `smoothing` is the weight of each new estimate, in (0, 1]
    pub fn new(target: Duration, initial_interval: u64, smoothing: f64) -> Self {
        let interval = initial_interval.clamp(1, MAX_INTERVAL);
        let smoothing = if smoothing.is_finite() && smoothing > 0.0 && smoothing <= 1.0 {
            smoothing
        } else {
            DEFAULT_SMOOTHING
        };
        let now = Instant::now();

        Self {
            target,
            interval,
            countdown: interval,
            smoothing,
            last_sample: now,
            last_yield: now,
            clock_reads: 0,
        }
    }

    /// Current number of ticks between clock reads
    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn clock_reads(&self) -> u64 {
        self.clock_reads
    }

    fn tick_with<F: FnOnce() -> Instant>(&mut self, clock: F) -> bool {
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown > 0 {
            return false;
        }

        let now = clock();
        self.clock_reads += 1;

        let elapsed = now.saturating_duration_since(self.last_sample).as_secs_f64();
        let per_tick = elapsed / self.interval as f64;
        let ideal = if per_tick > 0.0 {
            self.target.as_secs_f64() / per_tick
        } else {
            // Clock did not move; sample less often
            self.interval as f64 * 2.0
        };

        let tuned = (1.0 - self.smoothing) * self.interval as f64 + self.smoothing * ideal;
        self.interval = (tuned.round() as u64).clamp(1, MAX_INTERVAL);
        self.countdown = self.interval;
        self.last_sample = now;

        if now.saturating_duration_since(self.last_yield) >= self.target {
            self.last_yield = now;
            true
        } else {
            false
        }
    }
}

impl Yielder for YieldTimer {
    fn tick(&mut self) -> bool {
        self.tick_with(Instant::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_yielder_is_periodic() {
        let mut yielder = IntervalYielder::new(3);
        let fired: Vec<bool> = (0..7).map(|_| yielder.tick()).collect();
        assert_eq!(fired, vec![false, false, true, false, false, true, false]);
    }

    #[test]
    fn test_zero_interval_means_every_tick() {
        let mut yielder = IntervalYielder::new(0);
        assert!(yielder.tick());
        assert!(yielder.tick());
    }

    #[test]
    fn test_timer_converges_toward_target() {
        // Simulated work: one microsecond per tick, 1ms target
        let mut timer = YieldTimer::new(Duration::from_millis(1), 10, 0.5);
        let start = timer.last_sample;
        let mut yields = 0;

        for tick in 1..=20_000u64 {
            if timer.tick_with(|| start + Duration::from_micros(tick)) {
                yields += 1;
            }
        }

        assert!(
            (900..=1100).contains(&timer.interval()),
            "interval {} did not settle near 1000",
            timer.interval()
        );
        assert!(timer.clock_reads() < 200, "clock read {} times", timer.clock_reads());
        assert!((10..=20).contains(&yields), "{} yields in 20ms", yields);
    }

    #[test]
    fn test_frozen_clock_grows_interval_and_never_zero() {
        let mut timer = YieldTimer::new(Duration::from_millis(1), 1, 1.0);
        let frozen = timer.last_sample;
        for _ in 0..100 {
            timer.tick_with(|| frozen);
            assert!(timer.interval() >= 1);
        }
        assert!(timer.interval() > 1);
    }

    #[test]
    fn test_invalid_smoothing_falls_back() {
        let timer = YieldTimer::new(Duration::from_millis(5), 0, f64::NAN);
        assert_eq!(timer.interval(), 1);
        assert_eq!(timer.smoothing, DEFAULT_SMOOTHING);
    }
}
