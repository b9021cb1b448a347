//! # Loop Profiling
//!
//! The scheduler records one [`IterationTiming`] per loop iteration into a
//! [`ProfileAccumulator`], and every `profile_interval` iterations sends the
//! aggregate as a [`ProfileSample`] on its outbound channel.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timings of one scheduler iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IterationTiming {
    /// Dispatch, ticks and render together. Excludes the idle sleep.
    pub loop_time: Duration,
    /// Time spent inside `Core::tick`, summed over this iteration's ticks.
    pub tick_time: Duration,
    /// Ticks executed.
    pub ticks: u32,
    /// Time spent rendering.
    pub render_time: Duration,
}

/// Aggregate over a run of iterations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSample {
    /// Iterations aggregated.
    pub iterations: u64,
    /// Ticks executed across those iterations.
    pub ticks: u64,
    /// Mean iteration time in microseconds.
    pub mean_loop_us: f64,
    /// Mean time per tick in microseconds.
    pub mean_tick_us: f64,
    /// Mean render time in microseconds.
    pub mean_render_us: f64,
    /// Slowest iteration in microseconds.
    pub max_loop_us: u64,
    /// Iterations whose loop time exceeded the frame budget.
    pub over_budget: u64,
}

impl ProfileSample {
    /// Fraction of iterations over budget.
    #[must_use]
    pub fn over_budget_ratio(&self) -> f64 {
        if self.iterations == 0 {
            return 0.0;
        }
        self.over_budget as f64 / self.iterations as f64
    }
}

impl fmt::Display for ProfileSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} iterations, {} ticks | loop {:.1}us (max {}us) | tick {:.1}us | render {:.1}us | over budget {:.1}%",
            self.iterations,
            self.ticks,
            self.mean_loop_us,
            self.max_loop_us,
            self.mean_tick_us,
            self.mean_render_us,
            self.over_budget_ratio() * 100.0,
        )
    }
}

/// Running sums for the current profiling window.
#[derive(Debug, Clone)]
pub struct ProfileAccumulator {
    budget_us: u64,
    iterations: u64,
    ticks: u64,
    loop_us_sum: u64,
    tick_us_sum: u64,
    render_us_sum: u64,
    max_loop_us: u64,
    over_budget: u64,
}

#[inline]
fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl ProfileAccumulator {
    /// Creates an empty window judged against `frame_budget`.
    #[must_use]
    pub fn new(frame_budget: Duration) -> Self {
        Self {
            budget_us: micros(frame_budget),
            iterations: 0,
            ticks: 0,
            loop_us_sum: 0,
            tick_us_sum: 0,
            render_us_sum: 0,
            max_loop_us: 0,
            over_budget: 0,
        }
    }

    /// Adds one iteration.
    pub fn record(&mut self, timing: IterationTiming) {
        let loop_us = micros(timing.loop_time);
        self.iterations += 1;
        self.ticks += u64::from(timing.ticks);
        self.loop_us_sum = self.loop_us_sum.saturating_add(loop_us);
        self.tick_us_sum = self.tick_us_sum.saturating_add(micros(timing.tick_time));
        self.render_us_sum = self.render_us_sum.saturating_add(micros(timing.render_time));
        self.max_loop_us = self.max_loop_us.max(loop_us);
        if loop_us > self.budget_us {
            self.over_budget += 1;
        }
    }

    /// Iterations recorded in the current window.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Returns the window's aggregate and starts a new window.
    pub fn take_sample(&mut self) -> ProfileSample {
        let per = |sum: u64, count: u64| if count == 0 { 0.0 } else { sum as f64 / count as f64 };
        let sample = ProfileSample {
            iterations: self.iterations,
            ticks: self.ticks,
            mean_loop_us: per(self.loop_us_sum, self.iterations),
            mean_tick_us: per(self.tick_us_sum, self.ticks),
            mean_render_us: per(self.render_us_sum, self.iterations),
            max_loop_us: self.max_loop_us,
            over_budget: self.over_budget,
        };
        *self = Self {
            budget_us: self.budget_us,
            ..Self::new(Duration::ZERO)
        };
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(loop_ms: u64, ticks: u32) -> IterationTiming {
        IterationTiming {
            loop_time: Duration::from_millis(loop_ms),
            tick_time: Duration::from_millis(loop_ms / 2),
            ticks,
            render_time: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_sample_means() {
        let mut acc = ProfileAccumulator::new(Duration::from_millis(16));
        acc.record(timing(10, 2));
        acc.record(timing(20, 0));
        assert_eq!(acc.iterations(), 2);

        let sample = acc.take_sample();
        assert_eq!(sample.iterations, 2);
        assert_eq!(sample.ticks, 2);
        assert!((sample.mean_loop_us - 15_000.0).abs() < f64::EPSILON);
        assert!((sample.mean_tick_us - 7_500.0).abs() < f64::EPSILON);
        assert!((sample.mean_render_us - 1_000.0).abs() < f64::EPSILON);
        assert_eq!(sample.max_loop_us, 20_000);
        assert_eq!(sample.over_budget, 1);
        assert!((sample.over_budget_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_take_sample_resets_window() {
        let mut acc = ProfileAccumulator::new(Duration::from_millis(1));
        acc.record(timing(5, 1));
        acc.take_sample();

        let empty = acc.take_sample();
        assert_eq!(empty, ProfileSample::default());

        acc.record(timing(5, 1));
        assert_eq!(acc.take_sample().over_budget, 1);
    }
}
