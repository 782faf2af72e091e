//! Real-time pacing of the virtual clock.
//!
//! In paced mode the dispatcher must not let virtual time run ahead of
//! `wall_time × speed`. The pacer computes the target virtual time from
//! elapsed wall clock, hands out bounded sleep slices (≤ 10 ms, so the
//! dispatcher stays responsive to its channels), tracks drift, and
//! rate-limits lag warnings when the simulation cannot keep up.

use std::time::{Duration, Instant};

use otsim_common::SimTime;

/// Speeds at or above this run unpaced ("as fast as possible").
pub const MAX_SIMULATE_SPEED: f64 = 1_000_000.0;

/// Longest single sleep the pacer will request.
pub const MAX_SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Configuration for real-time pacing.
#[derive(Debug, Clone)]
pub struct PacerConfig {
    /// Virtual microseconds per wall microsecond (1.0 = real time).
    pub speed: f64,
    /// Warn when the simulation lags the wall clock by more than this.
    pub max_lag: Duration,
    /// Minimum spacing of lag warnings.
    pub lag_warn_interval: Duration,
    /// Spacing of periodic stats output; `None` disables them.
    pub periodic_stats_interval: Option<Duration>,
}

impl Default for PacerConfig {
    fn default() -> Self {
        PacerConfig {
            speed: 1.0,
            max_lag: Duration::from_millis(100),
            lag_warn_interval: Duration::from_secs(5),
            periodic_stats_interval: Some(Duration::from_secs(10)),
        }
    }
}

impl PacerConfig {
    /// Config at the given speed.
    pub fn with_speed(speed: f64) -> Self {
        assert!(speed > 0.0, "simulation speed must be positive");
        PacerConfig {
            speed,
            ..Default::default()
        }
    }
}

/// Tracks wall time against virtual time and paces the dispatcher.
#[derive(Debug)]
pub struct RealTimePacer {
    config: PacerConfig,
    start_wall: Instant,
    start_sim: SimTime,
    last_lag_warn: Instant,
    total_lag_warnings: u64,
    max_lag_seen: Duration,
    last_periodic_stats: Instant,
    last_periodic_event_count: u64,
}

impl RealTimePacer {
    /// Start pacing at `start_sim` virtual time.
    pub fn new(config: PacerConfig, start_sim: SimTime) -> Self {
        let now = Instant::now();
        RealTimePacer {
            config,
            start_wall: now,
            start_sim,
            last_lag_warn: now,
            total_lag_warnings: 0,
            max_lag_seen: Duration::ZERO,
            last_periodic_stats: now,
            last_periodic_event_count: 0,
        }
    }

    /// Whether this pacer is effectively unpaced.
    pub fn unpaced(&self) -> bool {
        self.config.speed >= MAX_SIMULATE_SPEED
    }

    /// Change speed, re-anchoring at the current virtual time so the new
    /// ratio applies from now on.
    pub fn set_speed(&mut self, speed: f64, current_sim: SimTime) {
        assert!(speed > 0.0, "simulation speed must be positive");
        self.config.speed = speed;
        self.start_wall = Instant::now();
        self.start_sim = current_sim;
    }

    /// Current speed.
    pub fn speed(&self) -> f64 {
        self.config.speed
    }

    /// The virtual time the wall clock has "reached".
    pub fn target_sim_time(&self) -> SimTime {
        if self.unpaced() {
            return SimTime::EVER;
        }
        let elapsed = self.start_wall.elapsed();
        let scaled_us = (elapsed.as_micros() as f64 * self.config.speed) as u64;
        self.start_sim.saturating_add_micros(scaled_us)
    }

    /// How long to sleep before processing an event at `next_event_time`.
    ///
    /// Returns `None` when the event is already due. The slice is capped at
    /// [`MAX_SLEEP_SLICE`]; callers loop, re-checking their channels
    /// between slices.
    pub fn sleep_slice(&self, next_event_time: SimTime) -> Option<Duration> {
        if self.unpaced() {
            return None;
        }
        let target = self.target_sim_time();
        if next_event_time <= target {
            return None;
        }
        let ahead_us = next_event_time.as_micros() - target.as_micros();
        let wall_us = (ahead_us as f64 / self.config.speed) as u64;
        Some(Duration::from_micros(wall_us).min(MAX_SLEEP_SLICE))
    }

    /// Check whether the simulation lags enough to warn about. Returns the
    /// lag when a (rate-limited) warning should be issued.
    pub fn check_lag_warning(&mut self, current_sim: SimTime) -> Option<Duration> {
        if self.unpaced() {
            return None;
        }
        let target = self.target_sim_time();
        if current_sim >= target {
            return None;
        }
        let lag_us = target.as_micros() - current_sim.as_micros();
        let lag = Duration::from_micros((lag_us as f64 / self.config.speed) as u64);
        if lag > self.max_lag_seen {
            self.max_lag_seen = lag;
        }
        if lag > self.config.max_lag {
            let now = Instant::now();
            if now.duration_since(self.last_lag_warn) >= self.config.lag_warn_interval {
                self.last_lag_warn = now;
                self.total_lag_warnings += 1;
                return Some(lag);
            }
        }
        None
    }

    /// Emit periodic throughput stats when the interval elapsed.
    pub fn check_periodic_stats(
        &mut self,
        current_sim: SimTime,
        total_events: u64,
    ) -> Option<PeriodicStats> {
        let interval = self.config.periodic_stats_interval?;
        let now = Instant::now();
        let since_last = now.duration_since(self.last_periodic_stats);
        if since_last < interval {
            return None;
        }

        let wall_elapsed = self.start_wall.elapsed();
        let sim_elapsed_us = current_sim.as_micros().saturating_sub(self.start_sim.as_micros());
        let ratio = if wall_elapsed.as_secs_f64() > 0.0 {
            (sim_elapsed_us as f64 / 1_000_000.0) / wall_elapsed.as_secs_f64()
        } else {
            0.0
        };
        let events_since = total_events.saturating_sub(self.last_periodic_event_count);
        let event_rate = events_since as f64 / since_last.as_secs_f64();
        let memory_bytes = memory_stats::memory_stats()
            .map(|stats| stats.physical_mem)
            .unwrap_or(0);

        self.last_periodic_stats = now;
        self.last_periodic_event_count = total_events;

        Some(PeriodicStats {
            sim_time: current_sim,
            wall_elapsed,
            sim_to_realtime_ratio: ratio,
            total_events,
            event_rate,
            memory_bytes,
        })
    }

    /// Summary of the pacing session.
    pub fn stats(&self) -> PacerStats {
        PacerStats {
            elapsed_wall: self.start_wall.elapsed(),
            total_lag_warnings: self.total_lag_warnings,
            max_lag_seen: self.max_lag_seen,
            speed: self.config.speed,
        }
    }
}

/// End-of-run pacing summary.
#[derive(Debug, Clone)]
pub struct PacerStats {
    /// Wall time elapsed since pacing started.
    pub elapsed_wall: Duration,
    /// Lag warnings issued.
    pub total_lag_warnings: u64,
    /// Worst lag observed.
    pub max_lag_seen: Duration,
    /// Final speed setting.
    pub speed: f64,
}

/// Periodic throughput sample.
#[derive(Debug, Clone)]
pub struct PeriodicStats {
    /// Current virtual time.
    pub sim_time: SimTime,
    /// Wall time since pacing started.
    pub wall_elapsed: Duration,
    /// Virtual seconds per wall second achieved.
    pub sim_to_realtime_ratio: f64,
    /// Cumulative processed event count.
    pub total_events: u64,
    /// Events per wall second over the last interval.
    pub event_rate: f64,
    /// Resident memory, bytes.
    pub memory_bytes: usize,
}
