//! Stochastic per-node failure generation.
//!
//! A configured node alternates between working and failed states. Failures
//! last a fixed `fail_duration`; the gaps between them are drawn so that
//! over a long run the node spends `fail_duration / fail_interval` of its
//! time failed. Draws come from the dedicated fail-time random stream, so
//! failure scheduling does not perturb any other randomness in the run.

use otsim_common::{rng, SimTime};
use serde::{Deserialize, Serialize};

/// Failure timing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FailTime {
    /// How long each induced failure lasts, microseconds.
    pub fail_duration_us: u64,
    /// Mean spacing of failure cycle starts, microseconds.
    pub fail_interval_us: u64,
}

impl FailTime {
    /// A configuration that never fails.
    pub const NONE: FailTime = FailTime {
        fail_duration_us: 0,
        fail_interval_us: 0,
    };

    /// Whether this configuration can produce failures at all.
    pub fn can_fail(&self) -> bool {
        self.fail_duration_us > 0 && self.fail_interval_us > self.fail_duration_us
    }
}

/// What a time advance did to the node's failure state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    /// Nothing changed.
    None,
    /// The node just failed; the caller must run its fail edge.
    Failed,
    /// The node just recovered; the caller must run its recover edge.
    Recovered,
}

/// Bernoulli-style fail/recover generator for one node.
#[derive(Debug, Clone)]
pub struct FailureController {
    cfg: FailTime,
    failed: bool,
    recover_ts: SimTime,
    fail_ts: SimTime,
    /// Residual of the current inter-failure span, microseconds.
    remain_us: u64,
    prev_op_ts: SimTime,
}

impl FailureController {
    /// Create a controller with the given configuration.
    pub fn new(cfg: FailTime) -> Self {
        FailureController {
            cfg,
            failed: false,
            recover_ts: SimTime::ZERO,
            fail_ts: SimTime::ZERO,
            remain_us: 0,
            prev_op_ts: SimTime::ZERO,
        }
    }

    /// Current configuration.
    pub fn fail_time(&self) -> FailTime {
        self.cfg
    }

    /// Whether the node is currently in the failed state.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Replace the configuration, resetting all scheduling state.
    ///
    /// If the new configuration cannot fail and the node is currently
    /// failed, it recovers immediately and the caller must run the recover
    /// edge.
    pub fn set_fail_time(&mut self, cfg: FailTime) -> FailureTransition {
        self.cfg = cfg;
        self.recover_ts = SimTime::ZERO;
        self.fail_ts = SimTime::ZERO;
        self.remain_us = 0;
        if !cfg.can_fail() && self.failed {
            self.failed = false;
            return FailureTransition::Recovered;
        }
        FailureTransition::None
    }

    /// Advance the controller to `cur` virtual time.
    ///
    /// Returns the state transition (if any) and the next time the caller
    /// should make sure this controller runs again; [`SimTime::EVER`] when
    /// no failure is ever pending.
    pub fn on_time_advanced(&mut self, cur: SimTime) -> (FailureTransition, SimTime) {
        self.prev_op_ts = cur;
        if !self.cfg.can_fail() {
            return (FailureTransition::None, SimTime::EVER);
        }
        if self.failed {
            if cur >= self.recover_ts {
                self.failed = false;
                self.draw_fail_ts(cur);
                return (FailureTransition::Recovered, self.fail_ts);
            }
            (FailureTransition::None, self.recover_ts)
        } else {
            if cur >= self.fail_ts {
                self.failed = true;
                self.recover_ts = cur.saturating_add_micros(self.cfg.fail_duration_us);
                return (FailureTransition::Failed, self.recover_ts);
            }
            (FailureTransition::None, self.fail_ts)
        }
    }

    /// Draw the next failure start after a recovery at `cur`.
    ///
    /// With span `S = interval − duration`, a uniform `r ∈ [0, S)` puts the
    /// next failure at `cur + remain + r` and carries `S − r` into the
    /// following cycle, which keeps the mean cycle length at `interval`.
    fn draw_fail_ts(&mut self, cur: SimTime) {
        let span = self.cfg.fail_interval_us - self.cfg.fail_duration_us;
        let r = rng::fail_time_uniform(span);
        self.fail_ts = cur.saturating_add_micros(self.remain_us + r);
        self.remain_us = span - r;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SEC: u64 = 1_000_000;

    #[test]
    fn non_failing_config_is_inert() {
        let mut ctrl = FailureController::new(FailTime::NONE);
        let (tr, next) = ctrl.on_time_advanced(SimTime::from_secs(100));
        assert_eq!(tr, FailureTransition::None);
        assert_eq!(next, SimTime::EVER);
        assert!(!ctrl.is_failed());

        // Duration >= interval cannot fail either.
        assert!(!FailTime {
            fail_duration_us: 10 * SEC,
            fail_interval_us: 10 * SEC,
        }
        .can_fail());
    }

    #[test]
    #[serial]
    fn fail_and_recover_cycle() {
        rng::init(77);
        let cfg = FailTime {
            fail_duration_us: 30 * SEC,
            fail_interval_us: 60 * SEC,
        };
        let mut ctrl = FailureController::new(cfg);

        // First advance trips the initial failure (fail_ts starts at zero).
        let (tr, next) = ctrl.on_time_advanced(SimTime::ZERO);
        assert_eq!(tr, FailureTransition::Failed);
        assert_eq!(next, SimTime::from_secs(30));
        assert!(ctrl.is_failed());

        // Still failed halfway through.
        let (tr, next) = ctrl.on_time_advanced(SimTime::from_secs(15));
        assert_eq!(tr, FailureTransition::None);
        assert_eq!(next, SimTime::from_secs(30));

        // Recovery at the deadline, with the next failure scheduled out.
        let (tr, next) = ctrl.on_time_advanced(SimTime::from_secs(30));
        assert_eq!(tr, FailureTransition::Recovered);
        assert!(!ctrl.is_failed());
        assert!(next > SimTime::from_secs(30));
        assert!(next <= SimTime::from_secs(60));
    }

    #[test]
    #[serial]
    fn reconfigure_to_non_failing_recovers_immediately() {
        rng::init(78);
        let mut ctrl = FailureController::new(FailTime {
            fail_duration_us: 30 * SEC,
            fail_interval_us: 60 * SEC,
        });
        ctrl.on_time_advanced(SimTime::ZERO);
        assert!(ctrl.is_failed());

        assert_eq!(ctrl.set_fail_time(FailTime::NONE), FailureTransition::Recovered);
        assert!(!ctrl.is_failed());

        // And no failures are ever scheduled afterwards.
        let (tr, next) = ctrl.on_time_advanced(SimTime::from_secs(3600));
        assert_eq!(tr, FailureTransition::None);
        assert_eq!(next, SimTime::EVER);
    }

    #[test]
    #[serial]
    fn reconfigure_while_healthy_is_silent() {
        rng::init(79);
        let mut ctrl = FailureController::new(FailTime::NONE);
        assert_eq!(
            ctrl.set_fail_time(FailTime {
                fail_duration_us: SEC,
                fail_interval_us: 10 * SEC,
            }),
            FailureTransition::None
        );
    }

    /// Drive a controller with fine-grained ticks and measure the failed
    /// fraction of time.
    fn measure_failed_fraction(cfg: FailTime, hours: u64, tick_us: u64) -> f64 {
        let mut ctrl = FailureController::new(cfg);
        let total_us = hours * 3600 * SEC;
        let mut failed_us = 0u64;
        let mut t = 0u64;
        while t < total_us {
            ctrl.on_time_advanced(SimTime::from_micros(t));
            if ctrl.is_failed() {
                failed_us += tick_us;
            }
            t += tick_us;
        }
        failed_us as f64 / total_us as f64
    }

    #[test]
    #[serial]
    fn long_run_failure_fraction_converges_60s_interval() {
        rng::init(4242);
        let fraction = measure_failed_fraction(
            FailTime {
                fail_duration_us: 30 * SEC,
                fail_interval_us: 60 * SEC,
            },
            10,
            100_000,
        );
        assert!(
            (0.46..=0.54).contains(&fraction),
            "failed fraction {fraction} outside ±5% of 0.5"
        );
    }

    #[test]
    #[serial]
    fn long_run_failure_fraction_converges_10s_interval() {
        rng::init(4343);
        let fraction = measure_failed_fraction(
            FailTime {
                fail_duration_us: 3 * SEC,
                fail_interval_us: 10 * SEC,
            },
            10,
            50_000,
        );
        assert!(
            (0.27..=0.33).contains(&fraction),
            "failed fraction {fraction} outside ±10% of 0.3"
        );
    }
}
