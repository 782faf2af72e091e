//! Virtual simulation time.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use serde::{Deserialize, Serialize};

/// A point in virtual time, in microseconds since simulation start.
///
/// All scheduling in the dispatcher is keyed by `SimTime`. The special value
/// [`SimTime::EVER`] means "never": it orders after every attainable
/// timestamp while staying far enough below `u64::MAX` that adding event
/// delays cannot overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(u64);

impl SimTime {
    /// Simulation start.
    pub const ZERO: SimTime = SimTime(0);

    /// The "never" sentinel. Larger than any reachable timestamp.
    pub const EVER: SimTime = SimTime(1 << 63);

    /// Create from a microsecond count.
    pub const fn from_micros(us: u64) -> Self {
        SimTime(us)
    }

    /// Create from a millisecond count.
    pub const fn from_millis(ms: u64) -> Self {
        SimTime(ms * 1_000)
    }

    /// Create from whole seconds.
    pub const fn from_secs(secs: u64) -> Self {
        SimTime(secs * 1_000_000)
    }

    /// Microseconds since simulation start.
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// Seconds since simulation start, as a float.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Whether this is the [`SimTime::EVER`] sentinel (or past it).
    pub const fn is_ever(self) -> bool {
        self.0 >= Self::EVER.0
    }

    /// Add a microsecond delay, saturating at [`SimTime::EVER`].
    pub fn saturating_add_micros(self, us: u64) -> Self {
        let t = self.0.saturating_add(us);
        if t >= Self::EVER.0 {
            Self::EVER
        } else {
            SimTime(t)
        }
    }

    /// Microseconds elapsed since `earlier`.
    ///
    /// Panics in debug builds if `earlier` is in the future; time never runs
    /// backwards in the dispatcher.
    pub fn delay_since(self, earlier: SimTime) -> u64 {
        debug_assert!(self >= earlier, "time went backwards: {} < {}", self, earlier);
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<u64> for SimTime {
    type Output = SimTime;

    /// Add microseconds. Use [`SimTime::saturating_add_micros`] where the
    /// delay may be the `EVER` sentinel.
    fn add(self, us: u64) -> SimTime {
        SimTime(self.0 + us)
    }
}

impl AddAssign<u64> for SimTime {
    fn add_assign(&mut self, us: u64) {
        self.0 += us;
    }
}

impl Sub<SimTime> for SimTime {
    type Output = u64;

    fn sub(self, rhs: SimTime) -> u64 {
        self.delay_since(rhs)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ever() {
            write!(f, "ever")
        } else {
            write!(f, "{}.{:06}s", self.0 / 1_000_000, self.0 % 1_000_000)
        }
    }
}
