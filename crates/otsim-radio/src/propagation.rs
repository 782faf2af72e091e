//! Propagation math shared by the distance-aware engines.
//!
//! RSSI between two radios is `tx_power − pathloss − fading`, where
//! pathloss is a log-distance LOS curve (optionally the worse of LOS and a
//! configured NLOS curve) and fading has two independent per-link
//! components: a deterministic shadow-fading draw cached per link, and a
//! time-variant draw that regenerates at exponentially-distributed
//! intervals. Links are keyed by a coarse grid hash of both endpoint
//! positions plus the channel, symmetrically, so `a→b` and `b→a` always see
//! the same fading.

use std::collections::HashMap;

use otsim_common::{rng, SimTime};
use rand_distr::{Distribution, Exp, Normal};

use crate::{Position, RadioModelParams, RadioNode};

/// Sum two powers expressed in dBm.
pub fn dbm_sum(a_dbm: f64, b_dbm: f64) -> f64 {
    if a_dbm == f64::NEG_INFINITY {
        return b_dbm;
    }
    if b_dbm == f64::NEG_INFINITY {
        return a_dbm;
    }
    let lin = 10f64.powf(a_dbm / 10.0) + 10f64.powf(b_dbm / 10.0);
    10.0 * lin.log10()
}

/// Probability that a whole packet of `nbits` survives at the given
/// signal-to-interference-plus-noise ratio.
///
/// Uses the standard IEEE 802.15.4 O-QPSK DSSS bit-error formula
/// `BER = (8/15)·(1/16)·Σ_{k=2}^{16} (−1)^k · C(16,k) · e^{20·SINR·(1/k − 1)}`
/// with SINR linear, then `Psuc = (1 − BER)^nbits`.
pub fn packet_success_probability(sinr_db: f64, nbits: usize) -> f64 {
    let sinr = 10f64.powf(sinr_db / 10.0);
    let mut sum = 0.0;
    let mut binom = 120.0; // C(16, 2)
    for k in 2..=16u32 {
        if k > 2 {
            binom = binom * (16 - k + 1) as f64 / k as f64;
        }
        let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
        sum += sign * binom * (20.0 * sinr * (1.0 / k as f64 - 1.0)).exp();
    }
    let ber = ((8.0 / 15.0) * (1.0 / 16.0) * sum).clamp(0.0, 0.5);
    (1.0 - ber).powi(nbits as i32)
}

// ============================================================================
// Fading
// ============================================================================

/// Symmetric per-link fading key: grid cells of both endpoints + channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct LinkKey {
    lo: (i64, i64, i64),
    hi: (i64, i64, i64),
    channel: u8,
}

impl LinkKey {
    fn new(a: &Position, b: &Position, channel: u8, grid: f64) -> Self {
        let cell = |p: &Position| {
            (
                (p.x / grid).floor() as i64,
                (p.y / grid).floor() as i64,
                (p.z / grid).floor() as i64,
            )
        };
        let (ca, cb) = (cell(a), cell(b));
        if ca <= cb {
            LinkKey { lo: ca, hi: cb, channel }
        } else {
            LinkKey { lo: cb, hi: ca, channel }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TimeFadingEntry {
    value_db: f64,
    sigma_db: f64,
    next_change: SimTime,
}

/// The propagation engine: pathloss plus both fading caches.
#[derive(Debug)]
pub(crate) struct Propagation {
    params: RadioModelParams,
    shadow: HashMap<LinkKey, f64>,
    time_variant: HashMap<LinkKey, TimeFadingEntry>,
    /// Latest virtual time the model has seen; advances via
    /// `on_next_event_time`.
    now: SimTime,
}

impl Propagation {
    pub fn new(params: RadioModelParams) -> Self {
        Propagation {
            params,
            shadow: HashMap::new(),
            time_variant: HashMap::new(),
            now: SimTime::ZERO,
        }
    }

    pub fn params(&self) -> &RadioModelParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut RadioModelParams {
        &mut self.params
    }

    /// Drop cached fading state; called after parameters change.
    pub fn clear_caches(&mut self) {
        self.shadow.clear();
        self.time_variant.clear();
    }

    /// Advance the engine's notion of time so time-variant fading can age.
    pub fn advance_time(&mut self, ts: SimTime) {
        if ts > self.now && !ts.is_ever() {
            self.now = ts;
        }
    }

    /// Pathloss in dB over `distance_units`.
    pub fn pathloss_db(&self, distance_units: f64) -> f64 {
        let p = &self.params;
        let d_m = distance_units * p.meters_per_unit;
        if d_m < 0.01 {
            // Virtually colocated radios; no attenuation below a centimeter.
            return 0.0;
        }
        let log_d = d_m.log10();
        let los = p.pathloss_los_a * log_d + p.pathloss_los_b;
        let pl = match (p.pathloss_nlos_a, p.pathloss_nlos_b) {
            (Some(a), Some(b)) => los.max(a * log_d + b),
            _ => los,
        };
        pl.max(0.0)
    }

    /// Total fading (shadow + time-variant) for the link, dB.
    pub fn fading_db(&mut self, a: &Position, b: &Position, channel: u8) -> f64 {
        self.shadow_fading_db(a, b, channel) + self.time_fading_db(a, b, channel)
    }

    fn shadow_fading_db(&mut self, a: &Position, b: &Position, channel: u8) -> f64 {
        let sigma = self.params.shadow_fading_sigma_db;
        if sigma <= 0.0 {
            return 0.0;
        }
        let key = LinkKey::new(a, b, channel, self.params.fading_grid_size);
        *self.shadow.entry(key).or_insert_with(|| {
            let normal = Normal::new(0.0, sigma).expect("sigma checked positive");
            rng::with_radio_model(|r| normal.sample(r))
        })
    }

    fn time_fading_db(&mut self, a: &Position, b: &Position, channel: u8) -> f64 {
        let sigma_max = self.params.time_fading_sigma_max_db;
        if sigma_max <= 0.0 {
            return 0.0;
        }
        let key = LinkKey::new(a, b, channel, self.params.fading_grid_size);
        let mean_change = self.params.mean_time_fading_change_us.max(1) as f64;
        let now = self.now;

        let entry = self.time_variant.entry(key).or_insert_with(|| {
            rng::with_radio_model(|r| {
                let sigma_db = rand::Rng::gen_range(r, 0.0..=sigma_max);
                TimeFadingEntry {
                    value_db: draw_normal(r, sigma_db),
                    sigma_db,
                    next_change: next_change_time(r, now, mean_change),
                }
            })
        });
        while entry.next_change <= now {
            rng::with_radio_model(|r| {
                entry.value_db = draw_normal(r, entry.sigma_db);
                entry.next_change = next_change_time(r, entry.next_change, mean_change);
            });
        }
        entry.value_db
    }

    /// RSSI seen at `dst` for a transmission from `src`, dBm, clipped to
    /// the configured window.
    pub fn rssi(&mut self, src: &RadioNode, dst: &RadioNode) -> f64 {
        let distance = src.position.distance(&dst.position);
        let pathloss = self.pathloss_db(distance);
        let fading = self.fading_db(&src.position, &dst.position, src.channel);
        let rssi = src.tx_power_dbm as f64 - pathloss - fading;
        rssi.clamp(self.params.rssi_min_dbm, self.params.rssi_max_dbm)
    }

    /// Whether `dst` can hear `src` at all: RSSI at or above the
    /// destination's sensitivity plus the minimum-SNR floor.
    pub fn link_reachable(&mut self, src: &RadioNode, dst: &RadioNode) -> bool {
        let floor = dst.rx_sensitivity_dbm as f64 + self.params.snr_min_db;
        self.rssi(src, dst) >= floor
    }
}

fn draw_normal(r: &mut dyn rand::RngCore, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    Normal::new(0.0, sigma).expect("sigma checked positive").sample(r)
}

fn next_change_time(r: &mut dyn rand::RngCore, from: SimTime, mean_us: f64) -> SimTime {
    let exp = Exp::new(1.0 / mean_us).expect("mean checked positive");
    from.saturating_add_micros(exp.sample(r).ceil() as u64)
}
