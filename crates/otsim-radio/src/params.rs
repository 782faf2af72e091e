//! Radio model parameters.

use serde::{Deserialize, Serialize};

/// Tunable parameters shared by the radio model engines.
///
/// The pathloss defaults follow a log-distance model calibrated for indoor
/// 2.4 GHz: `PL(d) = A·log10(d_m) + B` dB. An optional NLOS branch with its
/// own coefficients can be enabled; the resulting pathloss is the worse of
/// the two.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioModelParams {
    /// Meters per distance unit.
    pub meters_per_unit: f64,

    /// LOS pathloss slope (dB per decade of distance).
    pub pathloss_los_a: f64,
    /// LOS pathloss intercept, dB at 1 m.
    pub pathloss_los_b: f64,
    /// NLOS pathloss slope; `None` disables the NLOS branch.
    pub pathloss_nlos_a: Option<f64>,
    /// NLOS pathloss intercept.
    pub pathloss_nlos_b: Option<f64>,

    /// Standard deviation of the per-link shadow fading draw, dB.
    /// Zero disables shadow fading.
    pub shadow_fading_sigma_db: f64,
    /// Upper bound of the per-link time-variant fading sigma, dB.
    /// Zero disables time-variant fading.
    pub time_fading_sigma_max_db: f64,
    /// Mean interval between time-variant fading changes, microseconds.
    pub mean_time_fading_change_us: u64,
    /// Cell size of the position grid used to key fading per link,
    /// distance units.
    pub fading_grid_size: f64,

    /// Thermal + ambient noise floor, dBm.
    pub noise_floor_dbm: f64,
    /// Offset added to the destination's receive sensitivity to form the
    /// reachability floor, dB.
    pub snr_min_db: f64,

    /// Lower clip of computed RSSI, dBm.
    pub rssi_min_dbm: f64,
    /// Upper clip of computed RSSI, dBm.
    pub rssi_max_dbm: f64,

    /// RSSI stamped on deliveries by the plain ideal model, dBm.
    pub fixed_rssi_dbm: i8,
}

impl Default for RadioModelParams {
    fn default() -> Self {
        RadioModelParams {
            meters_per_unit: 0.10,
            pathloss_los_a: 35.0,
            pathloss_los_b: 40.0,
            pathloss_nlos_a: None,
            pathloss_nlos_b: None,
            shadow_fading_sigma_db: 8.03,
            time_fading_sigma_max_db: 4.0,
            mean_time_fading_change_us: 30_000_000,
            fading_grid_size: 30.0,
            noise_floor_dbm: -95.0,
            snr_min_db: -4.0,
            rssi_min_dbm: -126.0,
            rssi_max_dbm: 126.0,
            fixed_rssi_dbm: -60,
        }
    }
}

impl RadioModelParams {
    /// Parameters with all stochastic fading disabled; links become exactly
    /// symmetric and repeatable.
    pub fn without_fading() -> Self {
        RadioModelParams {
            shadow_fading_sigma_db: 0.0,
            time_fading_sigma_max_db: 0.0,
            ..Default::default()
        }
    }
}
