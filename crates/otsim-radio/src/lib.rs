//! Radio propagation and channel-access models.
//!
//! The dispatcher hands every radio event it pops to exactly one
//! [`RadioModel`]; the model mutates per-node radio state, decides which
//! frames reach which listeners in what shape, and schedules follow-up
//! events back into the dispatcher's send queue through the [`EventQueue`]
//! seam.
//!
//! Three engines are provided:
//!
//! - [`IdealModel`] — every frame arrives intact at a fixed RSSI, no
//!   channel contention. The fastest option for protocol-level work.
//! - [`IdealModel`] in disc-limited mode (`IdealDisc`) — adds log-distance
//!   pathloss RSSI and a hard circular range cut-off.
//! - [`InterferenceModel`] — tracks concurrent transmitters per channel,
//!   folds interferer power into a SIR-driven bit-error model, corrupts
//!   frames that lose the roll, and models energy-scan sampling.

mod ideal;
mod interference;
mod model;
mod node;
mod params;
mod propagation;
mod stats;

pub use ideal::IdealModel;
pub use interference::InterferenceModel;
pub use model::{EventQueue, RadioModel, RadioNodeMap};
pub use node::{Position, RadioNode};
pub use params::RadioModelParams;
pub use propagation::{dbm_sum, packet_success_probability};
pub use stats::ChannelStats;

use thiserror::Error;

/// Error raised when a scenario names a radio model this build does not
/// provide.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown radio model: {0:?}")]
pub struct UnknownModelError(pub String);

/// Instantiate a radio model by scenario name.
///
/// Recognized (case-insensitive): `Ideal`, `IdealDisc` / `Disc`,
/// `MutualInterference` / `Interference`.
pub fn create_radio_model(
    name: &str,
    params: RadioModelParams,
) -> Result<Box<dyn RadioModel>, UnknownModelError> {
    match name.to_ascii_lowercase().as_str() {
        "ideal" => Ok(Box::new(IdealModel::new(params, false))),
        "idealdisc" | "disc" | "ideal_disc" => Ok(Box::new(IdealModel::new(params, true))),
        "mutualinterference" | "interference" | "mutual_interference" => {
            Ok(Box::new(InterferenceModel::new(params)))
        }
        _ => Err(UnknownModelError(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_resolves_all_names() {
        for name in ["Ideal", "ideal", "IdealDisc", "disc", "MutualInterference", "interference"] {
            let model = create_radio_model(name, RadioModelParams::default()).unwrap();
            assert!(!model.model_name().is_empty());
        }
        assert!(create_radio_model("freespace", RadioModelParams::default()).is_err());
    }
}
