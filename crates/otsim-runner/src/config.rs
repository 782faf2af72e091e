//! Simulation and node configuration.

use std::io;
use std::path::{Path, PathBuf};

use otsim_common::{NodeId, DEFAULT_RADIO_RANGE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::failure::FailTime;
use crate::pcap::PcapMode;

/// Error loading a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] io::Error),

    /// File did not parse as YAML.
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Values are structurally valid but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Whole-simulation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Node firmware executable the supervisor launches.
    pub executable: PathBuf,
    /// CLI lines pushed to every node after it attaches.
    pub init_script: Vec<String>,
    /// Radio model name (see `otsim_radio::create_radio_model`).
    pub radio_model: String,
    /// Default disc radio range for new nodes, distance units.
    pub radio_range: u32,
    /// Keep virtual time advancing without explicit go requests.
    pub autogo: bool,
    /// Simulation speed: virtual microseconds per wall microsecond.
    pub speed: f64,
    /// Log filter (`error`..`trace` or an EnvFilter expression).
    pub log_level: String,
    /// Root random seed; 0 seeds from entropy.
    pub random_seed: u64,
    /// Directory for pcap and other run outputs.
    pub output_dir: PathBuf,
    /// UDP port the coordinator listens on; 0 picks a free port.
    pub listen_port: u16,
    /// Packet capture mode.
    pub pcap: PcapMode,
    /// Global probabilistic frame drop, `0.0..=1.0`.
    pub packet_loss_ratio: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            executable: PathBuf::from("ot-cli-ftd"),
            init_script: Vec::new(),
            radio_model: "MutualInterference".to_string(),
            radio_range: DEFAULT_RADIO_RANGE,
            autogo: false,
            speed: 1.0,
            log_level: "info".to_string(),
            random_seed: 0,
            output_dir: PathBuf::from("."),
            listen_port: 9000,
            pcap: PcapMode::Off,
            packet_loss_ratio: 0.0,
        }
    }
}

impl SimConfig {
    /// Load from a YAML file.
    pub fn load(path: &Path) -> Result<SimConfig, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: SimConfig = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations a run cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.packet_loss_ratio) {
            return Err(ConfigError::Invalid(format!(
                "packet_loss_ratio {} outside [0, 1]",
                self.packet_loss_ratio
            )));
        }
        if self.speed <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "speed {} must be positive",
                self.speed
            )));
        }
        Ok(())
    }
}

/// Per-node creation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Explicit node id; `None` assigns the next free id.
    pub id: Option<NodeId>,
    /// Position, distance units.
    pub x: f64,
    /// Position, distance units.
    pub y: f64,
    /// Position, distance units.
    pub z: f64,
    /// Disc radio range override; `None` uses the simulation default.
    pub radio_range: Option<u32>,
    /// Induced-failure configuration.
    pub fail_time: FailTime,
    /// Whether the node is restored instead of freshly commissioned
    /// (affects supervisor-side init only).
    pub restore: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            id: None,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            radio_range: None,
            fail_time: FailTime::NONE,
            restore: false,
        }
    }
}

impl NodeConfig {
    /// A node at a position with everything else default.
    pub fn at(x: f64, y: f64) -> Self {
        NodeConfig {
            x,
            y,
            ..Default::default()
        }
    }

    /// Reject impossible failure configurations: a failure duration with no
    /// room inside its interval cannot be scheduled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ft = self.fail_time;
        if ft.fail_duration_us > 0 && ft.fail_interval_us <= ft.fail_duration_us {
            return Err(ConfigError::Invalid(format!(
                "fail_time duration {} must be below interval {}",
                ft.fail_duration_us, ft.fail_interval_us
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        SimConfig::default().validate().unwrap();
        NodeConfig::default().validate().unwrap();
    }

    #[test]
    fn bad_packet_loss_rejected() {
        let config = SimConfig {
            packet_loss_ratio: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn impossible_fail_time_rejected() {
        let config = NodeConfig {
            fail_time: FailTime {
                fail_duration_us: 10,
                fail_interval_us: 10,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_round_trip() {
        let config = SimConfig {
            radio_model: "Ideal".to_string(),
            speed: 4.0,
            pcap: PcapMode::Tap,
            ..Default::default()
        };
        let text = serde_yaml::to_string(&config).unwrap();
        let parsed: SimConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(parsed.radio_model, "Ideal");
        assert_eq!(parsed.speed, 4.0);
        assert_eq!(parsed.pcap, PcapMode::Tap);
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let parsed: SimConfig = serde_yaml::from_str("radio_model: Ideal\n").unwrap();
        assert_eq!(parsed.radio_model, "Ideal");
        assert_eq!(parsed.speed, 1.0);
        assert_eq!(parsed.listen_port, 9000);
    }
}
