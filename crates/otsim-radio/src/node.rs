//! Per-node radio state.

use otsim_common::{
    NodeId, DEFAULT_CHANNEL, DEFAULT_RADIO_RANGE, DEFAULT_RX_SENSITIVITY_DBM,
    DEFAULT_TX_POWER_DBM,
};
use otsim_event::{RadioState, RadioStateData};
use serde::{Deserialize, Serialize};

/// A point in the simulation plane, in distance units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    /// Create a position on the ground plane.
    pub fn new(x: f64, y: f64) -> Self {
        Position { x, y, z: 0.0 }
    }

    /// Euclidean distance to `other`, in distance units.
    pub fn distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Radio state of one simulated node.
///
/// Mutated only by the dispatcher and the radio model, on the dispatcher
/// thread. No physical feasibility checks happen here: the model trusts
/// whatever state the node firmware declares.
#[derive(Debug, Clone)]
pub struct RadioNode {
    /// Owning node.
    pub id: NodeId,
    /// Transmit power, dBm.
    pub tx_power_dbm: i8,
    /// Receive sensitivity floor, dBm.
    pub rx_sensitivity_dbm: i8,
    /// Disc radio range, distance units.
    pub radio_range: u32,
    /// Position in the plane.
    pub position: Position,
    /// Coarse radio state.
    pub state: RadioState,
    /// Firmware-defined fine-grained sub-state.
    pub substate: u8,
    /// Current channel (11..=26).
    pub channel: u8,
    /// Running maximum of the current energy-scan window, dBm.
    pub rssi_sample_max: f64,
    /// Node-local radio clock from the last state report, microseconds.
    pub radio_time_us: u64,
}

impl RadioNode {
    /// Create the radio state for a new node.
    pub fn new(id: NodeId, position: Position, radio_range: u32) -> Self {
        RadioNode {
            id,
            tx_power_dbm: DEFAULT_TX_POWER_DBM,
            rx_sensitivity_dbm: DEFAULT_RX_SENSITIVITY_DBM,
            radio_range,
            position,
            state: RadioState::Sleep,
            substate: 0,
            channel: DEFAULT_CHANNEL,
            rssi_sample_max: f64::NEG_INFINITY,
            radio_time_us: 0,
        }
    }

    /// Apply a radio-state report from the node firmware.
    pub fn apply_state(&mut self, data: &RadioStateData) {
        self.channel = data.channel;
        self.tx_power_dbm = data.tx_power_dbm;
        self.rx_sensitivity_dbm = data.rx_sensitivity_dbm;
        self.substate = data.substate;
        self.state = data.state;
        self.radio_time_us = data.radio_time_us;
    }
}

impl Default for RadioNode {
    fn default() -> Self {
        RadioNode::new(0, Position::default(), DEFAULT_RADIO_RANGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert_eq!(a.distance(&b), 5.0);
        assert_eq!(b.distance(&a), 5.0);
    }

    #[test]
    fn apply_state_updates_all_fields() {
        let mut node = RadioNode::new(1, Position::new(10.0, 10.0), 220);
        node.apply_state(&RadioStateData {
            channel: 21,
            tx_power_dbm: 4,
            rx_sensitivity_dbm: -97,
            substate: 3,
            state: RadioState::Tx,
            radio_time_us: 99_000,
        });
        assert_eq!(node.channel, 21);
        assert_eq!(node.tx_power_dbm, 4);
        assert_eq!(node.rx_sensitivity_dbm, -97);
        assert_eq!(node.substate, 3);
        assert_eq!(node.state, RadioState::Tx);
        assert_eq!(node.radio_time_us, 99_000);
    }
}
