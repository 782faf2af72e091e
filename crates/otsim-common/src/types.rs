//! Node identifiers, addresses, and Thread-level enumerations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a simulated node, unique within one simulation.
pub type NodeId = u32;

/// A 16-bit routing locator. Not globally unique across partitions.
pub type Rloc16 = u16;

/// The reserved "no rloc16 assigned" value.
pub const INVALID_RLOC16: Rloc16 = 0xFFFE;
/// The broadcast rloc16.
pub const BROADCAST_RLOC16: Rloc16 = 0xFFFF;

/// The reserved "no extended address" value.
pub const INVALID_EXT_ADDR: ExtAddr = ExtAddr(0);

/// A 64-bit IEEE EUI-64 style extended address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtAddr(pub u64);

impl ExtAddr {
    /// Whether this is the [`INVALID_EXT_ADDR`] sentinel.
    pub fn is_valid(self) -> bool {
        self != INVALID_EXT_ADDR
    }
}

impl fmt::Display for ExtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for ExtAddr {
    fn from(v: u64) -> Self {
        ExtAddr(v)
    }
}

/// Error parsing a node status field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseFieldError {
    /// Value is not a recognized role number.
    #[error("unknown device role: {0}")]
    UnknownRole(u8),

    /// Value is not a recognized joiner state number.
    #[error("unknown joiner state: {0}")]
    UnknownJoinerState(u8),

    /// Mode string contains a flag character outside `r`, `d`, `n`, `-`.
    #[error("unknown mode flag: {0:?}")]
    UnknownModeFlag(char),
}

// ============================================================================
// Device role
// ============================================================================

/// Thread device role, as reported by node firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeRole {
    /// Thread stack disabled.
    #[default]
    Disabled,
    /// Not attached to any partition.
    Detached,
    /// Attached as a child.
    Child,
    /// Active router.
    Router,
    /// Partition leader.
    Leader,
}

impl NodeRole {
    /// Decode the numeric role pushed by node firmware.
    pub fn from_u8(v: u8) -> Result<Self, ParseFieldError> {
        match v {
            0 => Ok(NodeRole::Disabled),
            1 => Ok(NodeRole::Detached),
            2 => Ok(NodeRole::Child),
            3 => Ok(NodeRole::Router),
            4 => Ok(NodeRole::Leader),
            other => Err(ParseFieldError::UnknownRole(other)),
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeRole::Disabled => "disabled",
            NodeRole::Detached => "detached",
            NodeRole::Child => "child",
            NodeRole::Router => "router",
            NodeRole::Leader => "leader",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Joiner state
// ============================================================================

/// Commissioning (joiner) state machine position.
///
/// The happy path is `Idle → Discover → Connecting → Connected → Entrust →
/// Joined → Idle`; any failure returns straight to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum JoinerState {
    /// No commissioning attempt in flight.
    #[default]
    Idle,
    /// Scanning for joinable networks.
    Discover,
    /// DTLS handshake in progress.
    Connecting,
    /// DTLS session established.
    Connected,
    /// Waiting for the network entrust message.
    Entrust,
    /// Commissioning finished successfully.
    Joined,
}

impl JoinerState {
    /// Decode the numeric joiner state pushed by node firmware.
    pub fn from_u8(v: u8) -> Result<Self, ParseFieldError> {
        match v {
            0 => Ok(JoinerState::Idle),
            1 => Ok(JoinerState::Discover),
            2 => Ok(JoinerState::Connecting),
            3 => Ok(JoinerState::Connected),
            4 => Ok(JoinerState::Entrust),
            5 => Ok(JoinerState::Joined),
            other => Err(ParseFieldError::UnknownJoinerState(other)),
        }
    }
}

// ============================================================================
// Node mode
// ============================================================================

/// Thread MLE device mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMode {
    /// Radio stays on while idle (not a sleepy device).
    pub rx_on_when_idle: bool,
    /// Full Thread device (router-capable).
    pub full_thread_device: bool,
    /// Requests full network data.
    pub full_network_data: bool,
}

impl NodeMode {
    /// The default mode of a router-eligible device (`rdn`).
    pub fn full() -> Self {
        NodeMode {
            rx_on_when_idle: true,
            full_thread_device: true,
            full_network_data: true,
        }
    }

    /// Parse the CLI-style flag string (`r`, `d`, `n` in any order; `-` for
    /// a sleepy end device with no flags).
    pub fn parse(s: &str) -> Result<Self, ParseFieldError> {
        let mut mode = NodeMode {
            rx_on_when_idle: false,
            full_thread_device: false,
            full_network_data: false,
        };
        for c in s.chars() {
            match c {
                'r' => mode.rx_on_when_idle = true,
                'd' => mode.full_thread_device = true,
                'n' => mode.full_network_data = true,
                '-' => {}
                other => return Err(ParseFieldError::UnknownModeFlag(other)),
            }
        }
        Ok(mode)
    }
}

impl Default for NodeMode {
    fn default() -> Self {
        NodeMode::full()
    }
}

impl FromStr for NodeMode {
    type Err = ParseFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeMode::parse(s)
    }
}

impl fmt::Display for NodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.rx_on_when_idle && !self.full_thread_device && !self.full_network_data {
            return f.write_str("-");
        }
        if self.rx_on_when_idle {
            f.write_str("r")?;
        }
        if self.full_thread_device {
            f.write_str("d")?;
        }
        if self.full_network_data {
            f.write_str("n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        for v in 0..=4u8 {
            let role = NodeRole::from_u8(v).unwrap();
            let back = match role {
                NodeRole::Disabled => 0,
                NodeRole::Detached => 1,
                NodeRole::Child => 2,
                NodeRole::Router => 3,
                NodeRole::Leader => 4,
            };
            assert_eq!(v, back);
        }
        assert!(NodeRole::from_u8(5).is_err());
    }

    #[test]
    fn joiner_state_decodes() {
        assert_eq!(JoinerState::from_u8(0).unwrap(), JoinerState::Idle);
        assert_eq!(JoinerState::from_u8(5).unwrap(), JoinerState::Joined);
        assert!(JoinerState::from_u8(6).is_err());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(NodeMode::parse("rdn").unwrap(), NodeMode::full());
        let sed = NodeMode::parse("-").unwrap();
        assert!(!sed.rx_on_when_idle);
        assert!(!sed.full_thread_device);
        assert!(!sed.full_network_data);
        assert!(NodeMode::parse("rx").is_err());
        assert_eq!(NodeMode::full().to_string(), "rdn");
        assert_eq!(sed.to_string(), "-");
    }

    #[test]
    fn ext_addr_display_and_validity() {
        assert_eq!(ExtAddr(0x1122334455667788).to_string(), "1122334455667788");
        assert!(!INVALID_EXT_ADDR.is_valid());
        assert!(ExtAddr(1).is_valid());
    }
}
