//! Common types and traits for the OTSIM simulator.
//!
//! This crate holds the value types shared by every other crate in the
//! workspace: the virtual-time scalar [`SimTime`], node identifiers and
//! address types, the Thread role and joiner enumerations, radio constants,
//! and the process-wide seeded PRNG streams in [`rng`].

mod time;
mod types;

pub mod rng;

pub use time::SimTime;
pub use types::{
    ExtAddr, JoinerState, NodeId, NodeMode, NodeRole, ParseFieldError, Rloc16,
    BROADCAST_RLOC16, INVALID_EXT_ADDR, INVALID_RLOC16,
};

// ============================================================================
// Radio constants
// ============================================================================

/// Lowest IEEE 802.15.4 channel in the 2.4 GHz band.
pub const MIN_CHANNEL: u8 = 11;
/// Highest IEEE 802.15.4 channel in the 2.4 GHz band.
pub const MAX_CHANNEL: u8 = 26;
/// Channel nodes start on unless the scenario says otherwise.
pub const DEFAULT_CHANNEL: u8 = 11;

/// Lower edge of the valid RSSI window, in dBm.
pub const RSSI_MIN_DBM: i8 = -126;
/// Upper edge of the valid RSSI window, in dBm.
pub const RSSI_MAX_DBM: i8 = 126;
/// Marker for "no RSSI available".
pub const RSSI_INVALID_DBM: i8 = 127;

/// Default node transmit power.
pub const DEFAULT_TX_POWER_DBM: i8 = 0;
/// Default node receive sensitivity.
pub const DEFAULT_RX_SENSITIVITY_DBM: i8 = -100;
/// Default disc radio range, in distance units.
pub const DEFAULT_RADIO_RANGE: u32 = 220;

/// A ping request with no reply after this long is reported as timed out.
pub const MAX_PING_DELAY_US: u64 = 10_000_000;
