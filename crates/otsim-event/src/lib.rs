//! Wire protocol between the OTSIM coordinator and node processes.
//!
//! Every simulated node runs as an external process and exchanges small
//! binary event records with the coordinator over a datagram socket. This
//! crate owns that format: the [`Event`] record with its fixed 19-byte
//! header, the per-type payload blocks ([`RadioCommData`],
//! [`RadioStateData`], [`RfSimParamData`]), and the parser for the ASCII
//! `k=v;k=v` status pushes in [`status`].
//!
//! The wire layout (all integers little-endian):
//!
//! ```text
//! +---------+------+--------+-------------+------------------+
//! | delay   | type | msg_id | payload_len | payload[0..len]  |
//! | u64     | u8   | u64    | u16         |                  |
//! +---------+------+--------+-------------+------------------+
//! ```
//!
//! The first field carries a relative delay when a node emits the event and
//! an absolute point when context demands it; both ends agree per event
//! type. Decoding from a partial buffer reports "need more data" rather
//! than an error, so the same codec serves stream transports.

mod error;
mod event;

pub mod status;

pub use error::EventError;
pub use event::{
    Event, EventType, RadioCommData, RadioError, RadioState, RadioStateData, RfSimParam,
    RfSimParamData, EVENT_HEADER_SIZE,
};
