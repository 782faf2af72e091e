//! Minimal IEEE 802.15.4 MAC frame inspection.
//!
//! The coordinator never interprets frame payloads; all it needs from a
//! PSDU is the destination addressing so it can route the frame to the
//! right node(s), and a way to corrupt the FCS of frames the interference
//! model decides were damaged. This crate provides exactly that.

mod error;
mod frame;

pub use error::FrameError;
pub use frame::{garble_fcs, AddressingMode, FrameDst, FrameType, ParsedFrame, BROADCAST_PAN_ID};
