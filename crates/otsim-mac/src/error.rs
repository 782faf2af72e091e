//! Frame parsing error types.

use thiserror::Error;

/// Errors raised while inspecting a PSDU.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The PSDU ends before the field being parsed.
    #[error("frame too short: needed {needed} bytes, frame has {actual}")]
    TooShort {
        /// Bytes the parser needed so far.
        needed: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// The frame control field uses the reserved addressing mode `0b01`.
    #[error("reserved addressing mode in frame control")]
    ReservedAddressingMode,
}
