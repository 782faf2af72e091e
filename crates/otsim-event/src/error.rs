//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when encoding or decoding coordinator↔node events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The event type byte is not a known code.
    #[error("unknown event type: {0}")]
    UnknownEventType(u8),

    /// The header's payload length disagrees with the payload block the
    /// event type requires.
    #[error("{event} payload too short: expected at least {expected} bytes, got {actual}")]
    PayloadTooShort {
        /// Event type name.
        event: &'static str,
        /// Minimum payload size for this type.
        expected: usize,
        /// Actual payload size received.
        actual: usize,
    },

    /// Payload exceeds the maximum a datagram may carry.
    #[error("payload too long: maximum {max} bytes, got {actual}")]
    PayloadTooLong {
        /// Maximum allowed payload size.
        max: usize,
        /// Actual payload size.
        actual: usize,
    },

    /// Payload that must be text was not valid UTF-8.
    #[error("invalid UTF-8 in {0} payload")]
    InvalidUtf8(&'static str),

    /// A status-push field did not parse.
    #[error("malformed status push {key:?}: {reason}")]
    MalformedStatus {
        /// The status key being parsed.
        key: String,
        /// What went wrong.
        reason: String,
    },
}
