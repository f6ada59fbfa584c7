//! Card transport status taxonomy.
//!
//! Mirrors the status space of a PC/SC-style reader stack without depending
//! on one: the derivation engine only needs to know whether a failure is
//! worth one more attempt inside its bounded retry loop.

use thiserror::Error;

/// Errors surfaced by a [`crate::CardSession`] exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CardError {
    /// The card was reset underneath the session.
    #[error("card was reset")]
    Reset,

    /// The session handle is no longer valid on the reader side.
    #[error("card session handle is invalid")]
    InvalidSession,

    /// The session was used before connect/init completed.
    #[error("card session is not ready")]
    NotReady,

    /// The card answered with a non-success status word.
    #[error("card returned status {sw1:02X} {sw2:02X}")]
    Status {
        /// First status byte.
        sw1: u8,
        /// Second status byte.
        sw2: u8,
    },

    /// Response bytes were too short or otherwise malformed.
    #[error("malformed card response: expected at least {expected} bytes, got {actual}")]
    Framing {
        /// Minimum byte count the exchange requires.
        expected: usize,
        /// Byte count actually received.
        actual: usize,
    },

    /// A command payload does not fit the case-4 short encoding.
    #[error("command payload of {len} bytes does not fit a short APDU")]
    InvalidCommand {
        /// Offending payload length.
        len: usize,
    },

    /// Any other reader/transport-level failure.
    #[error("card transport error: {0}")]
    Transport(String),
}

impl CardError {
    /// Returns true if the failure may clear up when the whole exchange is
    /// re-run from the top of its transaction.
    ///
    /// A reset or invalidated session is exactly the situation the
    /// derivation engine's bounded retry exists for. Framing problems,
    /// refused commands, and generic transport faults are not expected to
    /// change on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Reset | Self::InvalidSession)
    }
}
