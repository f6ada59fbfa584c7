//! Error types for key derivation.

use thiserror::Error;
use warden_card::CardError;

/// Errors from the authentication handshake and control-word derivation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerivationError {
    /// Transport-level failure talking to the card, or a refusal status.
    #[error("card communication failed: {0}")]
    CardComm(#[from] CardError),

    /// The card's authentication response failed the integrity check.
    ///
    /// The response cannot be trusted and no key material is accepted.
    /// Treated like a communication failure for retry purposes: a
    /// transient desync is far more likely than a forged card.
    #[error("card authentication response failed verification")]
    AuthVerification,

    /// Every bounded attempt failed; the previous control words (if any)
    /// remain authoritative.
    #[error("key derivation failed after {attempts} attempts")]
    DerivationFailed {
        /// Attempts actually made.
        attempts: u32,
    },

    /// The ECM is too short to contain the initialization segment.
    #[error("ECM too short: need at least {expected} bytes, got {actual}")]
    EcmTooShort {
        /// Minimum derivable ECM length.
        expected: usize,
        /// Length submitted.
        actual: usize,
    },

    /// Derivation was requested with no card session attached.
    #[error("no card session attached")]
    NoCardSession,
}
