//! Error types for the pipeline and packet path.

use thiserror::Error;
use warden_crypto::KeyParity;

/// Errors from constructing a [`KeyPipeline`](crate::KeyPipeline).
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The derivation worker thread could not be spawned.
    #[error("failed to spawn derivation worker: {0}")]
    WorkerSpawn(String),
}

/// Errors from descrambling one packet.
///
/// Both cases leave the payload untouched; the caller decides whether the
/// packet is dropped or passed through still scrambled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescrambleError {
    /// No control word is available: nothing has ever been derived, or
    /// the bounded wait at a key-parity flip timed out.
    #[error("no {parity:?} control word available")]
    NoKeyAvailable {
        /// Parity the packet asked for.
        parity: KeyParity,
    },

    /// The payload cannot even hold the clear header prefix.
    #[error("scrambled payload of {len} bytes is shorter than the 8-byte clear prefix")]
    PayloadTooShort {
        /// Payload length presented.
        len: usize,
    },
}
