//! Key material types.
//!
//! Every secret here is zeroized on drop. The master secret lives for the
//! process; the card-lock key lives for one derivation; control words live
//! until the next successful derivation replaces them.

use zeroize::Zeroize;

/// Fixed 32-byte provisioning secret shared with the card population.
///
/// Supplied externally, never derived or persisted by this crate.
#[derive(Clone)]
pub struct MasterSecret {
    bytes: [u8; 32],
}

impl MasterSecret {
    /// Wrap a provisioned master secret.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl Drop for MasterSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// Ephemeral card-lock key (`Kcl`) produced by one authentication handshake.
///
/// Recomputed per handshake from the master secret, the fresh nonce, and
/// the card's response. Never cached across calls.
pub struct CardLockKey {
    bytes: [u8; 32],
}

impl CardLockKey {
    pub(crate) fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl Drop for CardLockKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// Parity tag selecting which of the two concurrently valid control words
/// applies to a packet.
///
/// Overlapping key-rotation windows keep both words live: packets carry the
/// parity of the word they were scrambled under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyParity {
    /// Even control word.
    Even,
    /// Odd control word.
    Odd,
}

/// One key epoch's even/odd control words.
///
/// # Invariants
///
/// The pair is always produced and replaced as a unit; readers take an
/// atomic snapshot and extract one half with [`ControlWordPair::word`].
/// A consumer can never observe one half updated and the other stale.
#[derive(Clone)]
pub struct ControlWordPair {
    even: [u8; 16],
    odd: [u8; 16],
}

impl ControlWordPair {
    /// Build a pair from its halves.
    pub fn new(even: [u8; 16], odd: [u8; 16]) -> Self {
        Self { even, odd }
    }

    /// Copy out the word for `parity`.
    pub fn word(&self, parity: KeyParity) -> [u8; 16] {
        match parity {
            KeyParity::Even => self.even,
            KeyParity::Odd => self.odd,
        }
    }
}

impl Drop for ControlWordPair {
    fn drop(&mut self) {
        self.even.zeroize();
        self.odd.zeroize();
    }
}
