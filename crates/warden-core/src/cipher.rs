//! Stream cipher seam and the AES-128-CTR engine.
//!
//! The packet path talks to [`CipherEngine`] so tests can substitute an
//! observable double; production uses [`AesCtrEngine`]. The `aes` crate
//! dispatches between hardware-accelerated and portable block
//! implementations at runtime, and both produce identical bytes, so the
//! engine needs no selection logic of its own.

use aes::{
    Aes128,
    cipher::{BlockEncrypt, KeyInit},
};
use tracing::error;

/// Counter-mode stream cipher over a 128-bit block cipher.
///
/// Contract: for identical key, IV, and input, every implementation must
/// produce identical output. `set_key` may be expensive (key schedule);
/// `set_iv` must be cheap, it is called once per packet.
pub trait CipherEngine {
    /// Install a 16-byte key, rebuilding the key schedule.
    fn set_key(&mut self, key: [u8; 16]);

    /// Set the initial counter block for the next `apply_keystream` run.
    fn set_iv(&mut self, iv: [u8; 16]);

    /// XOR the keystream into `data` in place.
    fn apply_keystream(&mut self, data: &mut [u8]);
}

/// AES-128-CTR with a big-endian 128-bit counter.
///
/// The key schedule is cached across packets; only the counter block is
/// reset per packet. Encrypt and decrypt are the same operation.
pub struct AesCtrEngine {
    schedule: Option<Aes128>,
    counter: [u8; 16],
}

impl AesCtrEngine {
    /// Engine with no key installed yet.
    pub fn new() -> Self {
        Self { schedule: None, counter: [0u8; 16] }
    }
}

impl Default for AesCtrEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CipherEngine for AesCtrEngine {
    fn set_key(&mut self, key: [u8; 16]) {
        self.schedule = Some(Aes128::new(&key.into()));
    }

    fn set_iv(&mut self, iv: [u8; 16]) {
        self.counter = iv;
    }

    fn apply_keystream(&mut self, data: &mut [u8]) {
        let Some(schedule) = &self.schedule else {
            error!("apply_keystream called before set_key; leaving buffer untouched");
            return;
        };

        for chunk in data.chunks_mut(16) {
            let mut keystream: aes::Block = self.counter.into();
            schedule.encrypt_block(&mut keystream);
            for (byte, pad) in chunk.iter_mut().zip(keystream.iter()) {
                *byte ^= pad;
            }
            increment_be(&mut self.counter);
        }
    }
}

/// Big-endian increment of the full 128-bit counter block.
fn increment_be(counter: &mut [u8; 16]) {
    for byte in counter.iter_mut().rev() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}
