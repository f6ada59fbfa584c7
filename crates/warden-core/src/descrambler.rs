//! Per-packet descrambling.
//!
//! Latency-sensitive path: one call per encrypted packet. The only
//! suspension point is the epoch-boundary wait inside
//! [`KeyPipeline::acquire`]; everything else is IV assembly and an
//! in-place keystream pass.

use std::sync::Arc;

use tracing::trace;
use warden_card::CardSession;
use warden_crypto::KeyParity;

use crate::{
    cipher::{AesCtrEngine, CipherEngine},
    error::DescrambleError,
    pipeline::KeyPipeline,
};

/// Unencrypted packet header prefix length.
pub const CLEAR_PREFIX_LEN: usize = 8;

/// Metadata of one scrambled packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMeta {
    /// Packet identifier (native byte order; swapped for the IV).
    pub packet_id: u16,
    /// Packet sequence number (native byte order; swapped for the IV).
    pub sequence: u32,
    /// Which control word the packet was scrambled under.
    pub parity: KeyParity,
}

/// Initialization vector for one packet.
///
/// The wire protocol is big-endian regardless of host order: bytes 0–1
/// are the packet identifier, bytes 2–5 the sequence number, bytes 6–15
/// zero.
pub fn packet_iv(packet_id: u16, sequence: u32) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..2].copy_from_slice(&packet_id.to_be_bytes());
    iv[2..6].copy_from_slice(&sequence.to_be_bytes());
    iv
}

/// In-place packet descrambler over a [`KeyPipeline`].
///
/// Caches the last control word installed in the cipher engine so a run
/// of same-parity packets pays for the key schedule once; the IV is
/// fresh per packet regardless.
pub struct Descrambler<E: CipherEngine = AesCtrEngine> {
    pipeline: Arc<KeyPipeline>,
    engine: E,
    last_key: Option<[u8; 16]>,
}

impl Descrambler<AesCtrEngine> {
    /// Descrambler with the AES-128-CTR engine.
    pub fn new(pipeline: Arc<KeyPipeline>) -> Self {
        Self::with_engine(pipeline, AesCtrEngine::new())
    }
}

impl<E: CipherEngine> Descrambler<E> {
    /// Descrambler over an explicit cipher engine.
    pub fn with_engine(pipeline: Arc<KeyPipeline>, engine: E) -> Self {
        Self { pipeline, engine, last_key: None }
    }

    /// Shared pipeline handle, for submitting ECMs from other threads.
    pub fn pipeline(&self) -> &Arc<KeyPipeline> {
        &self.pipeline
    }

    /// Queue an ECM for derivation. See [`KeyPipeline::submit`].
    pub fn submit_ecm(&self, ecm: &[u8]) -> bool {
        self.pipeline.submit(ecm)
    }

    /// Install or replace the card session used for derivation.
    pub fn set_card_session(&self, session: Box<dyn CardSession + Send>) {
        self.pipeline.set_card_session(session);
    }

    /// Descramble one packet in place.
    ///
    /// The first [`CLEAR_PREFIX_LEN`] bytes of `payload` are never
    /// touched; the keystream is applied from there on. On any error the
    /// whole payload is left unmodified and the caller decides whether
    /// to drop the packet or pass it through scrambled.
    pub fn descramble(
        &mut self,
        meta: PacketMeta,
        payload: &mut [u8],
    ) -> Result<(), DescrambleError> {
        if payload.len() < CLEAR_PREFIX_LEN {
            return Err(DescrambleError::PayloadTooShort { len: payload.len() });
        }

        let Some(key) = self.pipeline.acquire(meta.parity) else {
            return Err(DescrambleError::NoKeyAvailable { parity: meta.parity });
        };

        let iv = packet_iv(meta.packet_id, meta.sequence);

        if self.last_key != Some(key) {
            self.engine.set_key(key);
            self.last_key = Some(key);
            trace!(parity = ?meta.parity, "cipher rekeyed");
        }
        self.engine.set_iv(iv);
        self.engine.apply_keystream(&mut payload[CLEAR_PREFIX_LEN..]);

        trace!(
            packet_id = meta.packet_id,
            sequence = meta.sequence,
            iv = %hex::encode(iv),
            scrambled_len = payload.len() - CLEAR_PREFIX_LEN,
            "packet descrambled"
        );
        Ok(())
    }
}
