//! Authentication handshake and ECM-to-control-word derivation.
//!
//! Both operations drive a [`CardSession`] through fixed command codes and
//! response geometry. `derive_control_words` wraps the whole dialogue in
//! one exclusive transaction and a bounded two-attempt retry: handshake
//! randomness means a third attempt can never do better than the second,
//! and the transaction scope keeps retries from racing other card users.

use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};
use warden_card::{ApduCommand, CardError, CardSession, ScopedTransaction, ensure_ready};
use zeroize::Zeroize;

use crate::{
    error::DerivationError,
    keys::{CardLockKey, ControlWordPair, MasterSecret},
};

/// Maximum total attempts for one `derive_control_words` call.
pub const MAX_DERIVE_ATTEMPTS: u32 = 2;

/// Authentication handshake command.
const AUTH_COMMAND: ApduCommand = ApduCommand::new(0x90, 0xA0, 0x00, 0x01);

/// ECM processing command.
const ECM_COMMAND: ApduCommand = ApduCommand::new(0x90, 0x34, 0x00, 0x01);

/// Fixed prefix preceding the nonce in the handshake payload.
const AUTH_PREFIX: [u8; 8] = [0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x8A, 0xF7];

/// Offset of the 8-byte card-response field in the handshake response.
const AUTH_RESPONSE_OFFSET: usize = 0x06;
const AUTH_RESPONSE_LEN: usize = 8;

/// Offset of the 32-byte verification hash in the handshake response.
const AUTH_HASH_OFFSET: usize = 0x0E;

/// Offset of the 32-byte masked-key field in the ECM response.
const ECM_RESPONSE_OFFSET: usize = 0x06;
const ECM_RESPONSE_LEN: usize = 32;

/// Geometry of the initialization segment inside the ECM itself.
const ECM_INIT_OFFSET: usize = 0x04;
const ECM_INIT_LEN: usize = 0x17;

/// Shortest ECM that still contains the initialization segment.
pub const MIN_ECM_LEN: usize = ECM_INIT_OFFSET + ECM_INIT_LEN;

/// One failed attempt, tagged with whether the bounded loop may try again.
struct AttemptFailure {
    error: DerivationError,
    retry: bool,
}

impl AttemptFailure {
    fn retryable(error: impl Into<DerivationError>) -> Self {
        Self { error: error.into(), retry: true }
    }

    fn fatal(error: impl Into<DerivationError>) -> Self {
        Self { error: error.into(), retry: false }
    }
}

/// Card transport faults retry only when re-running the transaction could
/// plausibly change the outcome.
fn classify(error: CardError) -> AttemptFailure {
    if error.is_retryable() {
        AttemptFailure::retryable(error)
    } else {
        AttemptFailure::fatal(error)
    }
}

/// Key derivation engine.
///
/// Stateless across calls apart from the attempt bound inside a single
/// [`KeyDeriver::derive_control_words`] invocation; holds only the
/// provisioning master secret.
pub struct KeyDeriver {
    master: MasterSecret,
}

impl KeyDeriver {
    /// Engine over a provisioned master secret.
    pub fn new(master: MasterSecret) -> Self {
        Self { master }
    }

    /// Run the authentication handshake and derive the card-lock key.
    ///
    /// The nonce must be fresh for every call; [`KeyDeriver::derive_control_words`]
    /// draws one per attempt from its RNG.
    ///
    /// # Errors
    ///
    /// [`DerivationError::CardComm`] on transport failure or a refusal
    /// status; [`DerivationError::AuthVerification`] when the card's
    /// response hash does not match `SHA-256(Kcl ‖ nonce)`.
    pub fn authenticate<S>(
        &self,
        session: &mut S,
        nonce: [u8; 8],
    ) -> Result<CardLockKey, DerivationError>
    where
        S: CardSession + ?Sized,
    {
        ensure_ready(session)?;

        let mut payload = Vec::with_capacity(AUTH_PREFIX.len() + nonce.len());
        payload.extend_from_slice(&AUTH_PREFIX);
        payload.extend_from_slice(&nonce);

        let command = AUTH_COMMAND.case4_short(&payload, 0x00)?;
        let response = session.transmit(&command)?;
        if !response.is_success() {
            let (sw1, sw2) = response.status();
            return Err(CardError::Status { sw1, sw2 }.into());
        }

        let data = response.data();
        let needed = AUTH_HASH_OFFSET + 32;
        if data.len() < needed {
            return Err(CardError::Framing { expected: needed, actual: data.len() }.into());
        }

        let card_response = &data[AUTH_RESPONSE_OFFSET..AUTH_RESPONSE_OFFSET + AUTH_RESPONSE_LEN];
        let verification = &data[AUTH_HASH_OFFSET..AUTH_HASH_OFFSET + 32];

        let mut kcl: [u8; 32] = Sha256::new()
            .chain_update(self.master.as_bytes())
            .chain_update(nonce)
            .chain_update(card_response)
            .finalize()
            .into();

        let expected: [u8; 32] =
            Sha256::new().chain_update(kcl).chain_update(nonce).finalize().into();

        if expected.as_slice() != verification {
            kcl.zeroize();
            return Err(DerivationError::AuthVerification);
        }

        trace!("handshake verified, card-lock key derived");
        Ok(CardLockKey::new(kcl))
    }

    /// Derive the even/odd control-word pair for one ECM.
    ///
    /// Opens an exclusive transaction covering the handshake and the ECM
    /// exchange, retrying the whole dialogue at most once. A fresh nonce
    /// is drawn from `rng` per attempt.
    ///
    /// # Errors
    ///
    /// - [`DerivationError::EcmTooShort`] before any card contact
    /// - [`DerivationError::DerivationFailed`] when both attempts failed
    ///   on a retryable fault (handshake failure, card reset, invalidated
    ///   session)
    /// - [`DerivationError::CardComm`] immediately on any other transport
    ///   fault or refusal status
    pub fn derive_control_words<S, R>(
        &self,
        session: &mut S,
        rng: &mut R,
        ecm: &[u8],
    ) -> Result<ControlWordPair, DerivationError>
    where
        S: CardSession + ?Sized,
        R: RngCore + ?Sized,
    {
        if ecm.len() < MIN_ECM_LEN {
            return Err(DerivationError::EcmTooShort { expected: MIN_ECM_LEN, actual: ecm.len() });
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.derive_once(session, rng, ecm) {
                Ok(pair) => {
                    debug!(attempts, "control words derived");
                    return Ok(pair);
                },
                Err(failure) if failure.retry => {
                    warn!(attempt = attempts, error = %failure.error, "derivation attempt failed");
                    if attempts >= MAX_DERIVE_ATTEMPTS {
                        return Err(DerivationError::DerivationFailed { attempts });
                    }
                },
                Err(failure) => return Err(failure.error),
            }
        }
    }

    /// One full handshake + ECM exchange inside its own transaction.
    fn derive_once<S, R>(
        &self,
        session: &mut S,
        rng: &mut R,
        ecm: &[u8],
    ) -> Result<ControlWordPair, AttemptFailure>
    where
        S: CardSession + ?Sized,
        R: RngCore + ?Sized,
    {
        ensure_ready(session).map_err(classify)?;
        let mut txn = ScopedTransaction::begin(session).map_err(classify)?;

        let mut nonce = [0u8; 8];
        rng.fill_bytes(&mut nonce);

        // Any handshake failure, verification included, consumes the
        // attempt: a desynced card often recovers on the second dialogue.
        let kcl = self.authenticate(&mut *txn, nonce).map_err(AttemptFailure::retryable)?;

        let command = ECM_COMMAND.case4_short(ecm, 0x00).map_err(AttemptFailure::fatal)?;
        let response = txn.transmit(&command).map_err(classify)?;
        if !response.is_success() {
            let (sw1, sw2) = response.status();
            return Err(AttemptFailure::fatal(CardError::Status { sw1, sw2 }));
        }

        let data = response.data();
        let needed = ECM_RESPONSE_OFFSET + ECM_RESPONSE_LEN;
        if data.len() < needed {
            return Err(AttemptFailure::fatal(CardError::Framing {
                expected: needed,
                actual: data.len(),
            }));
        }

        let response_field = &data[ECM_RESPONSE_OFFSET..needed];
        let init_segment = &ecm[ECM_INIT_OFFSET..ECM_INIT_OFFSET + ECM_INIT_LEN];

        let digest: [u8; 32] = Sha256::new()
            .chain_update(kcl.as_bytes())
            .chain_update(init_segment)
            .finalize()
            .into();

        let mut keystream = digest;
        for (byte, masked) in keystream.iter_mut().zip(response_field) {
            *byte ^= masked;
        }

        let mut odd = [0u8; 16];
        let mut even = [0u8; 16];
        odd.copy_from_slice(&keystream[..16]);
        even.copy_from_slice(&keystream[16..]);
        keystream.zeroize();

        trace!(odd = %hex::encode(odd), even = %hex::encode(even), "control word split");

        Ok(ControlWordPair::new(even, odd))
    }
}
