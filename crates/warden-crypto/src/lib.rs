//! Warden Key Derivation Engine
//!
//! Turns entitlement control messages (ECMs) into content decryption keys
//! by way of a challenge-response dialogue with a conditional-access smart
//! card. Deterministic given the injected randomness; callers provide the
//! nonce source, so every derivation is reproducible under test.
//!
//! # Key Lifecycle
//!
//! Each derivation runs a fresh authentication handshake and one ECM
//! exchange inside a single exclusive card transaction:
//!
//! ```text
//! Master Secret ─┐
//! Nonce ─────────┼─ SHA-256 ──► Card-Lock Key (Kcl, ephemeral)
//! Card Response ─┘                     │
//!                                      ▼
//! ECM Init Segment ───────── SHA-256 ──► Digest
//!                                      │
//! Card ECM Response ───────── XOR ─────┤
//!                                      ▼
//!                        Control-Word Pair (odd ‖ even)
//! ```
//!
//! The card-lock key is recomputed on every handshake and zeroized as soon
//! as the derivation that produced it completes; only the resulting
//! even/odd control words leave this crate.
//!
//! # Security
//!
//! - Handshake freshness: an 8-byte nonce is drawn per attempt and never
//!   reused, so a replayed card response fails verification
//! - Response authentication: the card must prove knowledge of Kcl by
//!   echoing `SHA-256(Kcl ‖ nonce)`; a mismatch aborts the handshake with
//!   no key material accepted
//! - Bounded retry: a failed attempt is retried exactly once inside the
//!   same exclusive transaction scope, so retries cannot interleave with
//!   other card users

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod derivation;
mod error;
mod keys;

pub use derivation::{KeyDeriver, MAX_DERIVE_ATTEMPTS, MIN_ECM_LEN};
pub use error::DerivationError;
pub use keys::{CardLockKey, ControlWordPair, KeyParity, MasterSecret};
