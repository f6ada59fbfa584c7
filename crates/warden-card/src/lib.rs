//! Smart Card Session Boundary
//!
//! The seam between the Warden descrambler core and the physical
//! conditional-access card. This crate defines the command/response framing
//! types, the [`CardSession`] trait the key-derivation engine drives, and a
//! scripted in-memory card for tests.
//!
//! The physical transport (PC/SC reader, device driver) is deliberately not
//! implemented here: a production session wraps a reader library behind
//! [`CardSession`], while the rest of the workspace stays device-free.
//!
//! # Components
//!
//! - [`ApduCommand`] / [`ApduResponse`]: ISO 7816 case-4 short framing
//! - [`CardSession`]: connect/init lifecycle, transmit, transactions
//! - [`ScopedTransaction`]: RAII exclusive-access window over a session
//! - [`CardError`]: transport status taxonomy with retryability
//! - [`testing::ScriptedCard`]: programmable card double for tests

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod apdu;
mod error;
mod session;

pub mod testing;

pub use apdu::{ApduCommand, ApduResponse, STATUS_SUCCESS};
pub use error::CardError;
pub use session::{CardSession, ScopedTransaction, ensure_ready};
