//! Card session lifecycle and exclusive transactions.

use std::ops::{Deref, DerefMut};

use crate::{apdu::ApduResponse, error::CardError};

/// Request/response channel to a conditional-access smart card.
///
/// Implementations wrap a physical reader stack (or a scripted double in
/// tests). All methods are synchronous: card dialogue is slow and stateful,
/// and the derivation engine serializes it explicitly.
///
/// # Invariants
///
/// - `transmit` may only be called on a session that is initialized and
///   connected; [`ensure_ready`] establishes that precondition.
/// - `begin_transaction` / `end_transaction` bracket an exclusive-access
///   window: no other exchange may interleave with the bracketed commands.
///   Use [`ScopedTransaction`] rather than calling the pair directly.
pub trait CardSession {
    /// Establish the reader connection.
    fn connect(&mut self) -> Result<(), CardError>;

    /// True once [`CardSession::connect`] has succeeded.
    fn is_connected(&self) -> bool;

    /// One-time reader/context initialization, before `connect`.
    fn init(&mut self) -> Result<(), CardError>;

    /// True once [`CardSession::init`] has succeeded.
    fn is_inited(&self) -> bool;

    /// Send a raw command APDU and wait for the card's response.
    fn transmit(&mut self, command: &[u8]) -> Result<ApduResponse, CardError>;

    /// Open an exclusive-access window on the card.
    fn begin_transaction(&mut self) -> Result<(), CardError>;

    /// Close the window opened by [`CardSession::begin_transaction`].
    fn end_transaction(&mut self);
}

/// Initialize and connect a session if it is not already.
///
/// Init precedes connect; both are skipped when already done. Inherited
/// readiness ordering from the original card driver.
pub fn ensure_ready<S: CardSession + ?Sized>(session: &mut S) -> Result<(), CardError> {
    if !session.is_inited() {
        session.init()?;
    }
    if !session.is_connected() {
        session.connect()?;
    }
    Ok(())
}

/// RAII exclusive-access window over a card session.
///
/// Holds the transaction for its whole lifetime and releases it on drop,
/// so early returns inside a multi-exchange protocol cannot leak the
/// card's exclusivity.
pub struct ScopedTransaction<'a, S: CardSession + ?Sized> {
    session: &'a mut S,
}

impl<'a, S: CardSession + ?Sized> ScopedTransaction<'a, S> {
    /// Begin a transaction and wrap the session in a releasing guard.
    pub fn begin(session: &'a mut S) -> Result<Self, CardError> {
        session.begin_transaction()?;
        Ok(Self { session })
    }
}

impl<S: CardSession + ?Sized> Deref for ScopedTransaction<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.session
    }
}

impl<S: CardSession + ?Sized> DerefMut for ScopedTransaction<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.session
    }
}

impl<S: CardSession + ?Sized> Drop for ScopedTransaction<'_, S> {
    fn drop(&mut self) {
        self.session.end_transaction();
    }
}
