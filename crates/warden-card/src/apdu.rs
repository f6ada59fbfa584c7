//! APDU command and response framing.
//!
//! Only the case-4 short shape is needed here: every exchange the
//! derivation protocol performs sends a payload and expects a response.
//! The framing is a pure byte layout; nothing in this module talks to a
//! reader.

use crate::error::CardError;

/// Success status word `90 00`.
pub const STATUS_SUCCESS: (u8, u8) = (0x90, 0x00);

/// APDU command header.
///
/// Holds the four fixed header bytes; [`ApduCommand::case4_short`] appends
/// payload and expected-length fields to produce the wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApduCommand {
    /// Class byte.
    pub cla: u8,
    /// Instruction byte.
    pub ins: u8,
    /// First parameter byte.
    pub p1: u8,
    /// Second parameter byte.
    pub p2: u8,
}

impl ApduCommand {
    /// Build a command header.
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self { cla, ins, p1, p2 }
    }

    /// Encode as a case-4 short APDU: `[cla ins p1 p2 lc data.. le]`.
    ///
    /// # Errors
    ///
    /// Short APDUs carry a one-byte length field, so `data` must be 1..=255
    /// bytes; anything else is [`CardError::InvalidCommand`].
    pub fn case4_short(&self, data: &[u8], le: u8) -> Result<Vec<u8>, CardError> {
        if data.is_empty() || data.len() > 0xFF {
            return Err(CardError::InvalidCommand { len: data.len() });
        }

        let mut wire = Vec::with_capacity(6 + data.len());
        wire.push(self.cla);
        wire.push(self.ins);
        wire.push(self.p1);
        wire.push(self.p2);
        wire.push(data.len() as u8);
        wire.extend_from_slice(data);
        wire.push(le);
        Ok(wire)
    }
}

/// APDU response: data field plus trailing status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    data: Vec<u8>,
    sw1: u8,
    sw2: u8,
}

impl ApduResponse {
    /// Split raw response bytes into data and status word.
    ///
    /// # Errors
    ///
    /// A response without the two status bytes is [`CardError::Framing`].
    pub fn parse(raw: &[u8]) -> Result<Self, CardError> {
        if raw.len() < 2 {
            return Err(CardError::Framing { expected: 2, actual: raw.len() });
        }

        let (data, status) = raw.split_at(raw.len() - 2);
        Ok(Self { data: data.to_vec(), sw1: status[0], sw2: status[1] })
    }

    /// True when the status word is `90 00`.
    pub fn is_success(&self) -> bool {
        (self.sw1, self.sw2) == STATUS_SUCCESS
    }

    /// Response data field, status word excluded.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Status word as `(sw1, sw2)`.
    pub fn status(&self) -> (u8, u8) {
        (self.sw1, self.sw2)
    }
}
