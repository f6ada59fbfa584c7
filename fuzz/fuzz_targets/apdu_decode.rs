//! Fuzz target for APDU response parsing.
//!
//! Arbitrary bytes must either parse into a (data, status word) split or
//! return a framing error. The parser should NEVER panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use warden_card::ApduResponse;

fuzz_target!(|data: &[u8]| {
    if let Ok(response) = ApduResponse::parse(data) {
        // The split must be lossless
        assert_eq!(response.data().len() + 2, data.len());
    }
});
