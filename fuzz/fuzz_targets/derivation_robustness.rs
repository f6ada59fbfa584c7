//! Fuzz target for the derivation engine against a hostile card.
//!
//! The same arbitrary bytes serve as ECM and as every card response:
//! whatever geometry they have, derivation must fail cleanly or succeed,
//! never panic or over-read.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rand::rngs::mock::StepRng;
use warden_card::testing::ScriptedCard;
use warden_crypto::{KeyDeriver, MasterSecret};

fuzz_target!(|data: &[u8]| {
    let deriver = KeyDeriver::new(MasterSecret::new([0u8; 32]));

    let mut card = ScriptedCard::new();
    // Enough scripted exchanges to survive the retry loop
    card.push_response(data).push_response(data).push_response(data).push_response(data);

    let mut rng = StepRng::new(0, 1);
    let _ = deriver.derive_control_words(&mut card, &mut rng, data);
});
