//! End-to-end pipeline semantics against a scripted card.
//!
//! Each test spawns a real pipeline (worker thread included) with a
//! seeded nonce source so the scripted handshake responses verify, then
//! asserts on the acquire/submit contract: duplicate suppression, the
//! asymmetric epoch-boundary wait, and failure containment.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use warden_card::{CardError, testing::ScriptedCard};
use warden_core::{KeyParity, KeyPipeline, MasterSecret, PipelineConfig};

const ECM_INIT_OFFSET: usize = 0x04;
const ECM_INIT_LEN: usize = 0x17;

fn master() -> MasterSecret {
    let mut bytes = [0u8; 32];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = 0x80 | i as u8;
    }
    MasterSecret::new(bytes)
}

/// Nonces the worker will draw from a ChaCha20 stream with `seed`.
fn nonces<const N: usize>(seed: u64) -> [[u8; 8]; N] {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut out = [[0u8; 8]; N];
    for nonce in &mut out {
        rng.fill_bytes(nonce);
    }
    out
}

fn auth_response(master: &MasterSecret, nonce: [u8; 8], card_response: [u8; 8]) -> Vec<u8> {
    let kcl: [u8; 32] = Sha256::new()
        .chain_update(master.as_bytes())
        .chain_update(nonce)
        .chain_update(card_response)
        .finalize()
        .into();
    let hash: [u8; 32] = Sha256::new().chain_update(kcl).chain_update(nonce).finalize().into();

    let mut raw = vec![0u8; 6];
    raw.extend_from_slice(&card_response);
    raw.extend_from_slice(&hash);
    raw.extend_from_slice(&[0x90, 0x00]);
    raw
}

fn ecm_response(masked: [u8; 32]) -> Vec<u8> {
    let mut raw = vec![0u8; 6];
    raw.extend_from_slice(&masked);
    raw.extend_from_slice(&[0x90, 0x00]);
    raw
}

/// Control words the engine will derive for this exchange.
fn expected_words(
    master: &MasterSecret,
    nonce: [u8; 8],
    card_response: [u8; 8],
    ecm: &[u8],
    masked: [u8; 32],
) -> ([u8; 16], [u8; 16]) {
    let kcl: [u8; 32] = Sha256::new()
        .chain_update(master.as_bytes())
        .chain_update(nonce)
        .chain_update(card_response)
        .finalize()
        .into();
    let digest: [u8; 32] = Sha256::new()
        .chain_update(kcl)
        .chain_update(&ecm[ECM_INIT_OFFSET..ECM_INIT_OFFSET + ECM_INIT_LEN])
        .finalize()
        .into();

    let mut even = [0u8; 16];
    let mut odd = [0u8; 16];
    for i in 0..16 {
        odd[i] = digest[i] ^ masked[i];
        even[i] = digest[i + 16] ^ masked[i + 16];
    }
    (even, odd)
}

fn sample_ecm(tag: u8) -> Vec<u8> {
    (0u8..32).map(|i| i.wrapping_add(tag)).collect()
}

/// Poll until `cond` holds or `deadline` elapses.
fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn short_config(epoch_wait: Duration) -> PipelineConfig {
    PipelineConfig { epoch_wait, ..PipelineConfig::default() }
}

#[test]
fn acquire_without_submit_never_blocks() {
    let pipeline =
        KeyPipeline::spawn(MasterSecret::new([0u8; 32]), PipelineConfig::default()).unwrap();

    let start = Instant::now();
    assert_eq!(pipeline.acquire(KeyParity::Even), None);
    assert_eq!(pipeline.acquire(KeyParity::Odd), None);
    assert!(start.elapsed() < Duration::from_secs(1), "must not wait with nothing requested");
}

#[test]
fn duplicate_submit_is_a_no_op() {
    let master = master();
    let [nonce] = nonces(21);
    let ecm = sample_ecm(0);

    let mut card = ScriptedCard::new();
    card.push_response(&auth_response(&master, nonce, [0x01; 8]))
        .push_response(&ecm_response([0x44; 32]));
    let log = card.log();

    let pipeline = KeyPipeline::spawn_with_rng(
        master.clone(),
        short_config(Duration::from_secs(2)),
        ChaCha20Rng::seed_from_u64(21),
    )
    .unwrap();
    pipeline.set_card_session(Box::new(card));

    assert!(pipeline.submit(&ecm));
    assert!(pipeline.submit(&ecm), "byte-identical resubmission is a successful no-op");

    assert!(wait_until(Duration::from_secs(2), || {
        pipeline.pending_ecms() == 0 && pipeline.has_control_words()
    }));

    assert_eq!(log.command_count(), 2, "one handshake and one ECM exchange, not two");
    assert!(pipeline.acquire(KeyParity::Even).is_some());
}

#[test]
fn same_parity_acquires_return_same_word_without_blocking() {
    let master = master();
    let [nonce] = nonces(22);
    let ecm = sample_ecm(1);
    let masked = [0x5C; 32];
    let (expected_even, _) = expected_words(&master, nonce, [0x02; 8], &ecm, masked);

    let mut card = ScriptedCard::new();
    card.push_response(&auth_response(&master, nonce, [0x02; 8]))
        .push_response(&ecm_response(masked));

    let pipeline = KeyPipeline::spawn_with_rng(
        master.clone(),
        short_config(Duration::from_secs(2)),
        ChaCha20Rng::seed_from_u64(22),
    )
    .unwrap();
    pipeline.set_card_session(Box::new(card));
    assert!(pipeline.submit(&ecm));

    let first = pipeline.acquire(KeyParity::Even);
    assert_eq!(first, Some(expected_even));

    let start = Instant::now();
    let second = pipeline.acquire(KeyParity::Even);
    assert!(start.elapsed() < Duration::from_secs(1), "same parity must not wait");
    assert_eq!(second, first);
}

#[test]
fn parity_flip_waits_for_inflight_derivation() {
    let master = master();
    let [nonce1, nonce2] = nonces(23);
    let ecm1 = sample_ecm(2);
    let ecm2 = sample_ecm(3);
    let masked1 = [0x11; 32];
    let masked2 = [0x99; 32];
    let (_, old_odd) = expected_words(&master, nonce1, [0x03; 8], &ecm1, masked1);
    let (_, new_odd) = expected_words(&master, nonce2, [0x04; 8], &ecm2, masked2);
    assert_ne!(old_odd, new_odd);

    let mut card = ScriptedCard::new();
    card.push_response(&auth_response(&master, nonce1, [0x03; 8]))
        .push_response(&ecm_response(masked1))
        // Second derivation is slow: the parity flip must wait it out
        .push_response_delayed(
            &auth_response(&master, nonce2, [0x04; 8]),
            Duration::from_millis(150),
        )
        .push_response(&ecm_response(masked2));

    let pipeline = KeyPipeline::spawn_with_rng(
        master.clone(),
        short_config(Duration::from_secs(5)),
        ChaCha20Rng::seed_from_u64(23),
    )
    .unwrap();
    pipeline.set_card_session(Box::new(card));

    assert!(pipeline.submit(&ecm1));
    assert!(pipeline.acquire(KeyParity::Even).is_some());

    assert!(pipeline.submit(&ecm2));
    // Parity flip while the second derivation is still on the card:
    // must return the new word, never the stale one.
    assert_eq!(pipeline.acquire(KeyParity::Odd), Some(new_odd));
}

#[test]
fn parity_flip_times_out_when_derivation_stalls() {
    let master = master();
    let [nonce] = nonces(24);
    let ecm = sample_ecm(4);

    let mut card = ScriptedCard::new();
    card.push_response_delayed(
        &auth_response(&master, nonce, [0x05; 8]),
        Duration::from_secs(2),
    )
    .push_response(&ecm_response([0x21; 32]));

    let pipeline = KeyPipeline::spawn_with_rng(
        master.clone(),
        short_config(Duration::from_millis(150)),
        ChaCha20Rng::seed_from_u64(24),
    )
    .unwrap();
    pipeline.set_card_session(Box::new(card));
    assert!(pipeline.submit(&ecm));

    let start = Instant::now();
    let word = pipeline.acquire(KeyParity::Odd);
    let elapsed = start.elapsed();

    assert_eq!(word, None, "bounded wait must give up, not stall the packet path");
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(1), "must time out well before the card answers");
}

#[test]
fn failed_derivation_keeps_previous_words() {
    let master = master();
    let [nonce1, nonce2] = nonces(25);
    let ecm1 = sample_ecm(5);
    let ecm2 = sample_ecm(6);
    let masked1 = [0x6D; 32];
    let (expected_even, expected_odd) = expected_words(&master, nonce1, [0x06; 8], &ecm1, masked1);

    let mut card = ScriptedCard::new();
    card.push_response(&auth_response(&master, nonce1, [0x06; 8]))
        .push_response(&ecm_response(masked1))
        // Second derivation: handshake fine, ECM exchange refused
        .push_response(&auth_response(&master, nonce2, [0x07; 8]))
        .push_response(&[0x69, 0x85]);

    let pipeline = KeyPipeline::spawn_with_rng(
        master.clone(),
        short_config(Duration::from_secs(2)),
        ChaCha20Rng::seed_from_u64(25),
    )
    .unwrap();
    pipeline.set_card_session(Box::new(card));

    assert!(pipeline.submit(&ecm1));
    assert_eq!(pipeline.acquire(KeyParity::Even), Some(expected_even));

    assert!(pipeline.submit(&ecm2));
    assert!(wait_until(Duration::from_secs(2), || pipeline.pending_ecms() == 0));

    // The failed ECM was dropped; the previous pair is still authoritative
    // and the worker is still alive.
    assert_eq!(pipeline.acquire(KeyParity::Odd), Some(expected_odd));
    assert_eq!(pipeline.acquire(KeyParity::Even), Some(expected_even));
}

#[test]
fn worker_without_card_session_drops_ecms() {
    let pipeline = KeyPipeline::spawn(
        MasterSecret::new([0u8; 32]),
        short_config(Duration::from_millis(500)),
    )
    .unwrap();

    assert!(pipeline.submit(&sample_ecm(7)));
    assert!(wait_until(Duration::from_secs(2), || pipeline.pending_ecms() == 0));

    assert!(!pipeline.has_control_words());
    assert_eq!(pipeline.acquire(KeyParity::Even), None);
}

#[test]
fn dedup_is_keyed_on_submission_not_outcome() {
    let master = master();
    let [nonce1, nonce2] = nonces(26);
    let ecm1 = sample_ecm(8);
    let ecm2 = sample_ecm(9);

    let mut card = ScriptedCard::new();
    // ecm1 fails its exchange; ecm2 derives cleanly
    card.push_response(&auth_response(&master, nonce1, [0x08; 8]))
        .push_error(CardError::Transport("card yanked".to_string()))
        .push_response(&auth_response(&master, nonce2, [0x09; 8]))
        .push_response(&ecm_response([0x2E; 32]));
    let log = card.log();

    let pipeline = KeyPipeline::spawn_with_rng(
        master.clone(),
        short_config(Duration::from_secs(2)),
        ChaCha20Rng::seed_from_u64(26),
    )
    .unwrap();
    pipeline.set_card_session(Box::new(card));

    assert!(pipeline.submit(&ecm1));
    assert!(wait_until(Duration::from_secs(2), || pipeline.pending_ecms() == 0));
    assert_eq!(log.command_count(), 2);

    // The last-seen comparison advanced at submission time: the failed
    // bytes are still "seen" and a retransmission is suppressed.
    assert!(pipeline.submit(&ecm1));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(log.command_count(), 2, "retransmitted failed ECM is not re-derived");

    // A different ECM goes through and derivation recovers.
    assert!(pipeline.submit(&ecm2));
    assert!(wait_until(Duration::from_secs(2), || pipeline.has_control_words()));
    assert_eq!(log.command_count(), 4);
}

#[test]
fn concurrent_submit_and_acquire_do_not_interleave_state() {
    let master = master();
    let [nonce] = nonces(27);
    let ecm = sample_ecm(10);
    let masked = [0x13; 32];
    let (expected_even, expected_odd) = expected_words(&master, nonce, [0x0A; 8], &ecm, masked);

    let mut card = ScriptedCard::new();
    card.push_response(&auth_response(&master, nonce, [0x0A; 8]))
        .push_response(&ecm_response(masked));

    let pipeline = Arc::new(
        KeyPipeline::spawn_with_rng(
            master.clone(),
            short_config(Duration::from_secs(5)),
            ChaCha20Rng::seed_from_u64(27),
        )
        .unwrap(),
    );
    pipeline.set_card_session(Box::new(card));

    // Submitter thread spams the same ECM while a consumer acquires.
    let submitter = {
        let pipeline = Arc::clone(&pipeline);
        let ecm = ecm.clone();
        thread::spawn(move || {
            for _ in 0..100 {
                assert!(pipeline.submit(&ecm));
            }
        })
    };

    let even = pipeline.acquire(KeyParity::Even);
    submitter.join().unwrap();

    // However the calls interleaved, the words are the derived pair, as
    // a unit, or nothing at all.
    if let Some(word) = even {
        assert_eq!(word, expected_even);
    }
    assert_eq!(pipeline.acquire(KeyParity::Odd), Some(expected_odd));
    assert_eq!(pipeline.acquire(KeyParity::Even), Some(expected_even));
}
