//! Warden Core
//!
//! Asynchronous key delivery and per-packet descrambling for a
//! conditional-access media transport stream. The surrounding
//! demultiplexer feeds raw ECM blobs in (fire-and-forget) and calls the
//! descrambler once per encrypted packet (latency-sensitive); this crate
//! keeps those two rates decoupled.
//!
//! # Architecture
//!
//! ```text
//! demux ── submit(ecm) ──► KeyPipeline ──► worker thread
//!                              │               │ KeyDeriver + CardSession
//!                              │               ▼
//!                              │        ControlWordPair (shared, locked)
//!                              │               │
//! demux ── descramble() ──► Descrambler ◄── acquire(parity)
//!                              │
//!                              ▼
//!                        AES-128-CTR in place
//! ```
//!
//! The packet path never touches the card: `acquire` reads the shared
//! pair and blocks only at a key-parity flip, bounded by the configured
//! epoch wait. Everything slow (handshake, ECM exchange, retry) happens
//! on the single worker thread.
//!
//! # Components
//!
//! - [`KeyPipeline`]: ECM queue, derivation worker, shared control words
//! - [`Descrambler`]: IV construction, key-schedule cache, in-place CTR
//! - [`CipherEngine`] / [`AesCtrEngine`]: the cipher seam
//! - [`PipelineConfig`]: epoch-wait bound and worker naming

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod cipher;
mod config;
mod descrambler;
mod error;
mod pipeline;

pub use cipher::{AesCtrEngine, CipherEngine};
pub use config::{DEFAULT_EPOCH_WAIT, PipelineConfig};
pub use descrambler::{CLEAR_PREFIX_LEN, Descrambler, PacketMeta, packet_iv};
pub use error::{DescrambleError, PipelineError};
pub use pipeline::KeyPipeline;
pub use warden_crypto::{ControlWordPair, KeyParity, MasterSecret};
