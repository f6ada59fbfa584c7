//! Key delivery pipeline.
//!
//! Decouples ECM arrival (asynchronous, low rate) from control-word
//! consumption (synchronous, per packet). A single worker thread drains
//! the pending-ECM queue through the derivation engine into the shared
//! control-word pair; packet-path consumers read that pair through
//! [`KeyPipeline::acquire`].
//!
//! # Invariants
//!
//! - The worker is the sole consumer of the queue and the sole writer of
//!   the pair; the pair is replaced as a unit under its lock.
//! - The in-flight ECM stays at the queue front until its derivation
//!   finishes, so "queue empty" means "no derivation in flight".
//! - A failed ECM is dropped, never retried; the previous pair remains
//!   authoritative. The worker survives every derivation failure.
//! - The card-session slot lock is the process-level exclusivity region:
//!   while the worker derives, nothing else can reach the card.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use rand::RngCore;
use tracing::{debug, trace, warn};
use warden_card::CardSession;
use warden_crypto::{ControlWordPair, DerivationError, KeyDeriver, KeyParity, MasterSecret};

use crate::{config::PipelineConfig, error::PipelineError};

struct QueueState {
    queue: VecDeque<Vec<u8>>,
    last_ecm: Option<Vec<u8>>,
    running: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    cond: Condvar,
    words: Mutex<Option<ControlWordPair>>,
    marker: Mutex<Option<KeyParity>>,
    requested: AtomicBool,
    session: Mutex<Option<Box<dyn CardSession + Send>>>,
}

/// Asynchronous ECM-to-control-word delivery.
///
/// Owns the derivation worker; dropping the pipeline stops and joins it,
/// letting an in-flight card dialogue finish first.
pub struct KeyPipeline {
    shared: Arc<Shared>,
    epoch_wait: Duration,
    worker: Option<thread::JoinHandle<()>>,
}

impl KeyPipeline {
    /// Spawn a pipeline whose worker draws nonces from the OS RNG.
    pub fn spawn(master: MasterSecret, config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::spawn_with_rng(master, config, rand::rngs::OsRng)
    }

    /// Spawn with an explicit nonce source.
    ///
    /// A seeded RNG makes the worker's handshake nonces reproducible,
    /// which scripted-card tests rely on.
    pub fn spawn_with_rng<R>(
        master: MasterSecret,
        config: PipelineConfig,
        rng: R,
    ) -> Result<Self, PipelineError>
    where
        R: RngCore + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                last_ecm: None,
                running: true,
            }),
            cond: Condvar::new(),
            words: Mutex::new(None),
            marker: Mutex::new(None),
            requested: AtomicBool::new(false),
            session: Mutex::new(None),
        });

        let worker_shared = Arc::clone(&shared);
        let deriver = KeyDeriver::new(master);
        let worker = thread::Builder::new()
            .name(config.worker_name.clone())
            .spawn(move || worker_loop(&worker_shared, &deriver, rng))
            .map_err(|err| PipelineError::WorkerSpawn(err.to_string()))?;

        Ok(Self { shared, epoch_wait: config.epoch_wait, worker: Some(worker) })
    }

    /// Install or replace the card session the worker derives against.
    pub fn set_card_session(&self, session: Box<dyn CardSession + Send>) {
        *self.shared.session.lock() = Some(session);
    }

    /// Queue an ECM for derivation.
    ///
    /// Broadcast carousels retransmit the same ECM many times per second;
    /// a submission byte-identical to the previous one is a successful
    /// no-op so repeats neither hit the card nor starve it. Never blocks
    /// beyond the queue lock. Returns `false` only after shutdown.
    pub fn submit(&self, ecm: &[u8]) -> bool {
        {
            let mut state = self.shared.state.lock();
            if !state.running {
                return false;
            }
            if state.last_ecm.as_deref() == Some(ecm) {
                trace!(ecm_len = ecm.len(), "duplicate ECM suppressed");
                return true;
            }
            state.last_ecm = Some(ecm.to_vec());
            state.queue.push_back(ecm.to_vec());
        }
        self.shared.requested.store(true, Ordering::Release);
        self.shared.cond.notify_all();
        debug!(ecm_len = ecm.len(), "ECM queued for derivation");
        true
    }

    /// Fetch the current control word for `parity`.
    ///
    /// Asymmetric wait policy: a request for the same parity as the
    /// previous call returns the stored word immediately, while a parity
    /// flip marks a key-epoch boundary and waits (bounded by the
    /// configured epoch wait) for any in-flight derivation to land, so a
    /// consumer can never read a stale word across the boundary.
    ///
    /// Returns `None` when derivation has never been requested, when the
    /// boundary wait times out, or when no derivation has ever succeeded.
    pub fn acquire(&self, parity: KeyParity) -> Option<[u8; 16]> {
        if !self.shared.requested.load(Ordering::Acquire) {
            return None;
        }

        // The marker lock serializes epoch-boundary decisions between
        // concurrent consumers.
        let mut marker = self.shared.marker.lock();
        if *marker != Some(parity) {
            if !self.wait_for_epoch() {
                debug!(?parity, "timed out waiting for key epoch boundary");
                return None;
            }
            trace!(?parity, "key epoch boundary crossed");
        }
        *marker = Some(parity);
        drop(marker);

        let words = self.shared.words.lock();
        words.as_ref().map(|pair| pair.word(parity))
    }

    /// True once any derivation has succeeded.
    pub fn has_control_words(&self) -> bool {
        self.shared.words.lock().is_some()
    }

    /// ECMs queued or in flight, duplicate submissions excluded.
    pub fn pending_ecms(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Block until the queue drains or the epoch wait elapses.
    ///
    /// Returns true when the queue is empty.
    fn wait_for_epoch(&self) -> bool {
        let deadline = Instant::now() + self.epoch_wait;
        let mut state = self.shared.state.lock();
        while !state.queue.is_empty() {
            if self.shared.cond.wait_until(&mut state, deadline).timed_out() {
                return state.queue.is_empty();
            }
        }
        true
    }
}

impl Drop for KeyPipeline {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.running = false;
        }
        self.shared.cond.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("derivation worker panicked during shutdown");
            }
        }
    }
}

/// Worker: block for work, derive, publish, pop, repeat.
fn worker_loop<R>(shared: &Shared, deriver: &KeyDeriver, mut rng: R)
where
    R: RngCore + Send + 'static,
{
    loop {
        // Clone the front without removing it: the element stays visible
        // until its derivation completes so that queue emptiness means
        // "nothing in flight".
        let ecm = {
            let mut state = shared.state.lock();
            loop {
                if !state.running {
                    return;
                }
                if let Some(front) = state.queue.front() {
                    break front.clone();
                }
                shared.cond.wait(&mut state);
            }
        };

        let derived = {
            let mut slot = shared.session.lock();
            match slot.as_mut() {
                None => Err(DerivationError::NoCardSession),
                Some(session) => deriver.derive_control_words(session.as_mut(), &mut rng, &ecm),
            }
        };

        match derived {
            Ok(pair) => {
                *shared.words.lock() = Some(pair);
                debug!(ecm_len = ecm.len(), "control words updated");
            },
            Err(error) => {
                // Dropped, not retried: the carousel will send another
                // ECM soon enough, and the previous pair stays valid.
                warn!(%error, ecm_len = ecm.len(), "ECM dropped after failed derivation");
            },
        }

        {
            let mut state = shared.state.lock();
            state.queue.pop_front();
        }
        shared.cond.notify_all();
    }
}
