//! Pipeline configuration.

use std::time::Duration;

/// Default bound on the epoch-boundary wait in
/// [`KeyPipeline::acquire`](crate::KeyPipeline::acquire).
pub const DEFAULT_EPOCH_WAIT: Duration = Duration::from_secs(10);

/// Tunables for a [`KeyPipeline`](crate::KeyPipeline).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How long a consumer may stall at a key-parity flip waiting for the
    /// in-flight derivation to land.
    ///
    /// This is a deadlock-avoidance bound, not a latency target: in the
    /// common case a parity flip finds the queue already empty.
    pub epoch_wait: Duration,

    /// OS thread name for the derivation worker.
    pub worker_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { epoch_wait: DEFAULT_EPOCH_WAIT, worker_name: "warden-key-worker".to_string() }
    }
}
