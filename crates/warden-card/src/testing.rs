//! Scripted card double for protocol tests.
//!
//! [`ScriptedCard`] replays a programmed sequence of transmit outcomes and
//! records everything the code under test did to it. The activity log is
//! shared through a cheap handle so assertions remain possible after the
//! card has been moved into a pipeline or worker thread.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use parking_lot::Mutex;

use crate::{
    apdu::ApduResponse,
    error::CardError,
    session::CardSession,
};

/// One scripted transmit outcome.
struct Exchange {
    outcome: Result<Vec<u8>, CardError>,
    latency: Option<Duration>,
}

#[derive(Default)]
struct Activity {
    commands: Vec<Vec<u8>>,
    init_calls: usize,
    connect_calls: usize,
    transactions_begun: usize,
    transactions_open: usize,
}

/// Shared view of a [`ScriptedCard`]'s recorded activity.
///
/// Remains usable after the card itself has been handed off to another
/// owner (for example a pipeline worker).
#[derive(Clone)]
pub struct CardLog {
    activity: Arc<Mutex<Activity>>,
}

impl CardLog {
    /// Every command transmitted so far, in order.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.activity.lock().commands.clone()
    }

    /// Number of commands transmitted so far.
    pub fn command_count(&self) -> usize {
        self.activity.lock().commands.len()
    }

    /// Number of `init` calls.
    pub fn init_calls(&self) -> usize {
        self.activity.lock().init_calls
    }

    /// Number of `connect` calls.
    pub fn connect_calls(&self) -> usize {
        self.activity.lock().connect_calls
    }

    /// Number of transactions opened.
    pub fn transactions_begun(&self) -> usize {
        self.activity.lock().transactions_begun
    }

    /// True when every opened transaction has been closed again.
    pub fn transactions_balanced(&self) -> bool {
        self.activity.lock().transactions_open == 0
    }
}

/// Programmable in-memory card.
///
/// Transmit outcomes are consumed front to back; running past the end of
/// the script is reported as a transport error rather than a panic so
/// exhaustion shows up as a normal failure in the code under test.
pub struct ScriptedCard {
    script: VecDeque<Exchange>,
    activity: Arc<Mutex<Activity>>,
    inited: bool,
    connected: bool,
}

impl ScriptedCard {
    /// Card with an empty script.
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            activity: Arc::new(Mutex::new(Activity::default())),
            inited: false,
            connected: false,
        }
    }

    /// Append a successful exchange returning `raw` (status word included).
    pub fn push_response(&mut self, raw: &[u8]) -> &mut Self {
        self.script.push_back(Exchange { outcome: Ok(raw.to_vec()), latency: None });
        self
    }

    /// Append a successful exchange that takes `latency` to answer.
    pub fn push_response_delayed(&mut self, raw: &[u8], latency: Duration) -> &mut Self {
        self.script.push_back(Exchange { outcome: Ok(raw.to_vec()), latency: Some(latency) });
        self
    }

    /// Append a failing exchange.
    pub fn push_error(&mut self, error: CardError) -> &mut Self {
        self.script.push_back(Exchange { outcome: Err(error), latency: None });
        self
    }

    /// Handle onto the recorded activity.
    pub fn log(&self) -> CardLog {
        CardLog { activity: Arc::clone(&self.activity) }
    }

    /// Number of scripted exchanges not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl Default for ScriptedCard {
    fn default() -> Self {
        Self::new()
    }
}

impl CardSession for ScriptedCard {
    fn connect(&mut self) -> Result<(), CardError> {
        self.activity.lock().connect_calls += 1;
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn init(&mut self) -> Result<(), CardError> {
        self.activity.lock().init_calls += 1;
        self.inited = true;
        Ok(())
    }

    fn is_inited(&self) -> bool {
        self.inited
    }

    fn transmit(&mut self, command: &[u8]) -> Result<ApduResponse, CardError> {
        if !self.inited || !self.connected {
            return Err(CardError::NotReady);
        }

        self.activity.lock().commands.push(command.to_vec());

        let Some(exchange) = self.script.pop_front() else {
            return Err(CardError::Transport("script exhausted".to_string()));
        };

        if let Some(latency) = exchange.latency {
            std::thread::sleep(latency);
        }

        ApduResponse::parse(&exchange.outcome?)
    }

    fn begin_transaction(&mut self) -> Result<(), CardError> {
        let mut activity = self.activity.lock();
        activity.transactions_begun += 1;
        activity.transactions_open += 1;
        Ok(())
    }

    fn end_transaction(&mut self) {
        let mut activity = self.activity.lock();
        activity.transactions_open = activity.transactions_open.saturating_sub(1);
    }
}
