//! Simulated transport for testing drivers without hardware.
//!
//! The mock behaves like a simple SCPI device:
//! - queries are answered from a response table
//! - a write `HEAD ARG` stores `ARG` as the answer to `HEAD?`, so set-then-get works
//! - a query with no scripted answer is rejected, like an unknown header
//! - failures can be injected for the next N exchanges or reopens
//! - every call is logged for verification
//!
//! Clones share state, so a test keeps one handle while the driver owns another.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::Transport;
use crate::error::TransportError;

/// Scripted in-memory instrument.
///
/// # Example
///
/// ```
/// use daq_features::transport::{MockTransport, Transport};
///
/// # tokio_test::block_on(async {
/// let handle = MockTransport::new().with_response("*IDN?", "ACME,PSU,0,1.0");
/// let mut link = handle.clone();
/// link.open().await.unwrap();
/// assert_eq!(link.query("*IDN?").await.unwrap(), "ACME,PSU,0,1.0");
/// assert_eq!(handle.queries(), 1);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    open: bool,
    responses: HashMap<String, String>,
    latency: Duration,
    pending_failures: u32,
    pending_reopen_failures: u32,
    call_log: Vec<String>,
    writes: usize,
    queries: usize,
    opens: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, query: &str, response: &str) -> Self {
        self.set_response(query, response);
        self
    }

    /// Delay applied to every exchange.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = latency;
        self
    }

    pub fn set_response(&self, query: &str, response: &str) {
        self.state
            .lock()
            .responses
            .insert(query.to_string(), response.to_string());
    }

    pub fn remove_response(&self, query: &str) {
        self.state.lock().responses.remove(query);
    }

    pub fn response(&self, query: &str) -> Option<String> {
        self.state.lock().responses.get(query).cloned()
    }

    /// Fail the next `count` writes or queries with a link error.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().pending_failures = count;
    }

    /// Fail the next `count` attempts to open the link.
    pub fn fail_reopen(&self, count: u32) {
        self.state.lock().pending_reopen_failures = count;
    }

    /// Simulate the instrument dropping the connection.
    pub fn disconnect(&self) {
        self.state.lock().open = false;
    }

    pub fn call_log(&self) -> Vec<String> {
        self.state.lock().call_log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().call_log.clear();
    }

    pub fn writes(&self) -> usize {
        self.state.lock().writes
    }

    pub fn queries(&self) -> usize {
        self.state.lock().queries
    }

    /// Writes plus queries.
    pub fn exchanges(&self) -> usize {
        let state = self.state.lock();
        state.writes + state.queries
    }

    /// Successful and failed opens, including the initial one.
    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    async fn simulate_latency(&self) {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn begin_exchange(&self, kind: &str, command: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.call_log.push(format!("{kind}:{command}"));
        if kind == "write" {
            state.writes += 1;
        } else {
            state.queries += 1;
        }
        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(TransportError::Link("injected failure".to_string()));
        }
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.opens += 1;
        state.call_log.push("open".to_string());
        if state.pending_reopen_failures > 0 {
            state.pending_reopen_failures -= 1;
            state.open = false;
            return Err(TransportError::Link("injected open failure".to_string()));
        }
        state.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.call_log.push("close".to_string());
        state.open = false;
        Ok(())
    }

    async fn write(&mut self, command: &str) -> Result<(), TransportError> {
        self.simulate_latency().await;
        self.begin_exchange("write", command)?;
        let mut state = self.state.lock();
        for part in command.split(';') {
            let part = part.trim().trim_start_matches(':');
            if let Some((head, arg)) = part.split_once(char::is_whitespace) {
                state
                    .responses
                    .insert(format!("{head}?"), arg.trim().to_string());
            }
        }
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.simulate_latency().await;
        self.begin_exchange("query", command)?;
        self.state
            .lock()
            .responses
            .get(command)
            .cloned()
            .ok_or_else(|| TransportError::Rejected(format!("no response scripted for '{command}'")))
    }
}
