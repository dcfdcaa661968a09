// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory transport.
//!
//! Used by the test suites and by `azure-iot-north run --dry-run`. Failures,
//! dropped links and slow sends can be scripted through a shared handle; the
//! clone kept by the test observes everything the engine did.

use super::{Connection, Message, Transport, TransportOptions};
use crate::config::ConnectionString;
use crate::error::TransportError;
use crate::packer::IOT_HUB_MAX_MESSAGE_SIZE;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug)]
struct MockState {
    failing_connects: u32,
    fail_all_connects: bool,
    failing_sends: u32,
    send_delay: Option<Duration>,
    generation: u64,
    connect_attempts: u64,
    disconnects: u64,
    max_message_size: usize,
    sent: Vec<Message>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            failing_connects: 0,
            fail_all_connects: false,
            failing_sends: 0,
            send_delay: None,
            generation: 0,
            connect_attempts: 0,
            disconnects: 0,
            max_message_size: IOT_HUB_MAX_MESSAGE_SIZE,
            sent: Vec::new(),
        }
    }
}

/// Scriptable transport. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a transport that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock_state(&self.state)
    }

    /// Lower the accepted message size.
    pub fn with_max_message_size(self, max: usize) -> Self {
        self.lock().max_message_size = max;
        self
    }

    /// Fail the next `n` connect attempts.
    pub fn fail_connects(&self, n: u32) {
        self.lock().failing_connects = n;
    }

    /// Fail every connect attempt until cleared with `false`.
    pub fn fail_all_connects(&self, fail: bool) {
        self.lock().fail_all_connects = fail;
    }

    /// Fail the next `n` sends with a 500 status.
    pub fn fail_sends(&self, n: u32) {
        self.lock().failing_sends = n;
    }

    /// Fail the next send.
    pub fn fail_next_send(&self) {
        self.fail_sends(1);
    }

    /// Silently invalidate every open connection.
    pub fn drop_connection(&self) {
        self.lock().generation += 1;
    }

    /// Delay every send by `delay`.
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        self.lock().send_delay = delay;
    }

    /// Connect attempts so far, successful or not.
    pub fn connect_attempts(&self) -> u64 {
        self.lock().connect_attempts
    }

    /// Explicit disconnects so far.
    pub fn disconnects(&self) -> u64 {
        self.lock().disconnects
    }

    /// Messages accepted so far.
    pub fn sent_messages(&self) -> Vec<Message> {
        self.lock().sent.clone()
    }

    /// Entries of all accepted messages, in delivery order.
    pub fn sent_records(&self) -> Vec<Value> {
        self.lock()
            .sent
            .iter()
            .filter_map(|m| serde_json::from_slice::<Vec<Value>>(m.body()).ok())
            .flatten()
            .collect()
    }
}

fn lock_state(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Transport for MockTransport {
    type Connection = MockConnection;

    async fn connect(
        &self,
        credentials: &ConnectionString,
        _options: &TransportOptions,
    ) -> Result<MockConnection, TransportError> {
        let mut state = self.lock();
        state.connect_attempts += 1;

        if state.fail_all_connects {
            return Err(TransportError::Connect(format!(
                "{} unreachable",
                credentials.endpoint_host()
            )));
        }
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(TransportError::Connect(format!(
                "{} unreachable",
                credentials.endpoint_host()
            )));
        }

        Ok(MockConnection {
            state: Arc::clone(&self.state),
            generation: state.generation,
            closed: false,
        })
    }

    fn max_message_size(&self) -> usize {
        self.lock().max_message_size
    }
}

/// Connection handed out by [`MockTransport`].
#[derive(Debug)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
    generation: u64,
    closed: bool,
}

impl Connection for MockConnection {
    fn is_alive(&self) -> bool {
        !self.closed && lock_state(&self.state).generation == self.generation
    }

    async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let delay = lock_state(&self.state).send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock_state(&self.state);
        if self.closed || state.generation != self.generation {
            return Err(TransportError::ConnectionLost);
        }
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(TransportError::Status {
                status: 500,
                body: "injected failure".into(),
            });
        }
        if message.size() > state.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: message.size(),
                max: state.max_message_size,
            });
        }

        state.sent.push(message.clone());
        Ok(())
    }

    async fn disconnect(mut self) -> Result<(), TransportError> {
        self.closed = true;
        lock_state(&self.state).disconnects += 1;
        Ok(())
    }
}
