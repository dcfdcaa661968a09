// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection lifecycle for one outbound stream.
//!
//! ```text
//!            connect ok                send ok
//!   Absent ------------> Live <-----------------+
//!     |                   |  \                  |
//!     | connect err       |   +-----------------+
//!     v                   | send err / not alive
//!   Failed <--------------+
//!     |  connect ok (retry_count < max_retry_count)
//!     +-------------------> Live
//!
//!   any --shutdown--> Absent
//! ```
//!
//! The retry counter counts consecutive failed attempts. Once it reaches
//! the ceiling no further connect is attempted until [`ConnectionManager::reset_retries`]
//! or [`ConnectionManager::reconfigure`].
//!
//! Both suspension points (connect and send) leave the manager in `Failed`
//! while they are outstanding, so a cancelled future never looks like a
//! success.

use crate::config::{ConnectionString, NorthConfig};
use crate::error::{NorthError, TransportError};
use crate::packer::TransmissionUnit;
use crate::transport::{Connection, Message, Transport, TransportOptions};
use tracing::{debug, info, warn};

/// Default ceiling on consecutive failed connect attempts.
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 10;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, or shut down.
    Absent,
    /// Connected and last operation succeeded.
    Live,
    /// Last connect or send failed.
    Failed,
}

/// Owner of the single outbound connection.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    connection_string: String,
    options: TransportOptions,
    max_retry_count: u32,
    retry_count: u32,
    connect_attempts: u64,
    state: ConnectionState,
    connection: Option<T::Connection>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager. Nothing is connected until the first send.
    pub fn new(
        transport: T,
        connection_string: impl Into<String>,
        options: TransportOptions,
        max_retry_count: u32,
    ) -> Self {
        Self {
            transport,
            connection_string: connection_string.into(),
            options,
            max_retry_count,
            retry_count: 0,
            connect_attempts: 0,
            state: ConnectionState::Absent,
            connection: None,
        }
    }

    pub fn from_config(transport: T, config: &NorthConfig) -> Self {
        Self::new(
            transport,
            config.connection_string.clone(),
            config.transport_options(),
            config.max_retry_count,
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed connect attempts.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Connect attempts over the manager's lifetime.
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts
    }

    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }

    /// Whether reconnecting has been given up.
    pub fn retry_ceiling_reached(&self) -> bool {
        self.retry_count >= self.max_retry_count
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Make sure a usable connection exists.
    ///
    /// Reuses a live connection, otherwise performs at most one connect
    /// attempt. Failures are logged, never raised.
    pub async fn ensure_connected(&mut self) -> bool {
        match self.connect().await {
            Ok(()) => true,
            Err(NorthError::RetryCeilingReached(max)) => {
                debug!(
                    "Not connecting: {} consecutive attempts already failed",
                    max
                );
                false
            }
            Err(e) => {
                warn!(
                    "Connect attempt {}/{} failed: {}",
                    self.retry_count, self.max_retry_count, e
                );
                if self.retry_ceiling_reached() {
                    warn!(
                        "Retry ceiling of {} reached, no further connect attempts",
                        self.max_retry_count
                    );
                }
                false
            }
        }
    }

    /// Like [`ConnectionManager::ensure_connected`], with the reason on failure.
    pub async fn connect(&mut self) -> Result<(), NorthError> {
        if let Some(connection) = &self.connection {
            if connection.is_alive() {
                self.state = ConnectionState::Live;
                return Ok(());
            }
            info!("Connection is no longer alive, releasing it");
            self.connection = None;
            self.state = ConnectionState::Failed;
        }

        if self.retry_ceiling_reached() {
            self.state = ConnectionState::Failed;
            return Err(NorthError::RetryCeilingReached(self.max_retry_count));
        }

        // Counted before the await so a cancelled attempt still counts.
        self.retry_count += 1;
        self.connect_attempts += 1;
        self.state = ConnectionState::Failed;

        let credentials = ConnectionString::parse(&self.connection_string)?;
        debug!(
            "Connecting to {} as {} (attempt {})",
            credentials.endpoint_host(),
            credentials.identity_path(),
            self.retry_count
        );
        let connection = self.transport.connect(&credentials, &self.options).await?;

        info!("Connected to {}", credentials.endpoint_host());
        self.connection = Some(connection);
        self.retry_count = 0;
        self.state = ConnectionState::Live;
        Ok(())
    }

    /// Send one unit as a single message and return how many records it held.
    ///
    /// On failure the connection is released and the state becomes `Failed`.
    pub async fn send(&mut self, unit: &TransmissionUnit<'_>) -> Result<usize, NorthError> {
        let body = unit.to_json()?;
        let max = self.transport.max_message_size();
        if body.len() > max {
            return Err(TransportError::MessageTooLarge {
                size: body.len(),
                max,
            }
            .into());
        }

        let mut connection = match self.connection.take() {
            Some(connection) if connection.is_alive() => connection,
            Some(_) => {
                self.state = ConnectionState::Failed;
                return Err(TransportError::ConnectionLost.into());
            }
            None => return Err(NorthError::NotConnected),
        };

        let message = Message::json(body);
        self.state = ConnectionState::Failed;
        connection.send(&message).await?;

        debug!("Sent {} records in {} bytes", unit.len(), message.size());
        self.connection = Some(connection);
        self.state = ConnectionState::Live;
        Ok(unit.len())
    }

    /// Release the connection, if any. Never fails.
    pub async fn shutdown(&mut self) {
        self.state = ConnectionState::Absent;
        if let Some(connection) = self.connection.take() {
            match connection.disconnect().await {
                Ok(()) => info!("Disconnected"),
                Err(e) => warn!("Disconnect failed: {}", e),
            }
        }
    }

    /// Allow connect attempts again after the ceiling was reached.
    pub fn reset_retries(&mut self) {
        self.retry_count = 0;
    }

    /// Shut down and apply new credentials and limits.
    pub async fn reconfigure(
        &mut self,
        connection_string: impl Into<String>,
        options: TransportOptions,
        max_retry_count: u32,
    ) {
        self.shutdown().await;
        self.connection_string = connection_string.into();
        self.options = options;
        self.max_retry_count = max_retry_count;
        self.reset_retries();
    }
}

impl<T: Transport> std::fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("retry_count", &self.retry_count)
            .field("max_retry_count", &self.max_retry_count)
            .finish_non_exhaustive()
    }
}
