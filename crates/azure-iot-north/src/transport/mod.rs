// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound transport abstraction.
//!
//! The dispatch engine only relies on what a device client guarantees:
//! connect, liveness, single-message send, disconnect, and a maximum message
//! size.
//!
//! # Implementations
//!
//! - [`https::HttpsTransport`] -- IoT Hub device-to-cloud REST endpoint
//! - [`mock::MockTransport`] -- scriptable in-memory transport for tests and dry runs

pub mod https;
pub mod mock;
pub mod sas;

pub use https::{HttpsConnection, HttpsTransport};
pub use mock::{MockConnection, MockTransport};

use crate::config::ConnectionString;
use crate::error::TransportError;
use crate::packer::IOT_HUB_MAX_MESSAGE_SIZE;
use std::future::Future;
use std::time::Duration;

/// Content type attached to every message.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content encoding attached to every message.
pub const CONTENT_ENCODING_UTF8: &str = "utf-8";

/// One device-to-cloud message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    body: Vec<u8>,
    content_type: String,
    content_encoding: String,
}

impl Message {
    /// Create a message with explicit metadata.
    pub fn new(
        body: Vec<u8>,
        content_type: impl Into<String>,
        content_encoding: impl Into<String>,
    ) -> Self {
        Self {
            body,
            content_type: content_type.into(),
            content_encoding: content_encoding.into(),
        }
    }

    /// UTF-8 JSON message.
    pub fn json(body: Vec<u8>) -> Self {
        Self::new(body, CONTENT_TYPE_JSON, CONTENT_ENCODING_UTF8)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content_encoding(&self) -> &str {
        &self.content_encoding
    }

    /// Body size in bytes.
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

/// Options handed to [`Transport::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Websocket framing requested by configuration. Transports that already
    /// run over port 443 ignore it.
    pub websockets: bool,
    /// Upper bound for establishing a connection.
    pub connect_timeout: Duration,
    /// Lifetime of generated SAS tokens.
    pub sas_ttl: Duration,
    /// IoT Hub REST API version.
    pub api_version: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            websockets: false,
            connect_timeout: Duration::from_secs(10),
            sas_ttl: Duration::from_secs(3600),
            api_version: "2020-03-13".to_string(),
        }
    }
}

/// A live link to the cloud endpoint.
pub trait Connection: Send {
    /// Whether the link can still carry a message.
    ///
    /// Checked before every send; a remote side may drop idle links silently.
    fn is_alive(&self) -> bool;

    /// Send one message. Either the endpoint accepted it or an error is returned.
    fn send(
        &mut self,
        message: &Message,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Release the link.
    fn disconnect(self) -> impl Future<Output = Result<(), TransportError>> + Send
    where
        Self: Sized;
}

/// Factory for [`Connection`]s.
pub trait Transport: Send {
    type Connection: Connection;

    /// Establish a connection with the given credentials.
    fn connect(
        &self,
        credentials: &ConnectionString,
        options: &TransportOptions,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// Largest message body the endpoint accepts.
    fn max_message_size(&self) -> usize {
        IOT_HUB_MAX_MESSAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_message_metadata() {
        let msg = Message::json(b"[]".to_vec());
        assert_eq!(msg.content_type(), "application/json");
        assert_eq!(msg.content_encoding(), "utf-8");
        assert_eq!(msg.size(), 2);
        assert_eq!(msg.body(), b"[]");
    }

    #[test]
    fn test_default_transport_options() {
        let options = TransportOptions::default();
        assert!(!options.websockets);
        assert_eq!(options.sas_ttl, Duration::from_secs(3600));
        assert_eq!(options.api_version, "2020-03-13");
    }
}
