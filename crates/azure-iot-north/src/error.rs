// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types.
//!
//! None of these ever reach the host: [`crate::Dispatcher::dispatch`] turns
//! every failure into a zero-delivery [`crate::DispatchResult`].

use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Missing configuration item: {0}")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors reported by a [`crate::transport::Transport`] or its connections.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Credentials could not be used (bad key encoding, bad host name, ...).
    #[error("Transport configuration error: {0}")]
    Config(String),

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IoT Hub rejected message with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("IoT Hub refused the credentials")]
    Unauthorized,

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Message too large: {size} > {max} bytes")]
    MessageTooLarge { size: usize, max: usize },
}

/// Errors raised inside one dispatch call.
#[derive(Debug, Error)]
pub enum NorthError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The host handed over a reading that does not have the expected shape.
    #[error("Malformed reading: {0}")]
    Contract(String),

    #[error("No live connection")]
    NotConnected,

    #[error("Gave up connecting after {0} consecutive failed attempts")]
    RetryCeilingReached(u32),

    #[error("Dispatch did not complete within {0:?}")]
    Timeout(Duration),
}
