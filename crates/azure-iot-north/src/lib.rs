// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Azure IoT Hub North Plugin
//!
//! Forwards buffered readings to an IoT Hub device identity and reports back
//! how far delivery got, so the host can advance its own cursor.
//!
//! This crate provides:
//! - Size-bounded packing of readings into one device-to-cloud message
//! - A connection manager with lazy connect, liveness checks and a retry ceiling
//! - Per-call dispatch that always yields a [`DispatchResult`], never an error
//! - An HTTPS transport signed with SAS tokens, and an in-memory mock
//!
//! # Overview
//!
//! ```text
//! host rows --> Record --> BatchPacker --> TransmissionUnit --> ConnectionManager --> Transport
//!                                                                       |
//!                      DispatchResult {data_sent, last_delivered_id, count}
//! ```
//!
//! # Example
//!
//! ```ignore
//! use azure_iot_north::NorthPlugin;
//!
//! let mut plugin = NorthPlugin::init(&category)?;
//! let result = plugin.send(&pending_rows).await;
//! if result.data_sent {
//!     cursor = result.last_delivered_id;
//! }
//! plugin.shutdown().await;
//! ```

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod packer;
pub mod plugin;
pub mod record;
pub mod transport;

pub use config::{ConnectionString, NorthConfig, Source};
pub use connection::{ConnectionManager, ConnectionState, DEFAULT_MAX_RETRY_COUNT};
pub use dispatch::{DispatchResult, DispatchStats, DispatchStatsSnapshot, Dispatcher};
pub use error::{ConfigError, NorthError, TransportError};
pub use packer::{BatchPacker, PackedBlock, PackingLimits, TransmissionUnit};
pub use plugin::{plugin_info, NorthPlugin, PluginInfo};
pub use record::{Projection, Record};
pub use transport::{Connection, HttpsTransport, Message, MockTransport, Transport};
