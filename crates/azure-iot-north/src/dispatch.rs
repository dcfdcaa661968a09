// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-call orchestration.
//!
//! ```text
//! dispatch(pending)
//!   ensure_connected ---- no ----> {false, 0, 0}
//!        | yes
//!   pack one block ---- empty ---> {false, prior, 0}
//!        |
//!   send block -------- error ---> {false, prior, 0}
//!        | ok
//!   {true, last id of block, count}
//! ```
//!
//! The whole chain runs under one timeout. Every error is logged and turned
//! into a result; nothing is raised to the host.

use crate::config::NorthConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::NorthError;
use crate::packer::{BatchPacker, PackingLimits};
use crate::record::Record;
use crate::transport::Transport;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default bound on one whole dispatch call.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// What one dispatch call achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DispatchResult {
    /// A message was accepted by the transport.
    pub data_sent: bool,
    /// Id of the last delivered record, or the previous value if none.
    pub last_delivered_id: u64,
    /// Records delivered by this call.
    pub count: usize,
}

impl DispatchResult {
    /// Nothing delivered; the cursor stays at `last_delivered_id`.
    pub fn unchanged(last_delivered_id: u64) -> Self {
        Self {
            data_sent: false,
            last_delivered_id,
            count: 0,
        }
    }

    pub fn delivered(last_delivered_id: u64, count: usize) -> Self {
        Self {
            data_sent: true,
            last_delivered_id,
            count,
        }
    }
}

/// Dispatch counters.
#[derive(Debug)]
pub struct DispatchStats {
    /// Dispatch calls made.
    pub calls: AtomicU64,
    /// Messages accepted by the transport.
    pub blocks_sent: AtomicU64,
    /// Records delivered.
    pub records_sent: AtomicU64,
    /// Message body bytes delivered.
    pub bytes_sent: AtomicU64,
    /// Calls with pending records that delivered nothing.
    pub failed_calls: AtomicU64,
    /// Calls blocked by a record larger than the cap.
    pub oversize_stalls: AtomicU64,
    /// Blocks that left records for a later call.
    pub truncated_blocks: AtomicU64,
    /// Connect attempts made.
    pub connect_attempts: AtomicU64,
    created: Instant,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            blocks_sent: AtomicU64::new(0),
            records_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            oversize_stalls: AtomicU64::new(0),
            truncated_blocks: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            blocks_sent: self.blocks_sent.load(Ordering::Relaxed),
            records_sent: self.records_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            oversize_stalls: self.oversize_stalls.load(Ordering::Relaxed),
            truncated_blocks: self.truncated_blocks.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of dispatch statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub calls: u64,
    pub blocks_sent: u64,
    pub records_sent: u64,
    pub bytes_sent: u64,
    pub failed_calls: u64,
    pub oversize_stalls: u64,
    pub truncated_blocks: u64,
    pub connect_attempts: u64,
    pub uptime_secs: u64,
}

impl DispatchStatsSnapshot {
    /// Average records per block.
    pub fn records_per_block(&self) -> f64 {
        if self.blocks_sent > 0 {
            self.records_sent as f64 / self.blocks_sent as f64
        } else {
            0.0
        }
    }
}

/// Drives packing and sending for one stream.
#[derive(Debug)]
pub struct Dispatcher<T: Transport> {
    manager: ConnectionManager<T>,
    packer: BatchPacker,
    send_timeout: Duration,
    last_delivered_id: u64,
    stats: Arc<DispatchStats>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(
        manager: ConnectionManager<T>,
        limits: PackingLimits,
        send_timeout: Duration,
    ) -> Self {
        let limits = fit_to_transport(limits, manager.transport().max_message_size());
        Self {
            manager,
            packer: BatchPacker::new(limits),
            send_timeout,
            last_delivered_id: 0,
            stats: Arc::new(DispatchStats::new()),
        }
    }

    pub fn from_config(transport: T, config: &NorthConfig) -> Self {
        Self::new(
            ConnectionManager::from_config(transport, config),
            config.packing_limits(),
            config.send_timeout(),
        )
    }

    /// Deliver at most one block from `records`.
    ///
    /// `records` are the readings not yet confirmed, in id order.
    pub async fn dispatch(&mut self, records: &[Record]) -> DispatchResult {
        self.stats.calls.fetch_add(1, Ordering::Relaxed);

        if records.is_empty() {
            debug!("Nothing to send");
            return DispatchResult::unchanged(self.last_delivered_id);
        }
        debug!("Dispatching from {} pending records", records.len());

        let outcome = tokio::time::timeout(self.send_timeout, self.try_dispatch(records)).await;
        self.stats
            .connect_attempts
            .store(self.manager.connect_attempts(), Ordering::Relaxed);

        match outcome {
            Ok(Ok(result)) => {
                if !result.data_sent {
                    self.stats.failed_calls.fetch_add(1, Ordering::Relaxed);
                }
                result
            }
            Ok(Err(e)) => self.fail(e),
            Err(_) => self.fail(NorthError::Timeout(self.send_timeout)),
        }
    }

    /// Parse raw host rows and dispatch them.
    ///
    /// A malformed row fails the whole call with a zero result.
    pub async fn dispatch_values(&mut self, rows: &[Value]) -> DispatchResult {
        match Record::from_values(rows) {
            Ok(records) => self.dispatch(&records).await,
            Err(e) => {
                self.stats.calls.fetch_add(1, Ordering::Relaxed);
                self.fail(e)
            }
        }
    }

    /// The dispatch chain without the outer error boundary.
    async fn try_dispatch(&mut self, records: &[Record]) -> Result<DispatchResult, NorthError> {
        if !self.manager.ensure_connected().await {
            return Ok(DispatchResult::default());
        }

        let prior = self.last_delivered_id;
        let block = self.packer.pack(records, prior)?;

        if let Some(oversize) = block.stalled {
            self.stats.oversize_stalls.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Reading {} encodes to {} bytes, above the {:.0} byte cap; it cannot be sent",
                oversize.id,
                oversize.encoded_size,
                self.packer.limits().cap()
            );
        }
        if block.unit.is_empty() {
            return Ok(DispatchResult::unchanged(prior));
        }
        if block.truncated {
            self.stats.truncated_blocks.fetch_add(1, Ordering::Relaxed);
            info!(
                "Sending {} of {} readings, the rest goes with the next call",
                block.unit.len(),
                records.len()
            );
        }

        let size = block.unit.encoded_size();
        let count = self.manager.send(&block.unit).await?;

        self.last_delivered_id = self.last_delivered_id.max(block.last_id);
        self.stats.blocks_sent.fetch_add(1, Ordering::Relaxed);
        self.stats
            .records_sent
            .fetch_add(count as u64, Ordering::Relaxed);
        self.stats.bytes_sent.fetch_add(size as u64, Ordering::Relaxed);

        Ok(DispatchResult::delivered(block.last_id, count))
    }

    fn fail(&self, e: NorthError) -> DispatchResult {
        self.stats.failed_calls.fetch_add(1, Ordering::Relaxed);
        match &e {
            NorthError::Contract(_) | NorthError::Serialization(_) => {
                error!("Dispatch failed: {}", e)
            }
            _ => warn!("Dispatch failed: {}", e),
        }
        DispatchResult::unchanged(self.last_delivered_id)
    }

    /// Release the connection.
    pub async fn shutdown(&mut self) {
        self.manager.shutdown().await;
    }

    /// Apply new configuration. The connection is torn down and retries reset.
    pub async fn reconfigure(&mut self, config: &NorthConfig) {
        self.manager
            .reconfigure(
                config.connection_string.clone(),
                config.transport_options(),
                config.max_retry_count,
            )
            .await;
        let limits = fit_to_transport(
            config.packing_limits(),
            self.manager.transport().max_message_size(),
        );
        self.packer = BatchPacker::new(limits);
        self.send_timeout = config.send_timeout();
    }

    /// Highest id delivered so far.
    pub fn last_delivered_id(&self) -> u64 {
        self.last_delivered_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn manager(&self) -> &ConnectionManager<T> {
        &self.manager
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared handle to the live counters.
    pub fn stats_handle(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }
}

/// Packing never targets more than the transport accepts.
fn fit_to_transport(limits: PackingLimits, max_message_size: usize) -> PackingLimits {
    if limits.size_limit <= max_message_size {
        return limits;
    }
    warn!(
        "size_limit {} exceeds the transport maximum of {} bytes, using the maximum",
        limits.size_limit, max_message_size
    );
    PackingLimits::new(max_message_size, limits.safety_factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, TransportOptions};
    use serde_json::{json, Map};

    const CONN: &str = "HostName=hub.azure-devices.net;DeviceId=dev;SharedAccessKey=a2V5";

    fn dispatcher(transport: &MockTransport) -> Dispatcher<MockTransport> {
        let manager =
            ConnectionManager::new(transport.clone(), CONN, TransportOptions::default(), 10);
        Dispatcher::new(manager, PackingLimits::default(), DEFAULT_SEND_TIMEOUT)
    }

    fn records(ids: std::ops::RangeInclusive<u64>) -> Vec<Record> {
        ids.map(|id| {
            let mut reading = Map::new();
            reading.insert("v".into(), json!(id));
            Record::new(id, "asset", reading, "t")
        })
        .collect()
    }

    #[test]
    fn test_result_constructors() {
        assert_eq!(
            DispatchResult::default(),
            DispatchResult {
                data_sent: false,
                last_delivered_id: 0,
                count: 0
            }
        );
        assert_eq!(DispatchResult::unchanged(7).last_delivered_id, 7);
        assert!(DispatchResult::delivered(9, 2).data_sent);
    }

    #[test]
    fn test_result_serializes() {
        let json = serde_json::to_value(DispatchResult::delivered(5, 3)).expect("json");
        assert_eq!(
            json,
            json!({"data_sent": true, "last_delivered_id": 5, "count": 3})
        );
    }

    #[tokio::test]
    async fn test_dispatch_delivers_block() {
        let transport = MockTransport::new();
        let mut d = dispatcher(&transport);

        let result = d.dispatch(&records(1..=3)).await;
        assert_eq!(result, DispatchResult::delivered(3, 3));
        assert_eq!(d.last_delivered_id(), 3);
        assert_eq!(transport.sent_records().len(), 3);

        let stats = d.stats();
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.blocks_sent, 1);
        assert_eq!(stats.records_sent, 3);
        assert_eq!(stats.connect_attempts, 1);
        assert!((stats.records_per_block() - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_empty_input_does_not_connect() {
        let transport = MockTransport::new();
        let mut d = dispatcher(&transport);

        assert_eq!(d.dispatch(&[]).await, DispatchResult::default());
        assert_eq!(transport.connect_attempts(), 0);
        assert!(transport.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_connection_returns_zero() {
        let transport = MockTransport::new();
        let mut d = dispatcher(&transport);
        assert!(d.dispatch(&records(1..=2)).await.data_sent);

        transport.drop_connection();
        transport.fail_all_connects(true);
        let result = d.dispatch(&records(3..=4)).await;
        assert_eq!(result, DispatchResult::default());
        assert_eq!(d.stats().failed_calls, 1);
    }

    #[tokio::test]
    async fn test_send_failure_keeps_prior_cursor() {
        let transport = MockTransport::new();
        let mut d = dispatcher(&transport);
        assert_eq!(d.dispatch(&records(1..=5)).await.last_delivered_id, 5);

        transport.fail_next_send();
        let result = d.dispatch(&records(6..=8)).await;
        assert_eq!(result, DispatchResult::unchanged(5));
        assert_eq!(d.connection_state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_malformed_row_is_contained() {
        let transport = MockTransport::new();
        let mut d = dispatcher(&transport);

        let rows = vec![
            json!({"id": 1, "asset_code": "a", "reading": {"v": 1}, "user_ts": "t"}),
            json!({"id": 2, "asset_code": "a", "user_ts": "t"}),
        ];
        assert_eq!(d.dispatch_values(&rows).await, DispatchResult::default());
        assert!(transport.sent_messages().is_empty());
        assert_eq!(d.stats().failed_calls, 1);
        assert_eq!(d.stats().calls, 1);
    }

    #[tokio::test]
    async fn test_dispatch_values_happy_path() {
        let transport = MockTransport::new();
        let mut d = dispatcher(&transport);

        let rows = vec![json!({"id": 11, "asset_code": "a", "reading": {"v": 1}, "user_ts": "t"})];
        assert_eq!(
            d.dispatch_values(&rows).await,
            DispatchResult::delivered(11, 1)
        );
        assert_eq!(
            transport.sent_records(),
            vec![json!({"asset": "a", "readings": {"v": 1}, "timestamp": "t"})]
        );
    }

    #[tokio::test]
    async fn test_timeout_reports_zero() {
        let transport = MockTransport::new();
        transport.set_send_delay(Some(Duration::from_secs(5)));
        let manager =
            ConnectionManager::new(transport.clone(), CONN, TransportOptions::default(), 10);
        let mut d = Dispatcher::new(manager, PackingLimits::default(), Duration::from_millis(20));

        let result = d.dispatch(&records(1..=3)).await;
        assert_eq!(result, DispatchResult::unchanged(0));
        assert_eq!(d.connection_state(), ConnectionState::Failed);
        assert!(transport.sent_messages().is_empty());
    }

    #[test]
    fn test_fit_to_transport() {
        let limits = PackingLimits::new(1_000_000, 0.9);
        assert_eq!(
            fit_to_transport(limits, 262_144),
            PackingLimits::new(262_144, 0.9)
        );
        assert_eq!(
            fit_to_transport(PackingLimits::default(), 262_144),
            PackingLimits::default()
        );
    }

    #[tokio::test]
    async fn test_oversized_limit_is_clamped_to_transport() {
        let transport = MockTransport::new();
        let manager =
            ConnectionManager::new(transport.clone(), CONN, TransportOptions::default(), 10);
        let mut d = Dispatcher::new(
            manager,
            PackingLimits::new(1_000_000, 0.9),
            DEFAULT_SEND_TIMEOUT,
        );

        let big: Vec<Record> = (1..=10u64)
            .map(|id| {
                let mut reading = Map::new();
                reading.insert("p".into(), json!("x".repeat(30_000)));
                Record::new(id, "asset", reading, "t")
            })
            .collect();

        let mut cursor = 0;
        for _ in 0..5 {
            let start = big.partition_point(|r| r.id <= cursor);
            if start == big.len() {
                break;
            }
            let result = d.dispatch(&big[start..]).await;
            assert!(result.data_sent);
            cursor = result.last_delivered_id;
        }
        assert_eq!(cursor, 10);
        for message in transport.sent_messages() {
            assert!(message.size() <= 262_144);
        }
    }

    #[tokio::test]
    async fn test_reconfigure_applies_limits() {
        let transport = MockTransport::new();
        let mut d = dispatcher(&transport);

        let mut config = NorthConfig::new(CONN);
        config.size_limit = 200;
        config.safety_factor = 1.0;
        d.reconfigure(&config).await;

        // Each projection is 52 bytes: 2 + 3 * 52 + 2 = 160 fits, a fourth does not.
        let result = d.dispatch(&records(1..=9)).await;
        assert_eq!(result.count, 3);
        assert_eq!(d.stats().truncated_blocks, 1);
    }
}
