// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// End-to-end dispatch behavior against the in-memory transport.

use azure_iot_north::{
    ConnectionState, DispatchResult, Dispatcher, MockTransport, NorthConfig, Record,
};
use serde_json::{json, Map, Value};
use std::time::Duration;

const CONN: &str = "HostName=hub.azure-devices.net;DeviceId=dev-01;SharedAccessKey=a2V5";

fn dispatcher(transport: &MockTransport) -> Dispatcher<MockTransport> {
    Dispatcher::from_config(transport.clone(), &NorthConfig::new(CONN))
}

/// Record whose `{asset, readings, timestamp}` encoding is exactly `size` bytes.
fn record_of_size(id: u64, size: usize) -> Record {
    let base = Record::new(id, "asset", Map::new(), "2026-01-01 00:00:00");
    let overhead = base.projection().encoded_len().expect("len") + r#""p":"""#.len();

    let mut reading = Map::new();
    reading.insert("p".into(), Value::String("x".repeat(size - overhead)));
    let record = Record::new(id, "asset", reading, "2026-01-01 00:00:00");
    assert_eq!(record.projection().encoded_len().expect("len"), size);
    record
}

fn uniform(n: u64, size: usize) -> Vec<Record> {
    (1..=n).map(|id| record_of_size(id, size)).collect()
}

/// Records with id greater than `cursor`.
fn pending_after(records: &[Record], cursor: u64) -> &[Record] {
    let start = records.partition_point(|r| r.id <= cursor);
    &records[start..]
}

#[tokio::test]
async fn test_three_small_records_are_sent_together() {
    let transport = MockTransport::new();
    let mut d = dispatcher(&transport);

    let result = d.dispatch(&uniform(3, 1000)).await;

    assert_eq!(result, DispatchResult::delivered(3, 3));
    assert_eq!(transport.sent_messages().len(), 1);
    assert_eq!(transport.sent_records().len(), 3);
}

#[tokio::test]
async fn test_large_backlog_is_split_across_calls() {
    let transport = MockTransport::new();
    let mut d = dispatcher(&transport);
    let records = uniform(500, 1000);

    let first = d.dispatch(&records).await;
    assert!(first.data_sent);
    assert_eq!(first.count, 235);
    assert_eq!(first.last_delivered_id, 235);
    assert_eq!(pending_after(&records, first.last_delivered_id).len(), 265);

    let second = d.dispatch(pending_after(&records, first.last_delivered_id)).await;
    assert_eq!(second, DispatchResult::delivered(470, 235));

    let third = d.dispatch(pending_after(&records, second.last_delivered_id)).await;
    assert_eq!(third, DispatchResult::delivered(500, 30));

    assert_eq!(transport.sent_records().len(), 500);
    assert_eq!(transport.connect_attempts(), 1);
    for message in transport.sent_messages() {
        assert!((message.size() as f64) <= 262_144.0 * 0.9);
    }

    let stats = d.stats();
    assert_eq!(stats.blocks_sent, 3);
    assert_eq!(stats.records_sent, 500);
    assert_eq!(stats.truncated_blocks, 2);
}

#[tokio::test]
async fn test_retry_ceiling_suppresses_connects() {
    let transport = MockTransport::new();
    transport.fail_all_connects(true);
    let mut d = dispatcher(&transport);
    let records = uniform(5, 100);

    for attempt in 1..=10 {
        assert_eq!(d.dispatch(&records).await, DispatchResult::default());
        assert_eq!(transport.connect_attempts(), attempt);
    }

    let eleventh = d.dispatch(&records).await;
    assert_eq!(eleventh, DispatchResult::default());
    assert_eq!(transport.connect_attempts(), 10);
    assert_eq!(d.connection_state(), ConnectionState::Failed);
    assert!(transport.sent_messages().is_empty());
}

#[tokio::test]
async fn test_send_failure_reports_prior_cursor() {
    let transport = MockTransport::new();
    let mut d = dispatcher(&transport);
    let records = uniform(6, 200);

    let first = d.dispatch(&records[..3]).await;
    assert_eq!(first, DispatchResult::delivered(3, 3));

    transport.fail_next_send();
    let second = d.dispatch(pending_after(&records, 3)).await;
    assert_eq!(second, DispatchResult::unchanged(3));
    assert_eq!(d.connection_state(), ConnectionState::Failed);

    // Host retries with the same pending records.
    let third = d.dispatch(pending_after(&records, 3)).await;
    assert_eq!(third, DispatchResult::delivered(6, 3));
    assert_eq!(transport.connect_attempts(), 2);
}

#[tokio::test]
async fn test_empty_input_sends_nothing() {
    let transport = MockTransport::new();
    let mut d = dispatcher(&transport);

    assert_eq!(d.dispatch(&[]).await, DispatchResult::default());
    assert_eq!(transport.connect_attempts(), 0);
    assert!(transport.sent_messages().is_empty());
}

#[tokio::test]
async fn test_cursor_is_monotonic_and_order_preserved() {
    let transport = MockTransport::new();
    let mut d = dispatcher(&transport);

    let sizes = [150usize, 90_000, 70_000, 120, 80_000, 5_000, 200_000, 60, 30_000, 100_000];
    let records: Vec<_> = (0..40u64)
        .map(|i| record_of_size(i + 1, sizes[i as usize % sizes.len()]))
        .collect();

    let mut cursor = 0;
    let mut calls = 0;
    while !pending_after(&records, cursor).is_empty() {
        let result = d.dispatch(pending_after(&records, cursor)).await;
        assert!(result.data_sent);
        assert!(result.last_delivered_id > cursor);
        cursor = result.last_delivered_id;
        calls += 1;
        assert!(calls < 100);
    }

    let expected: Vec<Value> = records
        .iter()
        .map(|r| serde_json::to_value(r.projection()).expect("json"))
        .collect();
    assert_eq!(transport.sent_records(), expected);
}

#[tokio::test]
async fn test_oversize_record_stalls_without_error() {
    let transport = MockTransport::new();
    let mut d = dispatcher(&transport);
    let records = vec![
        record_of_size(1, 500),
        record_of_size(2, 240_000),
        record_of_size(3, 500),
    ];

    let first = d.dispatch(&records).await;
    assert_eq!(first, DispatchResult::delivered(1, 1));

    let stalled = d.dispatch(pending_after(&records, 1)).await;
    assert_eq!(stalled, DispatchResult::unchanged(1));
    assert_eq!(transport.sent_messages().len(), 1);
    assert_eq!(d.connection_state(), ConnectionState::Live);
    assert_eq!(d.stats().oversize_stalls, 1);
}

#[tokio::test]
async fn test_dropped_connection_is_reestablished() {
    let transport = MockTransport::new();
    let mut d = dispatcher(&transport);
    let records = uniform(4, 300);

    assert!(d.dispatch(&records[..2]).await.data_sent);
    transport.drop_connection();

    let result = d.dispatch(pending_after(&records, 2)).await;
    assert_eq!(result, DispatchResult::delivered(4, 2));
    assert_eq!(transport.connect_attempts(), 2);
}

#[tokio::test]
async fn test_cancelled_dispatch_reports_nothing_and_recovers() {
    let transport = MockTransport::new();
    transport.set_send_delay(Some(Duration::from_secs(10)));
    let mut d = dispatcher(&transport);
    let records = uniform(3, 400);

    let cancelled = tokio::time::timeout(Duration::from_millis(20), d.dispatch(&records)).await;
    assert!(cancelled.is_err());
    assert_eq!(d.connection_state(), ConnectionState::Failed);
    assert_eq!(d.last_delivered_id(), 0);
    assert!(transport.sent_messages().is_empty());

    transport.set_send_delay(None);
    let result = d.dispatch(&records).await;
    assert_eq!(result, DispatchResult::delivered(3, 3));
}

#[tokio::test]
async fn test_blocks_follow_smaller_transport_limit() {
    let transport = MockTransport::new().with_max_message_size(1_000);
    let mut d = dispatcher(&transport);
    let records = uniform(5, 400);

    // Cap becomes 1000 * 0.9, so two 400-byte records per block.
    let first = d.dispatch(&records).await;
    assert_eq!(first, DispatchResult::delivered(2, 2));

    let second = d.dispatch(pending_after(&records, 2)).await;
    assert_eq!(second, DispatchResult::delivered(4, 2));

    for message in transport.sent_messages() {
        assert!(message.size() <= 1_000);
    }
}

#[tokio::test]
async fn test_shutdown_without_connection_is_noop() {
    let transport = MockTransport::new();
    let mut d = dispatcher(&transport);

    d.shutdown().await;
    assert_eq!(d.connection_state(), ConnectionState::Absent);
    assert_eq!(transport.disconnects(), 0);
}

#[tokio::test]
async fn test_shutdown_then_dispatch_reconnects() {
    let transport = MockTransport::new();
    let mut d = dispatcher(&transport);
    let records = uniform(2, 100);

    assert!(d.dispatch(&records[..1]).await.data_sent);
    d.shutdown().await;
    assert_eq!(d.connection_state(), ConnectionState::Absent);
    assert_eq!(transport.disconnects(), 1);

    assert!(d.dispatch(pending_after(&records, 1)).await.data_sent);
    assert_eq!(transport.connect_attempts(), 2);
}

#[tokio::test]
async fn test_malformed_rows_never_raise() {
    let transport = MockTransport::new();
    let mut d = dispatcher(&transport);

    let rows = vec![json!({"id": 1, "asset_code": "a", "reading": "not a map", "user_ts": "t"})];
    assert_eq!(d.dispatch_values(&rows).await, DispatchResult::default());
    assert_eq!(transport.connect_attempts(), 0);
}
