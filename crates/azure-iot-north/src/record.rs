// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Buffered readings and their wire projection.
//!
//! The host hands over rows shaped like:
//!
//! ```text
//! {"id": 42, "asset_code": "pump-1", "reading": {"rpm": 1450}, "user_ts": "2026-01-01 10:00:00.000000+00:00"}
//! ```
//!
//! Only `asset_code`, `reading` and `user_ts` travel to IoT Hub, as
//! `{"asset": ..., "readings": ..., "timestamp": ...}`. The reading map and
//! the timestamp are forwarded verbatim.

use crate::error::NorthError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io;

/// One buffered reading awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Storage identifier, used as the delivery high-water mark.
    pub id: u64,

    /// Asset the reading belongs to.
    #[serde(rename = "asset_code", alias = "asset")]
    pub asset: String,

    /// Measurement name to value.
    pub reading: Map<String, Value>,

    /// Event time as produced upstream.
    #[serde(rename = "user_ts", alias = "timestamp")]
    pub timestamp: Value,
}

impl Record {
    /// Create a record.
    pub fn new(
        id: u64,
        asset: impl Into<String>,
        reading: Map<String, Value>,
        timestamp: impl Into<Value>,
    ) -> Self {
        Self {
            id,
            asset: asset.into(),
            reading,
            timestamp: timestamp.into(),
        }
    }

    /// Convert one raw host row.
    pub fn from_value(value: &Value) -> Result<Self, NorthError> {
        Record::deserialize(value).map_err(|e| {
            let id = value
                .get("id")
                .map(Value::to_string)
                .unwrap_or_else(|| "?".to_string());
            NorthError::Contract(format!("reading id {}: {}", id, e))
        })
    }

    /// Convert a whole host payload. Fails on the first malformed row.
    pub fn from_values(values: &[Value]) -> Result<Vec<Self>, NorthError> {
        values.iter().map(Self::from_value).collect()
    }

    /// The part of the record that is sent.
    pub fn projection(&self) -> Projection<'_> {
        Projection {
            asset: &self.asset,
            readings: &self.reading,
            timestamp: &self.timestamp,
        }
    }
}

/// `{asset, readings, timestamp}` view of a [`Record`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection<'a> {
    pub asset: &'a str,
    pub readings: &'a Map<String, Value>,
    pub timestamp: &'a Value,
}

impl Projection<'_> {
    /// Size in bytes of the compact JSON encoding.
    pub fn encoded_len(&self) -> Result<usize, serde_json::Error> {
        let mut counter = ByteCounter(0);
        serde_json::to_writer(&mut counter, self)?;
        Ok(counter.0)
    }
}

/// Sink that only counts what would have been written.
struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
