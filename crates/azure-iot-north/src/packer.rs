// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Size-bounded batch packing.
//!
//! Takes the longest prefix of the pending records whose compact JSON array
//! encoding stays within `size_limit * safety_factor`. The headroom covers
//! per-message transport overhead that is not visible here.
//!
//! ```text
//! pending:  [r1][r2][r3][r4][r5] ...
//! block:    [r1,r2,r3]            <= cap        truncated = true
//! resume:              [r4][r5] ...             next call
//! ```

use crate::record::{Projection, Record};

/// Largest device-to-cloud message IoT Hub accepts.
pub const IOT_HUB_MAX_MESSAGE_SIZE: usize = 262_144;

/// Share of the message size the packer is allowed to fill.
pub const DEFAULT_SAFETY_FACTOR: f64 = 0.9;

/// Bytes of `[` and `]` around the encoded array.
const ARRAY_FRAMING: usize = 2;

/// Size bounds for one transmission unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackingLimits {
    /// Hard transport limit in bytes.
    pub size_limit: usize,
    /// Fraction of `size_limit` that may be used, in `(0, 1]`.
    pub safety_factor: f64,
}

impl PackingLimits {
    /// Create limits.
    pub fn new(size_limit: usize, safety_factor: f64) -> Self {
        Self {
            size_limit,
            safety_factor,
        }
    }

    /// Effective cap in bytes (not rounded).
    pub fn cap(&self) -> f64 {
        self.size_limit as f64 * self.safety_factor
    }

    fn admits(&self, total: usize) -> bool {
        total as f64 <= self.cap()
    }
}

impl Default for PackingLimits {
    fn default() -> Self {
        Self::new(IOT_HUB_MAX_MESSAGE_SIZE, DEFAULT_SAFETY_FACTOR)
    }
}

/// An ordered batch of projections that fits in one message.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmissionUnit<'a> {
    entries: Vec<Projection<'a>>,
    encoded_size: usize,
}

impl<'a> TransmissionUnit<'a> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            encoded_size: ARRAY_FRAMING,
        }
    }

    /// Projections in send order.
    pub fn entries(&self) -> &[Projection<'a>] {
        &self.entries
    }

    /// Exact length of [`TransmissionUnit::to_json`].
    pub fn encoded_size(&self) -> usize {
        self.encoded_size
    }

    /// Number of records in the unit.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the unit is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compact JSON array body.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.entries)
    }
}

/// A record that can never fit, blocking the stream at its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OversizeRecord {
    pub id: u64,
    pub encoded_size: usize,
}

/// Outcome of one packing pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedBlock<'a> {
    /// Records to send.
    pub unit: TransmissionUnit<'a>,
    /// Id of the last included record, or the caller's value if none.
    pub last_id: u64,
    /// More records remain after the unit.
    pub truncated: bool,
    /// Set when the very first pending record alone exceeds the cap.
    pub stalled: Option<OversizeRecord>,
}

/// Packs pending records into size-bounded transmission units.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchPacker {
    limits: PackingLimits,
}

impl BatchPacker {
    /// Create a packer.
    pub fn new(limits: PackingLimits) -> Self {
        Self { limits }
    }

    /// Configured limits.
    pub fn limits(&self) -> PackingLimits {
        self.limits
    }

    /// Pack the longest fitting prefix of `records`.
    ///
    /// `last_id` is returned unchanged when nothing fits. Records are never
    /// reordered, and a record that does not fit ends the block even if a
    /// later, smaller one would.
    pub fn pack<'a>(
        &self,
        records: &'a [Record],
        last_id: u64,
    ) -> Result<PackedBlock<'a>, serde_json::Error> {
        let mut unit = TransmissionUnit::new();
        let mut last_id = last_id;
        let mut truncated = false;
        let mut stalled = None;

        for record in records {
            let projection = record.projection();
            let size = projection.encoded_len()?;
            let separator = usize::from(!unit.is_empty());
            let total = unit.encoded_size + separator + size;

            if !self.limits.admits(total) {
                truncated = true;
                if unit.is_empty() {
                    stalled = Some(OversizeRecord {
                        id: record.id,
                        encoded_size: size,
                    });
                }
                break;
            }

            unit.entries.push(projection);
            unit.encoded_size = total;
            last_id = record.id;
        }

        Ok(PackedBlock {
            unit,
            last_id,
            truncated,
            stalled,
        })
    }
}
