// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared access signature tokens for IoT Hub device identities.
//!
//! ```text
//! string-to-sign = url-encode(resource-uri) + "\n" + expiry
//! signature      = base64(HMAC-SHA256(base64-decode(device-key), string-to-sign))
//! token          = "SharedAccessSignature sr={resource}&sig={url-encode(signature)}&se={expiry}"
//! ```

use crate::error::TransportError;
use base64::{engine::general_purpose, Engine as _};
use ring::hmac;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A signed token bound to one resource and expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct SasToken {
    token: String,
    expiry: u64,
}

impl SasToken {
    /// Sign `resource_uri` with the decoded device key.
    pub fn generate(resource_uri: &str, key: &[u8], expires_at: SystemTime) -> Self {
        let expiry = expires_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let resource = uri_encode(resource_uri);
        let string_to_sign = format!("{}\n{}", resource, expiry);

        let key = hmac::Key::new(hmac::HMAC_SHA256, key);
        let tag = hmac::sign(&key, string_to_sign.as_bytes());
        let signature = general_purpose::STANDARD.encode(tag.as_ref());

        Self {
            token: format!(
                "SharedAccessSignature sr={}&sig={}&se={}",
                resource,
                uri_encode(&signature),
                expiry
            ),
            expiry,
        }
    }

    /// Value for the `Authorization` header.
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Expiry in seconds since the Unix epoch.
    pub fn expiry_secs(&self) -> u64 {
        self.expiry
    }

    /// Validity left at `now`; zero once expired.
    pub fn remaining(&self, now: SystemTime) -> Duration {
        let now = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        Duration::from_secs(self.expiry.saturating_sub(now))
    }
}

impl std::fmt::Debug for SasToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SasToken")
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

/// Decode a `SharedAccessKey` value.
pub fn decode_key(key: &str) -> Result<Vec<u8>, TransportError> {
    general_purpose::STANDARD
        .decode(key)
        .map_err(|e| TransportError::Config(format!("SharedAccessKey is not valid base64: {}", e)))
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn uri_encode(input: &str) -> String {
    let mut result = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push('%');
                result.push_str(&format!("{:02X}", byte));
            }
        }
    }
    result
}
