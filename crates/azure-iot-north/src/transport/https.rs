// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IoT Hub device-to-cloud messages over HTTPS.
//!
//! ```text
//! POST https://{host}/devices/{device}[/modules/{module}]/messages/events?api-version={v}
//! Authorization: SharedAccessSignature sr=...&sig=...&se=...
//! ```
//!
//! "Connecting" builds the client and signs a token; no request is made
//! until the first send. The connection reports itself dead once the token
//! is about to expire or the hub refuses it, which makes the connection
//! manager reconnect and re-sign.

use super::sas::{self, SasToken};
use super::{Connection, Message, Transport, TransportOptions};
use crate::config::ConnectionString;
use crate::error::TransportError;
use crate::packer::IOT_HUB_MAX_MESSAGE_SIZE;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::time::{Duration, SystemTime};

/// A token with less validity than this is treated as expired.
pub const TOKEN_RENEWAL_MARGIN: Duration = Duration::from_secs(60);

const HEADER_CONTENT_TYPE: &str = "iothub-contenttype";
const HEADER_CONTENT_ENCODING: &str = "iothub-contentencoding";

/// Transport for the IoT Hub REST endpoint.
#[derive(Debug, Clone, Default)]
pub struct HttpsTransport;

impl HttpsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for HttpsTransport {
    type Connection = HttpsConnection;

    async fn connect(
        &self,
        credentials: &ConnectionString,
        options: &TransportOptions,
    ) -> Result<HttpsConnection, TransportError> {
        HttpsConnection::open(credentials, options)
    }
}

/// One signed session against the hub.
#[derive(Debug)]
pub struct HttpsConnection {
    client: Client,
    url: String,
    token: SasToken,
    closed: bool,
}

impl HttpsConnection {
    fn open(
        credentials: &ConnectionString,
        options: &TransportOptions,
    ) -> Result<Self, TransportError> {
        let key = sas::decode_key(credentials.shared_access_key())?;

        if options.websockets {
            tracing::debug!("websockets requested; HTTPS already runs over port 443");
        }

        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()?;

        let url = format!(
            "https://{}/{}/messages/events?api-version={}",
            credentials.endpoint_host(),
            credentials.identity_path(),
            options.api_version
        );
        let token = SasToken::generate(
            &credentials.resource_uri(),
            &key,
            SystemTime::now() + options.sas_ttl,
        );

        tracing::debug!(
            "Opened IoT Hub session for {} (token expires at {})",
            credentials.identity_path(),
            token.expiry_secs()
        );

        Ok(Self {
            client,
            url,
            token,
            closed: false,
        })
    }

    /// Endpoint messages are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn token_valid(&self, now: SystemTime) -> bool {
        self.token.remaining(now) > TOKEN_RENEWAL_MARGIN
    }
}

impl Connection for HttpsConnection {
    fn is_alive(&self) -> bool {
        !self.closed && self.token_valid(SystemTime::now())
    }

    async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionLost);
        }
        if message.size() > IOT_HUB_MAX_MESSAGE_SIZE {
            return Err(TransportError::MessageTooLarge {
                size: message.size(),
                max: IOT_HUB_MAX_MESSAGE_SIZE,
            });
        }

        let response = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, self.token.as_str())
            .header(CONTENT_TYPE, message.content_type())
            .header(HEADER_CONTENT_TYPE, message.content_type())
            .header(HEADER_CONTENT_ENCODING, message.content_encoding())
            .body(message.body().to_vec())
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                if e.is_connect() {
                    self.closed = true;
                }
                return Err(TransportError::Http(e));
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            self.closed = true;
            return Err(TransportError::Unauthorized);
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn disconnect(mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }
}
