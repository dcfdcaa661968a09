// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Plugin configuration.
//!
//! Two entry points:
//! - a TOML file, used by the standalone driver;
//! - the host's category document (`{"item": {"value": ...}}`), used by
//!   [`crate::plugin::NorthPlugin`].
//!
//! The connection string is kept as text and only parsed when a connection
//! is attempted, so a malformed one shows up as a failed connect.

use crate::connection::DEFAULT_MAX_RETRY_COUNT;
use crate::dispatch::DEFAULT_SEND_TIMEOUT;
use crate::error::ConfigError;
use crate::packer::{PackingLimits, DEFAULT_SAFETY_FACTOR, IOT_HUB_MAX_MESSAGE_SIZE};
use crate::transport::https::TOKEN_RENEWAL_MARGIN;
use crate::transport::TransportOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// What the host feeds into the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Readings,
    Statistics,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Readings => "readings",
            Source::Statistics => "statistics",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "readings" => Ok(Source::Readings),
            "statistics" => Ok(Source::Statistics),
            other => Err(ConfigError::Invalid(format!(
                "source must be 'readings' or 'statistics', got '{}'",
                other
            ))),
        }
    }
}

/// Parsed IoT Hub device connection string.
///
/// `HostName=<hub>.azure-devices.net;DeviceId=<device>;SharedAccessKey=<base64>`
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    host_name: String,
    device_id: String,
    shared_access_key: String,
    module_id: Option<String>,
    gateway_host_name: Option<String>,
}

impl ConnectionString {
    /// Parse `Key=Value` pairs separated by `;`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let mut host_name = None;
        let mut device_id = None;
        let mut shared_access_key = None;
        let mut module_id = None;
        let mut gateway_host_name = None;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // Keys are base64 and may end in '=' padding, so split on the first '=' only.
            let (key, value) = part.split_once('=').ok_or_else(|| {
                ConfigError::Invalid(format!("connection string segment '{}' has no '='", part))
            })?;
            let value = value.trim();
            if value.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "connection string item '{}' is empty",
                    key
                )));
            }

            let slot = match key.trim() {
                "HostName" => &mut host_name,
                "DeviceId" => &mut device_id,
                "SharedAccessKey" => &mut shared_access_key,
                "ModuleId" => &mut module_id,
                "GatewayHostName" => &mut gateway_host_name,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "unknown connection string item '{}'",
                        other
                    )))
                }
            };
            if slot.is_some() {
                return Err(ConfigError::Invalid(format!(
                    "duplicate connection string item '{}'",
                    key.trim()
                )));
            }
            *slot = Some(value.to_string());
        }

        Ok(Self {
            host_name: host_name.ok_or_else(|| ConfigError::MissingField("HostName".into()))?,
            device_id: device_id.ok_or_else(|| ConfigError::MissingField("DeviceId".into()))?,
            shared_access_key: shared_access_key
                .ok_or_else(|| ConfigError::MissingField("SharedAccessKey".into()))?,
            module_id,
            gateway_host_name,
        })
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn shared_access_key(&self) -> &str {
        &self.shared_access_key
    }

    pub fn module_id(&self) -> Option<&str> {
        self.module_id.as_deref()
    }

    pub fn gateway_host_name(&self) -> Option<&str> {
        self.gateway_host_name.as_deref()
    }

    /// Host messages are posted to (the gateway when one is configured).
    pub fn endpoint_host(&self) -> &str {
        self.gateway_host_name.as_deref().unwrap_or(&self.host_name)
    }

    /// `devices/{id}` or `devices/{id}/modules/{module}`.
    pub fn identity_path(&self) -> String {
        match &self.module_id {
            Some(module) => format!("devices/{}/modules/{}", self.device_id, module),
            None => format!("devices/{}", self.device_id),
        }
    }

    /// Resource the SAS token is scoped to.
    pub fn resource_uri(&self) -> String {
        format!("{}/{}", self.host_name, self.identity_path())
    }
}

impl FromStr for ConnectionString {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .field("shared_access_key", &"<redacted>")
            .field("module_id", &self.module_id)
            .field("gateway_host_name", &self.gateway_host_name)
            .finish()
    }
}

/// Default connection string shown by the host before configuration.
pub const PLACEHOLDER_CONNECTION_STRING: &str =
    "HostName=<Host Name>;DeviceId=<Device Name>;SharedAccessKey=<Device Key>";

/// Plugin configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct NorthConfig {
    /// IoT Hub device connection string.
    pub connection_string: String,

    /// Host setting for MQTT over websockets. The HTTPS transport already
    /// runs over port 443 and only logs it.
    #[serde(default)]
    pub websockets: bool,

    /// Data the host feeds into the stream.
    #[serde(default)]
    pub source: Source,

    /// Consecutive failed connects before reconnecting stops.
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,

    /// Transport message size limit (bytes).
    #[serde(default = "default_size_limit")]
    pub size_limit: usize,

    /// Fraction of `size_limit` a block may fill.
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,

    /// Bound on one whole dispatch call (milliseconds).
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Bound on establishing a connection (milliseconds).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// SAS token lifetime (seconds).
    #[serde(default = "default_sas_ttl_secs")]
    pub sas_ttl_secs: u64,

    /// IoT Hub REST API version.
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_max_retry_count() -> u32 {
    DEFAULT_MAX_RETRY_COUNT
}

fn default_size_limit() -> usize {
    IOT_HUB_MAX_MESSAGE_SIZE
}

fn default_safety_factor() -> f64 {
    DEFAULT_SAFETY_FACTOR
}

fn default_send_timeout_ms() -> u64 {
    DEFAULT_SEND_TIMEOUT.as_millis() as u64
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_sas_ttl_secs() -> u64 {
    3600
}

fn default_api_version() -> String {
    "2020-03-13".to_string()
}

impl Default for NorthConfig {
    fn default() -> Self {
        Self {
            connection_string: PLACEHOLDER_CONNECTION_STRING.to_string(),
            websockets: false,
            source: Source::default(),
            max_retry_count: default_max_retry_count(),
            size_limit: default_size_limit(),
            safety_factor: default_safety_factor(),
            send_timeout_ms: default_send_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            sas_ttl_secs: default_sas_ttl_secs(),
            api_version: default_api_version(),
        }
    }
}

impl fmt::Debug for NorthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let credentials = ConnectionString::parse(&self.connection_string)
            .map(|cs| format!("{:?}", cs))
            .unwrap_or_else(|_| "<unparsed>".to_string());
        f.debug_struct("NorthConfig")
            .field("connection_string", &credentials)
            .field("websockets", &self.websockets)
            .field("source", &self.source)
            .field("max_retry_count", &self.max_retry_count)
            .field("size_limit", &self.size_limit)
            .field("safety_factor", &self.safety_factor)
            .field("send_timeout_ms", &self.send_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("sas_ttl_secs", &self.sas_ttl_secs)
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl NorthConfig {
    /// Configuration with defaults for everything but the credentials.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the host's category document.
    ///
    /// Recognized items: `primaryConnectionString`, `websockets`, `source`.
    /// Each item's `value` is used, falling back to its `default`.
    pub fn from_category(category: &Value) -> Result<Self, ConfigError> {
        let connection_string = category_item(category, "primaryConnectionString")
            .ok_or_else(|| ConfigError::MissingField("primaryConnectionString".into()))?
            .as_str()
            .ok_or_else(|| {
                ConfigError::Invalid("primaryConnectionString must be a string".into())
            })?
            .to_string();

        let websockets = match category_item(category, "websockets") {
            Some(v) => parse_bool("websockets", v)?,
            None => false,
        };

        let source = match category_item(category, "source") {
            Some(Value::String(s)) => s.parse()?,
            Some(_) => return Err(ConfigError::Invalid("source must be a string".into())),
            None => Source::default(),
        };

        let config = Self {
            connection_string,
            websockets,
            source,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate numeric bounds. Credentials are checked at connect time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_string.trim().is_empty() {
            return Err(ConfigError::MissingField("connection_string".into()));
        }
        if self.size_limit == 0 || self.size_limit > IOT_HUB_MAX_MESSAGE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "size_limit must be in 1..={}, got {}",
                IOT_HUB_MAX_MESSAGE_SIZE, self.size_limit
            )));
        }
        if !(self.safety_factor > 0.0 && self.safety_factor <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "safety_factor must be in (0, 1], got {}",
                self.safety_factor
            )));
        }
        if self.max_retry_count == 0 {
            return Err(ConfigError::Invalid(
                "max_retry_count must be at least 1".into(),
            ));
        }
        if self.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "send_timeout_ms must be positive".into(),
            ));
        }
        if self.sas_ttl_secs <= TOKEN_RENEWAL_MARGIN.as_secs() {
            return Err(ConfigError::Invalid(format!(
                "sas_ttl_secs must exceed the {} s token renewal margin, got {}",
                TOKEN_RENEWAL_MARGIN.as_secs(),
                self.sas_ttl_secs
            )));
        }
        Ok(())
    }

    /// Parse the connection string.
    pub fn credentials(&self) -> Result<ConnectionString, ConfigError> {
        ConnectionString::parse(&self.connection_string)
    }

    pub fn packing_limits(&self) -> PackingLimits {
        PackingLimits::new(self.size_limit, self.safety_factor)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            websockets: self.websockets,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            sas_ttl: Duration::from_secs(self.sas_ttl_secs),
            api_version: self.api_version.clone(),
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

fn category_item<'a>(category: &'a Value, name: &str) -> Option<&'a Value> {
    let item = category.get(name)?;
    item.get("value").or_else(|| item.get("default"))
}

fn parse_bool(name: &str, value: &Value) -> Result<bool, ConfigError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(ConfigError::Invalid(format!(
                "{} must be 'true' or 'false', got '{}'",
                name, other
            ))),
        },
        other => Err(ConfigError::Invalid(format!(
            "{} must be a boolean, got {}",
            name, other
        ))),
    }
}
