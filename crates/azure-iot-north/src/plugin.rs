// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host lifecycle surface: info, init, send, reconfigure, shutdown.

use crate::config::{NorthConfig, Source, PLACEHOLDER_CONNECTION_STRING};
use crate::dispatch::{DispatchResult, DispatchStatsSnapshot, Dispatcher};
use crate::error::ConfigError;
use crate::transport::{HttpsTransport, Transport};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

/// Plugin name reported to the host.
pub const PLUGIN_NAME: &str = "Azure IoT";

/// Host plugin interface version.
pub const PLUGIN_INTERFACE: &str = "1.0";

/// Descriptor of one configuration item, as the host displays it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigItem {
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub default: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readonly: Option<String>,
}

impl ConfigItem {
    fn new(description: &str, kind: &str, default: &str) -> Self {
        Self {
            description: description.to_string(),
            kind: kind.to_string(),
            default: default.to_string(),
            order: None,
            display_name: None,
            options: None,
            readonly: None,
        }
    }

    fn displayed(mut self, order: u32, display_name: &str) -> Self {
        self.order = Some(order.to_string());
        self.display_name = Some(display_name.to_string());
        self
    }
}

/// Default configuration category.
pub fn default_config() -> Map<String, Value> {
    let mut plugin = ConfigItem::new("Azure North Plugin", "string", "azure_iot");
    plugin.readonly = Some("true".into());

    let mut source = ConfigItem::new(
        "Source of data to be sent on the stream. May be either readings or statistics.",
        "enumeration",
        Source::Readings.as_str(),
    )
    .displayed(3, "Source");
    source.options = Some(vec![
        Source::Readings.to_string(),
        Source::Statistics.to_string(),
    ]);

    let items = [
        ("plugin", plugin),
        (
            "primaryConnectionString",
            ConfigItem::new(
                "Connection string based on primary key used in API calls which allows device \
                 to communicate with Azure IoT Hub",
                "string",
                PLACEHOLDER_CONNECTION_STRING,
            )
            .displayed(1, "Primary Connection String"),
        ),
        (
            "websockets",
            ConfigItem::new("Set to true if using MQTT over websockets", "boolean", "false")
                .displayed(2, "MQTT over websockets"),
        ),
        ("source", source),
    ];

    items
        .into_iter()
        .filter_map(|(name, item)| {
            serde_json::to_value(item)
                .ok()
                .map(|v| (name.to_string(), v))
        })
        .collect()
}

/// Static plugin description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub interface: String,
    pub config: Map<String, Value>,
}

pub fn plugin_info() -> PluginInfo {
    PluginInfo {
        name: PLUGIN_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        kind: "north".to_string(),
        interface: PLUGIN_INTERFACE.to_string(),
        config: default_config(),
    }
}

/// One running instance of the plugin, bound to one stream.
#[derive(Debug)]
pub struct NorthPlugin<T: Transport> {
    config: NorthConfig,
    dispatcher: Dispatcher<T>,
}

impl NorthPlugin<HttpsTransport> {
    /// Start the plugin against IoT Hub. No connection is made yet.
    pub fn init(category: &Value) -> Result<Self, ConfigError> {
        Self::with_transport(HttpsTransport::new(), category)
    }
}

impl<T: Transport> NorthPlugin<T> {
    pub fn with_transport(transport: T, category: &Value) -> Result<Self, ConfigError> {
        let config = NorthConfig::from_category(category)?;
        Ok(Self::from_config(transport, config))
    }

    pub fn from_config(transport: T, config: NorthConfig) -> Self {
        info!(
            "{} plugin started (source: {}, websockets: {})",
            PLUGIN_NAME, config.source, config.websockets
        );
        Self {
            dispatcher: Dispatcher::from_config(transport, &config),
            config,
        }
    }

    /// Deliver the next block from the host's pending rows.
    pub async fn send(&mut self, payload: &[Value]) -> DispatchResult {
        self.dispatcher.dispatch_values(payload).await
    }

    /// Replace the configuration. On error the running one is kept.
    pub async fn reconfigure(&mut self, category: &Value) -> Result<(), ConfigError> {
        let config = NorthConfig::from_category(category)?;
        self.dispatcher.reconfigure(&config).await;
        self.config = config;
        info!("{} plugin reconfigured", PLUGIN_NAME);
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        self.dispatcher.shutdown().await;
        info!("{} plugin shut down", PLUGIN_NAME);
    }

    /// What the host should feed into [`NorthPlugin::send`].
    pub fn source(&self) -> Source {
        self.config.source
    }

    pub fn config(&self) -> &NorthConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.dispatcher.stats()
    }
}
