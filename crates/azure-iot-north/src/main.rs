// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Azure IoT North CLI
//!
//! Standalone driver that plays the host's role: it feeds readings from a
//! file to the dispatcher and advances the cursor on every delivered block.
//!
//! # Usage
//!
//! ```bash
//! # Generate a configuration, then edit the connection string
//! azure-iot-north gen-config --output north.toml
//!
//! # Check it
//! azure-iot-north validate --config north.toml
//!
//! # Deliver readings (JSON array or one JSON object per line)
//! azure-iot-north run --config north.toml --input readings.json
//!
//! # Same, without touching the network
//! azure-iot-north run --config north.toml --input readings.json --dry-run
//! ```

use anyhow::{Context, Result};
use azure_iot_north::{
    plugin_info, DispatchStatsSnapshot, Dispatcher, HttpsTransport, MockTransport, NorthConfig,
    Record, Transport,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Azure IoT Hub north plugin
#[derive(Parser, Debug)]
#[command(name = "azure-iot-north")]
#[command(about = "Azure IoT Hub north plugin - batched delivery of buffered readings")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deliver readings from a file
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,

        /// Readings file (JSON array or JSON lines)
        #[arg(short, long)]
        input: PathBuf,

        /// Pause between dispatch calls (milliseconds)
        #[arg(long, default_value = "0")]
        interval_ms: u64,

        /// Stop after this many dispatch calls
        #[arg(long)]
        max_calls: Option<u64>,

        /// Use the in-memory transport instead of IoT Hub
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "azure-iot-north.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print plugin information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.command {
        Commands::Run {
            config,
            input,
            interval_ms,
            max_calls,
            dry_run,
        } => {
            let config = NorthConfig::from_file(&config)
                .with_context(|| format!("Failed to load {}", config.display()))?;
            let records = load_records(&input)?;
            let interval = Duration::from_millis(interval_ms);

            let stats = if dry_run {
                info!("Dry run: readings go to the in-memory transport");
                let transport = MockTransport::new();
                let stats = run(transport.clone(), &config, &records, interval, max_calls).await;
                println!(
                    "Dry run captured {} messages",
                    transport.sent_messages().len()
                );
                stats
            } else {
                run(HttpsTransport::new(), &config, &records, interval, max_calls).await
            };

            println!("\nFinal Statistics:");
            print_stats(&stats);
            Ok(())
        }
        Commands::GenConfig { output } => cmd_gen_config(&output),
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Info => {
            println!("{}", serde_json::to_string_pretty(&plugin_info())?);
            Ok(())
        }
    }
}

/// Dispatch until everything is delivered or a call makes no progress.
async fn run<T: Transport>(
    transport: T,
    config: &NorthConfig,
    records: &[Record],
    interval: Duration,
    max_calls: Option<u64>,
) -> DispatchStatsSnapshot {
    let mut dispatcher = Dispatcher::from_config(transport, config);
    let mut cursor = 0u64;
    let mut calls = 0u64;

    loop {
        let start = records.partition_point(|r| r.id <= cursor);
        let pending = &records[start..];
        if pending.is_empty() {
            info!("All {} readings delivered", records.len());
            break;
        }
        if max_calls.is_some_and(|max| calls >= max) {
            warn!("Stopping after {} calls, {} readings left", calls, pending.len());
            break;
        }

        let result = dispatcher.dispatch(pending).await;
        calls += 1;
        if !result.data_sent {
            warn!("Call {} delivered nothing, {} readings left", calls, pending.len());
            break;
        }
        info!(
            "Call {}: delivered {} readings up to id {}",
            calls, result.count, result.last_delivered_id
        );
        cursor = result.last_delivered_id;

        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }

    dispatcher.shutdown().await;
    dispatcher.stats()
}

/// Read records from a JSON array or from JSON lines, sorted by id.
fn load_records(path: &Path) -> Result<Vec<Record>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let rows: Vec<Value> = if content.trim_start().starts_with('[') {
        serde_json::from_str(&content).context("Invalid JSON array")?
    } else {
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str::<Value>(line)
                    .with_context(|| format!("Invalid JSON on line {}", i + 1))
            })
            .collect::<Result<_>>()?
    };

    let mut records = Record::from_values(&rows)?;
    records.sort_by_key(|r| r.id);
    info!("Loaded {} readings from {}", records.len(), path.display());
    Ok(records)
}

fn cmd_gen_config(output: &Path) -> Result<()> {
    let config = NorthConfig::default();
    let toml_str = toml::to_string_pretty(&config)?;

    let content = format!(
        r#"# Azure IoT North Configuration
# Generated by azure-iot-north gen-config
# Replace the connection string with the device's primary connection string.

{}
"#,
        toml_str
    );

    std::fs::write(output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    let config = match NorthConfig::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    };

    match config.credentials() {
        Ok(credentials) => {
            println!("Configuration valid!");
            println!();
            println!("Hub:       {}", credentials.endpoint_host());
            println!("Identity:  {}", credentials.identity_path());
            println!("Source:    {}", config.source);
            println!("Retries:   {}", config.max_retry_count);
            println!("Cap:       {:.0} bytes", config.packing_limits().cap());
            Ok(())
        }
        Err(e) => {
            eprintln!("Connection string invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &DispatchStatsSnapshot) {
    println!(
        "  {} calls, {} blocks, {} readings ({:.1} per block), {}",
        stats.calls,
        stats.blocks_sent,
        stats.records_sent,
        stats.records_per_block(),
        format_bytes(stats.bytes_sent)
    );
    println!(
        "  {} failed calls, {} truncated blocks, {} oversize stalls, {} connect attempts",
        stats.failed_calls, stats.truncated_blocks, stats.oversize_stalls, stats.connect_attempts
    );
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
