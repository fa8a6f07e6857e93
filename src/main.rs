//! graphite-send: send one metric to a Graphite server
//!
//! Configuration comes from an optional TOML file and command-line flags;
//! flags take precedence over file values.

use chrono::{TimeZone, Utc};
use clap::Parser;
use graphite_client::config::{seconds, FileConfig};
use graphite_client::{Client, Metric, Value};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "graphite-send")]
#[command(version)]
#[command(about = "Send a metric to a Graphite server", long_about = None)]
#[command(allow_negative_numbers = true)]
struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address (e.g., localhost:2003)
    #[arg(short, long)]
    address: Option<String>,

    /// Prefix prepended to the metric path
    #[arg(short, long)]
    prefix: Option<String>,

    /// Dial timeout in seconds
    #[arg(long)]
    dial_timeout: Option<f64>,

    /// Write timeout in seconds
    #[arg(long)]
    write_timeout: Option<f64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Metric path
    path: String,

    /// Metric value, an integer or decimal number
    #[arg(value_parser = parse_value)]
    value: Value,

    /// Unix timestamp in seconds (defaults to now)
    timestamp: Option<i64>,
}

fn parse_value(s: &str) -> Result<Value, String> {
    if let Ok(v) = s.parse::<i64>() {
        Ok(Value::Int(v))
    } else if let Ok(v) = s.parse::<u64>() {
        Ok(Value::UInt(v))
    } else if let Ok(v) = s.parse::<f64>() {
        Ok(Value::Float(v))
    } else {
        Err(format!("'{}' is not a number", s))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();

    let mut file = match cli.config {
        Some(ref path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    // CLI takes precedence
    if let Some(address) = cli.address {
        file.client.address = address;
    }
    if let Some(prefix) = cli.prefix {
        file.client.prefix = prefix;
    }
    let mut config = file.client_config()?;
    if let Some(secs) = cli.dial_timeout {
        config.dial_timeout = seconds("dial_timeout", secs)?;
    }
    if let Some(secs) = cli.write_timeout {
        config.write_timeout = seconds("write_timeout", secs)?;
    }
    let log_level = cli.log_level.unwrap_or(file.logging.level);

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let timestamp = match cli.timestamp {
        Some(secs) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| format!("invalid timestamp: {}", secs))?,
        None => Utc::now(),
    };
    let metric = Metric::new(cli.path, cli.value, timestamp);

    let client = Client::new(&file.client.address, config)?;
    info!(
        address = %client.address(),
        prefix = %client.prefix(),
        metric = %metric,
        "Sending metric"
    );

    client.send(&[metric]).await?;
    client.close().await?;
    Ok(())
}
