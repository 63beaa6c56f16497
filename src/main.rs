use anyhow::Context;
use serde::Serialize;
use sntp_query::config::{self, Config};
use sntp_query::{NetworkInterface, SystemNetwork, TimeQueryClient};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Serialize)]
struct QueryReport {
    server: String,
    timestamp: i64,
    utc: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        server = %config.ntp.server.address,
        port = config.ntp.server.port,
        bind = %config.ntp.bind_addr,
        "Querying NTP server"
    );

    let network: Arc<dyn NetworkInterface> = Arc::new(SystemNetwork::new(config.ntp.bind_addr));
    let client = TimeQueryClient::new(Some(network)).with_server(config.ntp.server.clone());

    let timestamp = client
        .query_async(config.query_timeout())
        .await
        .inspect_err(|e| error!(error = %e, code = e.code(), "NTP query failed"))
        .context("NTP query failed")?;

    let utc = chrono::DateTime::from_timestamp(timestamp, 0)
        .context("Timestamp out of range")?
        .to_rfc3339();

    let report = QueryReport {
        server: format!("{}:{}", config.ntp.server.address, config.ntp.server.port),
        timestamp,
        utc,
    };
    println!("{}", serde_json::to_string(&report)?);

    Ok(())
}

/// Initialize logging based on configuration
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        config::LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        config::LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }
}
